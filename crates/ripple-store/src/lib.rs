//! # Ripple Store
//!
//! Versioned storage primitives consumed by the Ripple change notifier:
//!
//! - **Versions & snapshots**: opaque [`VersionId`]s, read transactions
//!   pinned at a specific committed version, and deterministic change-set
//!   extraction between two versions ([`Database::advance_read`]).
//! - **Coordinators**: per-file singletons that serialize write commits and
//!   fan out commit callbacks to observers ([`Coordinator`]).
//! - **Additive schema**: reconciliation that only ever adds tables and
//!   columns ([`Schema`]).
//! - **Event-loop signal**: a cross-thread, coalescing wakeup primitive for
//!   single-threaded host loops ([`EventLoop`], [`Signal`]).
//!
//! ## Handle discipline
//!
//! A [`Database`] is an uncached handle: every `open` produces a fresh handle
//! onto the shared per-path [`Coordinator`]. Handles are never shared across
//! threads; each thread opens its own. A handle either holds no read
//! transaction or is pinned to one [`VersionId`] for the lifetime of that
//! read.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod changeset;
mod config;
mod coordinator;
mod database;
mod error;
mod group;
mod schema;
mod signal;
mod value;
mod version;

pub use changeset::{ChangeSet, ChangeTracker, TableChange};
pub use config::{StoreConfig, SyncConfig};
pub use coordinator::{Coordinator, ObserverControl, ObserverToken, RowChange};
pub use database::{Database, WriteTransaction};
pub use error::{Result, StoreError};
pub use group::{Group, TableData};
pub use schema::{is_reserved_type, ColumnDef, Schema, TableDef};
pub use signal::{EventLoop, Signal};
pub use value::{ColumnType, RowKey, Value};
pub use version::VersionId;
