//! # Ripple Notify
//!
//! Server-side global change notifier for a dynamic fleet of synchronized
//! database files.
//!
//! The [`GlobalNotifier`] watches an administrative database enumerating
//! the fleet, registers every admitted file with the shared storage
//! coordinators, computes per-version change descriptions on a dedicated
//! calculator thread, and dispatches [`ChangeNotification`]s in commit
//! order on a host-provided event loop.
//!
//! The [`subscription`] module implements partial-sync query registration:
//! a metadata-table state machine that writes a query as a `__ResultSets`
//! row and observes it until the server marks it resolved.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod admin;
mod error;
mod notification;
mod notifier;
pub mod subscription;
mod worker;

pub use admin::AdminFeed;
pub use error::{NotifierError, Result};
pub use notification::ChangeNotification;
pub use notifier::{GlobalNotifier, NotifierConfig, Target};
pub use subscription::{
    get_default_name, get_query_status, register_query, Results, SubscriptionHandle,
    SubscriptionState, SubscriptionWatchBuilder,
};
