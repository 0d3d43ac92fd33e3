//! Database handles and transactions.
//!
//! A [`Database`] is an *uncached* handle: every `open` yields a fresh handle
//! onto the shared per-path [`Coordinator`]. A handle either holds no read
//! transaction or is pinned to a specific [`VersionId`] for the lifetime of
//! that read; multiple handles to the same file may be pinned at different
//! historical versions simultaneously.

use std::sync::Arc;

use parking_lot::MutexGuard;
use tracing::debug;

use crate::changeset::ChangeTracker;
use crate::config::StoreConfig;
use crate::coordinator::Coordinator;
use crate::error::{Result, StoreError};
use crate::group::Group;
use crate::schema::{ColumnDef, Schema, TableDef};
use crate::value::{RowKey, Value};
use crate::version::VersionId;

struct ReadTransaction {
    version: VersionId,
    group: Arc<Group>,
}

/// An uncached handle onto one database file.
pub struct Database {
    config: StoreConfig,
    coordinator: Arc<Coordinator>,
    read: Option<ReadTransaction>,
}

impl Database {
    /// Opens a fresh handle for `config`.
    ///
    /// Creates the backing file if absent and applies `config.schema`
    /// additively (committing a new version if the schema added anything).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the file cannot be created, or
    /// [`StoreError::SchemaMismatch`] if the schema cannot be applied
    /// additively.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let coordinator = Coordinator::for_config(&config)?;
        if let Some(schema) = &config.schema {
            coordinator.apply_schema(schema)?;
        }
        Ok(Self {
            config,
            coordinator,
            read: None,
        })
    }

    /// The configuration this handle was opened with.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The shared coordinator for this file.
    #[must_use]
    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Copy of the file's canonical schema.
    #[must_use]
    pub fn schema(&self) -> Schema {
        self.coordinator.schema()
    }

    /// Version this handle currently observes: the pinned read-transaction
    /// version if a read is active, otherwise the latest committed version.
    #[must_use]
    pub fn current_version(&self) -> VersionId {
        self.read
            .as_ref()
            .map_or_else(|| self.coordinator.current_version(), |r| r.version)
    }

    /// Version of the active read transaction, if any.
    #[must_use]
    pub fn version_of_current_transaction(&self) -> Option<VersionId> {
        self.read.as_ref().map(|r| r.version)
    }

    /// Begins a read transaction pinned at `version` (or at the latest
    /// committed version for `None`), replacing any active read.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidVersion`] if the version is unknown to
    /// the coordinator.
    pub fn begin_read(&mut self, version: Option<VersionId>) -> Result<&Group> {
        let (version, group) = self.coordinator.snapshot_at(version)?;
        let read = self.read.insert(ReadTransaction { version, group });
        Ok(&read.group)
    }

    /// The group of the active read transaction, beginning a read at the
    /// latest version if none is active.
    ///
    /// # Errors
    ///
    /// Propagates [`Database::begin_read`] failures.
    pub fn read_group(&mut self) -> Result<&Group> {
        if self.read.is_none() {
            self.begin_read(None)?;
        }
        match &self.read {
            Some(read) => Ok(&read.group),
            None => Err(StoreError::NoReadTransaction),
        }
    }

    /// Ends the active read transaction, unpinning the handle.
    pub fn end_read(&mut self) {
        self.read = None;
    }

    /// Moves the active read transaction forward to `to`, populating one
    /// tracker entry per table of the target group.
    ///
    /// Deterministic for a given `(from, to)` pair: the tracker contents are
    /// a pure function of the two snapshots.
    ///
    /// # Errors
    ///
    /// [`StoreError::NoReadTransaction`] if the handle is not pinned,
    /// [`StoreError::VersionRegression`] if `to` is older than the pinned
    /// version, [`StoreError::InvalidVersion`] if `to` is unknown.
    pub fn advance_read(&mut self, to: VersionId, tracker: &mut ChangeTracker) -> Result<()> {
        let read = self.read.as_ref().ok_or(StoreError::NoReadTransaction)?;
        let from = read.version;
        if to < from {
            return Err(StoreError::VersionRegression { from, to });
        }
        let (version, new_group) = self.coordinator.snapshot_at(Some(to))?;
        tracker.populate(&read.group, &new_group);
        debug!(%from, %to, "advanced read transaction");
        self.read = Some(ReadTransaction {
            version,
            group: new_group,
        });
        Ok(())
    }

    /// Begins a write transaction.
    ///
    /// Takes the coordinator's commit lock: concurrent writers on other
    /// handles block until this transaction commits or is dropped. Dropping
    /// the transaction without committing rolls back.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidVersion`] if the coordinator state is
    /// torn (should not occur under normal operation).
    pub fn begin_write(&mut self) -> Result<WriteTransaction<'_>> {
        let (guard, group, schema) = self.coordinator.begin_staged()?;
        Ok(WriteTransaction {
            coordinator: &self.coordinator,
            _guard: guard,
            group,
            schema,
        })
    }

}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.config.path)
            .field("pinned", &self.read.as_ref().map(|r| r.version))
            .finish_non_exhaustive()
    }
}

/// An in-flight write transaction on one handle.
///
/// Mutations act on a staged copy of the group; nothing is visible to other
/// handles until [`WriteTransaction::commit`]. Dropping the transaction
/// discards the staged state (scoped-exit rollback).
pub struct WriteTransaction<'db> {
    coordinator: &'db Arc<Coordinator>,
    _guard: MutexGuard<'db, ()>,
    group: Group,
    schema: Schema,
}

impl WriteTransaction<'_> {
    /// Ensures the named table exists with at least the given columns
    /// (additive).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SchemaMismatch`] on a column type conflict.
    pub fn ensure_table(&mut self, name: &str, columns: &[ColumnDef]) -> Result<()> {
        let def = TableDef {
            name: name.to_string(),
            columns: columns.to_vec(),
        };
        self.schema.merge_additive(&Schema::new(vec![def]))?;
        self.group.ensure_table(name, columns)?;
        Ok(())
    }

    /// Adds a column to an existing table (no-op if an identical column is
    /// already present), returning its index.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoSuchTable`] or
    /// [`StoreError::SchemaMismatch`] on a type conflict.
    pub fn add_column(&mut self, table: &str, def: ColumnDef) -> Result<usize> {
        let table_def = TableDef {
            name: table.to_string(),
            columns: vec![def.clone()],
        };
        self.schema.merge_additive(&Schema::new(vec![table_def]))?;
        self.group.table_mut(table)?.add_column(def)
    }

    /// Appends an empty row, returning its index.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoSuchTable`] if the table does not exist.
    pub fn insert_row(&mut self, table: &str) -> Result<usize> {
        Ok(self.group.table_mut(table)?.insert_row())
    }

    /// Removes the row at `row`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoSuchTable`] or
    /// [`StoreError::RowOutOfBounds`].
    pub fn remove_row(&mut self, table: &str, row: usize) -> Result<()> {
        self.group.table_mut(table)?.remove_row(row)
    }

    /// Sets the value of the named column in one row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoSuchTable`], [`StoreError::NoSuchColumn`],
    /// [`StoreError::RowOutOfBounds`], or [`StoreError::TypeMismatch`].
    pub fn set(&mut self, table: &str, row: usize, column: &str, value: Value) -> Result<()> {
        let data = self.group.table_mut(table)?;
        let col = data
            .column_index(column)
            .ok_or_else(|| StoreError::NoSuchColumn(format!("{table}.{column}")))?;
        data.set(row, col, value)
    }

    /// Appends a link to a link-list column.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`WriteTransaction::set`].
    pub fn add_link(&mut self, table: &str, row: usize, column: &str, key: RowKey) -> Result<()> {
        let data = self.group.table_mut(table)?;
        let col = data
            .column_index(column)
            .ok_or_else(|| StoreError::NoSuchColumn(format!("{table}.{column}")))?;
        data.add_link(row, col, key)
    }

    /// Stable key of a staged row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoSuchTable`] or
    /// [`StoreError::RowOutOfBounds`].
    pub fn row_key(&self, table: &str, row: usize) -> Result<RowKey> {
        self.group
            .table_by_name(table)
            .ok_or_else(|| StoreError::NoSuchTable(table.to_string()))?
            .row_key(row)
            .ok_or(StoreError::RowOutOfBounds(row))
    }

    /// Read access to the staged group.
    #[must_use]
    pub fn group(&self) -> &Group {
        &self.group
    }

    /// Commits the staged state as the next version and fans the commit out
    /// to the coordinator's callbacks (on this thread, under the commit
    /// lock).
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` mirrors the storage contract.
    pub fn commit(self) -> Result<VersionId> {
        let Self {
            coordinator,
            _guard,
            group,
            schema,
        } = self;
        let (old_v, new_v, old_group, new_group) = coordinator.install_commit(group, schema);
        coordinator.finish_commit(old_v, new_v, &old_group, &new_group);
        drop(_guard);
        Ok(new_v)
    }
}

impl std::fmt::Debug for WriteTransaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTransaction")
            .field("tables", &self.group.table_count())
            .finish_non_exhaustive()
    }
}
