//! Per-file coordinators.
//!
//! A [`Coordinator`] is the per-canonical-path singleton behind every
//! [`Database`](crate::Database) handle. It owns the canonical schema, the
//! committed version history, and the commit fan-out: the transaction
//! callback, table observers, and row observers.
//!
//! # Locking
//!
//! Two locks with distinct jobs:
//!
//! - `commit_lock` serializes whole write transactions *and* callback
//!   fan-out. It is held from `begin_write` until the callbacks for that
//!   commit have returned, which is what gives observers commit-order
//!   delivery.
//! - `state` guards the version map and schema. It is **not** held while
//!   callbacks run, so a callback may freely open handles and begin reads on
//!   this coordinator.
//!
//! Callbacks must not install or detach observers on the coordinator whose
//! commit they are observing; use a different thread or defer past the
//! commit.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};

use fxhash::FxHashMap;
use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::debug;

use smallvec::SmallVec;

use crate::changeset::{diff_groups, ChangeSet};
use crate::config::{StoreConfig, SyncConfig};
use crate::error::{Result, StoreError};
use crate::group::Group;
use crate::schema::Schema;
use crate::value::RowKey;
use crate::version::VersionId;

type TransactionCallback = Box<dyn Fn(VersionId, VersionId) + Send>;
type TableObserverFn = Box<dyn Fn(&Group, &ChangeSet) + Send>;
type RowObserverFn = Box<dyn FnMut(&Group, &RowChange) -> ObserverControl + Send>;

/// What a row observer wants to happen to itself after a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverControl {
    /// Keep observing.
    Keep,
    /// Detach; the observer will not be invoked again.
    Detach,
}

/// Change delivered to a row observer.
#[derive(Debug)]
pub struct RowChange {
    /// Current index of the observed row in the new snapshot, or `None` if
    /// the row was deleted by this commit.
    pub index: Option<usize>,
    /// Columns that changed, as indices into the table's column list.
    pub columns: SmallVec<[usize; 4]>,
}

struct TableObserver {
    id: u64,
    table: String,
    callback: TableObserverFn,
}

struct RowObserver {
    id: u64,
    table: String,
    key: RowKey,
    callback: RowObserverFn,
}

#[derive(Default)]
struct CallbackState {
    transaction: Option<TransactionCallback>,
    tables: Vec<TableObserver>,
    rows: Vec<RowObserver>,
    next_id: u64,
}

struct CoordState {
    schema: Schema,
    current: u64,
    versions: BTreeMap<u64, Arc<Group>>,
}

/// Per-file singleton that serializes write commits and fans out commit
/// callbacks to observers.
pub struct Coordinator {
    path: PathBuf,
    sync: Option<SyncConfig>,
    commit_lock: Mutex<()>,
    state: RwLock<CoordState>,
    callbacks: Mutex<CallbackState>,
}

fn registry() -> &'static Mutex<FxHashMap<PathBuf, Weak<Coordinator>>> {
    static REGISTRY: OnceLock<Mutex<FxHashMap<PathBuf, Weak<Coordinator>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(FxHashMap::default()))
}

/// Materializes the backing file and resolves the coordinator identity.
fn ensure_file(path: &Path) -> Result<PathBuf> {
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    Ok(std::fs::canonicalize(path)?)
}

impl Coordinator {
    /// Returns the shared coordinator for the file named by `config`,
    /// creating it (and the backing file) on first use.
    ///
    /// All handles opened on the same canonical path share one coordinator;
    /// the sync binding of the first open wins.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the backing file cannot be created or
    /// resolved.
    pub fn for_config(config: &StoreConfig) -> Result<Arc<Self>> {
        let path = ensure_file(&config.path)?;
        let mut reg = registry().lock();
        if let Some(existing) = reg.get(&path).and_then(Weak::upgrade) {
            return Ok(existing);
        }
        let coordinator = Arc::new(Self {
            path: path.clone(),
            sync: config.sync.clone(),
            commit_lock: Mutex::new(()),
            state: RwLock::new(CoordState {
                schema: Schema::default(),
                current: 1,
                versions: BTreeMap::from([(1, Arc::new(Group::default()))]),
            }),
            callbacks: Mutex::new(CallbackState::default()),
        });
        reg.retain(|_, weak| weak.strong_count() > 0);
        reg.insert(path, Arc::downgrade(&coordinator));
        Ok(coordinator)
    }

    /// Returns the handle configuration for this file: canonical path and
    /// sync binding, with no schema.
    #[must_use]
    pub fn get_config(&self) -> StoreConfig {
        StoreConfig {
            path: self.path.clone(),
            schema: None,
            sync: self.sync.clone(),
        }
    }

    /// Latest committed version.
    #[must_use]
    pub fn current_version(&self) -> VersionId {
        VersionId::new(self.state.read().current)
    }

    /// Copy of the canonical schema.
    #[must_use]
    pub fn schema(&self) -> Schema {
        self.state.read().schema.clone()
    }

    /// Installs the transaction callback, replacing any previous one.
    ///
    /// The callback is invoked with `(old, new)` versions on every commit,
    /// on the committing thread, under the coordinator's commit lock. It
    /// must be cheap: nothing heavier than taking a queue lock.
    pub fn set_transaction_callback(
        &self,
        callback: impl Fn(VersionId, VersionId) + Send + 'static,
    ) {
        self.callbacks.lock().transaction = Some(Box::new(callback));
    }

    /// Installs a collection observer on the named table.
    ///
    /// On every commit the observer receives the new snapshot and the
    /// table's change-set for that commit (possibly empty). Dropping the
    /// returned token detaches the observer.
    pub fn observe_table(
        self: &Arc<Self>,
        table: &str,
        callback: impl Fn(&Group, &ChangeSet) + Send + 'static,
    ) -> ObserverToken {
        let mut cbs = self.callbacks.lock();
        let id = cbs.fresh_id();
        cbs.tables.push(TableObserver {
            id,
            table: table.to_string(),
            callback: Box::new(callback),
        });
        ObserverToken::new(id, self)
    }

    /// Installs a collection observer and returns the current snapshot,
    /// atomically with respect to commits.
    ///
    /// Rows present in the returned snapshot will never also be reported as
    /// insertions to the observer, and rows committed afterwards always
    /// will: the install and the snapshot happen under the commit lock.
    pub fn observe_table_from(
        self: &Arc<Self>,
        table: &str,
        callback: impl Fn(&Group, &ChangeSet) + Send + 'static,
    ) -> Result<(ObserverToken, Arc<Group>)> {
        let _commit = self.commit_lock.lock();
        let (_, group) = self.snapshot_at(None)?;
        Ok((self.observe_table(table, callback), group))
    }

    /// Installs an observer on one row, identified by its stable key.
    ///
    /// The observer fires when the row's values change or the row is
    /// deleted, and controls its own lifetime through the returned
    /// [`ObserverControl`].
    pub fn observe_row(
        self: &Arc<Self>,
        table: &str,
        key: RowKey,
        callback: impl FnMut(&Group, &RowChange) -> ObserverControl + Send + 'static,
    ) -> ObserverToken {
        let mut cbs = self.callbacks.lock();
        let id = cbs.fresh_id();
        cbs.rows.push(RowObserver {
            id,
            table: table.to_string(),
            key,
            callback: Box::new(callback),
        });
        ObserverToken::new(id, self)
    }

    /// Detaches the observer with the given raw id, if still attached.
    pub fn detach_observer(&self, id: u64) {
        let mut cbs = self.callbacks.lock();
        cbs.tables.retain(|o| o.id != id);
        cbs.rows.retain(|o| o.id != id);
    }

    /// Snapshot at `version`, or at the latest committed version for `None`.
    pub(crate) fn snapshot_at(&self, version: Option<VersionId>) -> Result<(VersionId, Arc<Group>)> {
        let state = self.state.read();
        let raw = version.map_or(state.current, VersionId::raw);
        state
            .versions
            .get(&raw)
            .map(|group| (VersionId::new(raw), Arc::clone(group)))
            .ok_or(StoreError::InvalidVersion(VersionId::new(raw)))
    }

    /// Applies `desired` additively, committing a new version if anything
    /// was added. Used at handle open.
    pub(crate) fn apply_schema(&self, desired: &Schema) -> Result<()> {
        let (guard, mut group, mut schema) = self.begin_staged()?;
        if !schema.merge_additive(desired)? {
            return Ok(());
        }
        for table in schema.tables() {
            group.ensure_table(&table.name, &table.columns)?;
        }
        let (old_v, new_v, old_group, new_group) = self.install_commit(group, schema);
        self.finish_commit(old_v, new_v, &old_group, &new_group);
        drop(guard);
        Ok(())
    }

    /// Takes the commit lock and stages deep copies of the current group and
    /// schema for a write transaction.
    pub(crate) fn begin_staged(&self) -> Result<(MutexGuard<'_, ()>, Group, Schema)> {
        let guard = self.commit_lock.lock();
        let state = self.state.read();
        let group = state
            .versions
            .get(&state.current)
            .map(|g| (**g).clone())
            .ok_or(StoreError::InvalidVersion(VersionId::new(state.current)))?;
        let schema = state.schema.clone();
        drop(state);
        Ok((guard, group, schema))
    }

    /// Installs the staged group as the next version. Caller must hold the
    /// commit lock.
    pub(crate) fn install_commit(
        &self,
        group: Group,
        schema: Schema,
    ) -> (VersionId, VersionId, Arc<Group>, Arc<Group>) {
        let mut state = self.state.write();
        let old_raw = state.current;
        let old_group = state
            .versions
            .get(&old_raw)
            .cloned()
            .unwrap_or_default();
        let new_raw = old_raw + 1;
        let new_group = Arc::new(group);
        state.versions.insert(new_raw, Arc::clone(&new_group));
        state.current = new_raw;
        state.schema = schema;
        (
            VersionId::new(old_raw),
            VersionId::new(new_raw),
            old_group,
            new_group,
        )
    }

    /// Fans the commit out to the transaction callback and observers.
    /// Caller must hold the commit lock; the state lock is not held here.
    pub(crate) fn finish_commit(
        &self,
        old_version: VersionId,
        new_version: VersionId,
        old_group: &Arc<Group>,
        new_group: &Arc<Group>,
    ) {
        let changesets = diff_groups(old_group, new_group);
        let mut cbs = self.callbacks.lock();

        if let Some(transaction) = &cbs.transaction {
            transaction(old_version, new_version);
        }

        for observer in &cbs.tables {
            if let Some(idx) = new_group.table_index(&observer.table) {
                (observer.callback)(new_group, &changesets[idx]);
            }
        }

        let mut detached: Vec<u64> = Vec::new();
        for observer in &mut cbs.rows {
            let Some(change) = row_change_for(observer, old_group, new_group, &changesets) else {
                continue;
            };
            if (observer.callback)(new_group, &change) == ObserverControl::Detach {
                detached.push(observer.id);
            }
        }
        if !detached.is_empty() {
            debug!(count = detached.len(), path = %self.path.display(), "row observers detached");
            cbs.rows.retain(|o| !detached.contains(&o.id));
        }
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("path", &self.path)
            .field("current", &self.state.read().current)
            .finish_non_exhaustive()
    }
}

impl CallbackState {
    fn fresh_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Computes the [`RowChange`] for one row observer, or `None` if the
/// observed row was untouched by this commit.
fn row_change_for(
    observer: &RowObserver,
    old_group: &Group,
    new_group: &Group,
    changesets: &[ChangeSet],
) -> Option<RowChange> {
    match new_group.table_index(&observer.table) {
        Some(table_idx) => {
            let table = new_group.table_at(table_idx)?;
            match table.index_of_key(observer.key) {
                Some(row_idx) => {
                    let changes = &changesets[table_idx];
                    if changes.modifications.contains(&row_idx) {
                        Some(RowChange {
                            index: Some(row_idx),
                            columns: changes
                                .columns_modified
                                .get(&row_idx)
                                .cloned()
                                .unwrap_or_default(),
                        })
                    } else {
                        None
                    }
                }
                None => deleted_change(observer, old_group),
            }
        }
        None => deleted_change(observer, old_group),
    }
}

fn deleted_change(observer: &RowObserver, old_group: &Group) -> Option<RowChange> {
    old_group
        .table_by_name(&observer.table)
        .and_then(|t| t.index_of_key(observer.key))
        .map(|_| RowChange {
            index: None,
            columns: SmallVec::new(),
        })
}

/// Cleanup handle for an observer registration.
///
/// Dropping the token detaches the observer. [`ObserverToken::release`]
/// defuses that, leaving the observer attached and owned by the coordinator
/// (self-detaching observers use this together with
/// [`Coordinator::detach_observer`]).
#[derive(Debug)]
pub struct ObserverToken {
    id: u64,
    coordinator: Weak<Coordinator>,
    armed: bool,
}

impl ObserverToken {
    fn new(id: u64, coordinator: &Arc<Coordinator>) -> Self {
        Self {
            id,
            coordinator: Arc::downgrade(coordinator),
            armed: true,
        }
    }

    /// Defuses automatic detach, returning the raw observer id.
    #[must_use]
    pub fn release(mut self) -> u64 {
        self.armed = false;
        self.id
    }
}

impl Drop for ObserverToken {
    fn drop(&mut self) {
        if self.armed {
            if let Some(coordinator) = self.coordinator.upgrade() {
                coordinator.detach_observer(self.id);
            }
        }
    }
}
