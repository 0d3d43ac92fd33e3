//! Delivered change notifications.

use fxhash::FxHashMap;

use ripple_store::{ChangeSet, Database, VersionId};

use crate::error::Result;

/// One delivered change for one watched file.
///
/// Invariants: `new_version` is a valid version; when `old_version` is set,
/// `old_version <= new_version`; `changes` contains only non-empty entries.
/// The carried handle is pinned at `old_version` (or unpinned for a
/// registration seed) and is sufficient to re-open snapshots at either side.
pub struct ChangeNotification {
    old_version: Option<VersionId>,
    new_version: VersionId,
    database: Database,
    changes: FxHashMap<String, ChangeSet>,
}

impl ChangeNotification {
    pub(crate) fn new(
        old_version: Option<VersionId>,
        new_version: VersionId,
        database: Database,
        changes: FxHashMap<String, ChangeSet>,
    ) -> Self {
        Self {
            old_version,
            new_version,
            database,
            changes,
        }
    }

    /// Version the change started from; `None` for a registration seed.
    #[must_use]
    pub fn old_version(&self) -> Option<VersionId> {
        self.old_version
    }

    /// Version the change arrived at.
    #[must_use]
    pub fn new_version(&self) -> VersionId {
        self.new_version
    }

    /// Per-object-type change-sets; only non-empty entries are present.
    #[must_use]
    pub fn changes(&self) -> &FxHashMap<String, ChangeSet> {
        &self.changes
    }

    /// Path of the watched file this notification describes.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.database.config().path
    }

    /// Opens a fresh uncached handle pinned at the old version.
    ///
    /// Returns `None` when the notification is a registration seed (no old
    /// side). Each call opens a new handle; the caller owns its scope.
    ///
    /// # Errors
    ///
    /// Propagates storage failures from opening or pinning the handle.
    pub fn get_old_snapshot(&self) -> Result<Option<Database>> {
        let Some(old) = self.old_version else {
            return Ok(None);
        };
        let mut db = Database::open(self.database.config().clone())?;
        db.begin_read(Some(old))?;
        Ok(Some(db))
    }

    /// Opens a fresh uncached handle pinned at the new version.
    ///
    /// # Errors
    ///
    /// Propagates storage failures from opening or pinning the handle.
    pub fn get_new_snapshot(&self) -> Result<Database> {
        let mut db = Database::open(self.database.config().clone())?;
        db.begin_read(Some(self.new_version))?;
        Ok(db)
    }
}

impl std::fmt::Debug for ChangeNotification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotification")
            .field("old", &self.old_version)
            .field("new", &self.new_version)
            .field("tables", &self.changes.len())
            .finish_non_exhaustive()
    }
}
