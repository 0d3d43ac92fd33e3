//! Admin feed: discovery of managed database files.
//!
//! The admin database enumerates the fleet in a single `RealmFile` table
//! (`id` unique, `path`). It is written only by an external process; this
//! side treats it as read-only and insertion-only. The feed delivers every
//! existing row once at [`AdminFeed::start`], then only rows appearing in
//! `insertions` on later commits.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, info};

use ripple_store::{
    ColumnType, Database, ObserverToken, Schema, StoreConfig, SyncConfig, TableDef, Value,
};

use crate::error::Result;

/// The administrative object type enumerating managed files.
const ADMIN_TYPE: &str = "RealmFile";

fn admin_schema() -> Schema {
    Schema::new(vec![TableDef::new(ADMIN_TYPE)
        .with_column("id", ColumnType::String)
        .with_column("path", ColumnType::String)])
}

/// Reads the `(id, path)` pair at `row`, if both columns hold strings.
fn entry_at(table: &ripple_store::TableData, row: usize) -> Option<(&str, &str)> {
    let id_col = table.column_index("id")?;
    let path_col = table.column_index("path")?;
    Some((
        table.get(row, id_col).and_then(Value::as_str)?,
        table.get(row, path_col).and_then(Value::as_str)?,
    ))
}

/// Watches the admin database and emits `(id, path)` discoveries.
pub struct AdminFeed {
    realms_dir: PathBuf,
    server_base_url: String,
    access_token: String,
    admin_db: Mutex<Database>,
    token: Mutex<Option<ObserverToken>>,
}

impl AdminFeed {
    /// Opens the feed rooted at `local_root`.
    ///
    /// Ensures `<local_root>/realms/` exists and opens the admin database at
    /// `<local_root>/admin.db`, bound to `<server_base_url>/admin` with an
    /// additive `RealmFile` schema.
    ///
    /// # Errors
    ///
    /// Fatal: failure to create the realms directory or to open the admin
    /// database.
    pub fn new(local_root: &Path, server_base_url: &str, access_token: &str) -> Result<Self> {
        let realms_dir = local_root.join("realms");
        std::fs::create_dir_all(&realms_dir).map_err(ripple_store::StoreError::Io)?;

        let config = StoreConfig {
            path: local_root.join("admin.db"),
            schema: Some(admin_schema()),
            sync: Some(SyncConfig {
                server_url: format!("{server_base_url}/admin"),
                access_token: access_token.to_string(),
                partial: false,
            }),
        };
        let admin_db = Database::open(config)?;
        info!(root = %local_root.display(), "admin feed opened");

        Ok(Self {
            realms_dir,
            server_base_url: server_base_url.to_string(),
            access_token: access_token.to_string(),
            admin_db: Mutex::new(admin_db),
            token: Mutex::new(None),
        })
    }

    /// Starts the feed.
    ///
    /// `callback(id, path)` is invoked once for every row already present
    /// (the bulk enumeration), then once per inserted row on every later
    /// commit. Modifications and deletions are ignored by policy: admin
    /// entries are append-only.
    ///
    /// # Errors
    ///
    /// Propagates storage failures from installing the observer.
    pub fn start(&self, callback: impl Fn(&str, &str) + Send + Sync + 'static) -> Result<()> {
        let callback = std::sync::Arc::new(callback);
        let coordinator = std::sync::Arc::clone(self.admin_db.lock().coordinator());

        let feed = {
            let callback = std::sync::Arc::clone(&callback);
            move |group: &ripple_store::Group, changes: &ripple_store::ChangeSet| {
                let Some(table) = group.table_by_name(ADMIN_TYPE) else {
                    return;
                };
                for &row in &changes.insertions {
                    if let Some((id, path)) = entry_at(table, row) {
                        callback(id, path);
                    }
                }
            }
        };
        let (token, snapshot) = coordinator.observe_table_from(ADMIN_TYPE, feed)?;

        // Bulk enumeration of the snapshot taken atomically with the
        // observer install: rows present here are delivered exactly once,
        // before any per-insertion delivery.
        if let Some(table) = snapshot.table_by_name(ADMIN_TYPE) {
            debug!(rows = table.len(), "admin feed bulk enumeration");
            for row in 0..table.len() {
                if let Some((id, path)) = entry_at(table, row) {
                    callback(id, path);
                }
            }
        }

        *self.token.lock() = Some(token);
        Ok(())
    }

    /// Stops the feed, releasing the admin observer.
    pub fn stop(&self) {
        *self.token.lock() = None;
    }

    /// Builds the sync configuration for a managed file: local path
    /// `<local_root>/realms/<id>.db`, remote `<server_base_url>/<name>`,
    /// additive schema, same access token.
    #[must_use]
    pub fn get_config(&self, id: &str, name: &str) -> StoreConfig {
        StoreConfig {
            path: self.realms_dir.join(format!("{id}.db")),
            schema: None,
            sync: Some(SyncConfig {
                server_url: format!("{}/{name}", self.server_base_url),
                access_token: self.access_token.clone(),
                partial: false,
            }),
        }
    }

    /// Inserts an admin entry in a single write transaction.
    ///
    /// Exists for tests and administrative clients; the notifier itself
    /// never writes the admin database.
    ///
    /// # Errors
    ///
    /// Propagates storage failures from the write transaction.
    pub fn create_realm(&self, id: &str, name: &str) -> Result<()> {
        let mut db = self.admin_db.lock();
        let mut txn = db.begin_write()?;
        let row = txn.insert_row(ADMIN_TYPE)?;
        txn.set(ADMIN_TYPE, row, "id", Value::String(id.to_string()))?;
        txn.set(ADMIN_TYPE, row, "path", Value::String(name.to_string()))?;
        txn.commit()?;
        debug!(id, name, "admin entry created");
        Ok(())
    }
}

impl std::fmt::Debug for AdminFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminFeed")
            .field("realms_dir", &self.realms_dir)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex as PlMutex;
    use tempfile::tempdir;

    use ripple_store::StoreConfig;

    fn collector() -> (Arc<PlMutex<Vec<(String, String)>>>, impl Fn(&str, &str) + Send + 'static)
    {
        let seen: Arc<PlMutex<Vec<(String, String)>>> = Arc::default();
        let sink = Arc::clone(&seen);
        (seen, move |id: &str, path: &str| {
            sink.lock().push((id.to_string(), path.to_string()));
        })
    }

    #[test]
    fn test_admin_feed_creates_layout() {
        let root = tempdir().unwrap();
        let _feed = AdminFeed::new(root.path(), "ripple://server", "token").unwrap();
        assert!(root.path().join("realms").is_dir());
        assert!(root.path().join("admin.db").exists());
    }

    #[test]
    fn test_admin_feed_get_config_shape() {
        let root = tempdir().unwrap();
        let feed = AdminFeed::new(root.path(), "ripple://server", "token").unwrap();
        let config = feed.get_config("abc", "team/project");
        assert_eq!(config.path, root.path().join("realms").join("abc.db"));
        assert!(config.schema.is_none());
        let sync = config.sync.unwrap();
        assert_eq!(sync.server_url, "ripple://server/team/project");
        assert_eq!(sync.access_token, "token");
    }

    #[test]
    fn test_admin_feed_bulk_then_insertions() {
        let root = tempdir().unwrap();
        let feed = AdminFeed::new(root.path(), "ripple://server", "token").unwrap();
        feed.create_realm("a", "alpha").unwrap();
        feed.create_realm("b", "beta").unwrap();

        let (seen, callback) = collector();
        feed.start(callback).unwrap();

        // Existing rows delivered once, in table order, before anything else.
        assert_eq!(
            *seen.lock(),
            vec![
                ("a".to_string(), "alpha".to_string()),
                ("b".to_string(), "beta".to_string())
            ]
        );

        feed.create_realm("c", "gamma").unwrap();
        assert_eq!(seen.lock().len(), 3);
        assert_eq!(seen.lock()[2], ("c".to_string(), "gamma".to_string()));
    }

    #[test]
    fn test_admin_feed_ignores_modifications_and_deletions() {
        let root = tempdir().unwrap();
        let feed = AdminFeed::new(root.path(), "ripple://server", "token").unwrap();
        feed.create_realm("a", "alpha").unwrap();

        let (seen, callback) = collector();
        feed.start(callback).unwrap();
        assert_eq!(seen.lock().len(), 1);

        // An out-of-band writer mutates and then deletes the row; the feed
        // treats the table as append-only and reports neither.
        let mut raw =
            Database::open(StoreConfig::with_path(root.path().join("admin.db"))).unwrap();
        let mut txn = raw.begin_write().unwrap();
        txn.set("RealmFile", 0, "path", Value::String("renamed".into()))
            .unwrap();
        txn.commit().unwrap();

        let mut txn = raw.begin_write().unwrap();
        txn.remove_row("RealmFile", 0).unwrap();
        txn.commit().unwrap();

        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_admin_feed_stop_releases_observer() {
        let root = tempdir().unwrap();
        let feed = AdminFeed::new(root.path(), "ripple://server", "token").unwrap();
        let (seen, callback) = collector();
        feed.start(callback).unwrap();
        feed.stop();

        feed.create_realm("a", "alpha").unwrap();
        assert!(seen.lock().is_empty());
    }
}
