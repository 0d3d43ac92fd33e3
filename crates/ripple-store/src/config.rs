//! Database handle configuration.

use std::path::PathBuf;

use crate::schema::Schema;

/// Remote-sync binding for a database file.
///
/// Carried as configuration identity only; the sync wire protocol itself is
/// an external collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Server endpoint this file is bound to.
    pub server_url: String,
    /// Access token presented to the server.
    pub access_token: String,
    /// Whether the file syncs in partial mode (query-based replication).
    pub partial: bool,
}

/// Configuration for opening a [`Database`](crate::Database) handle.
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    /// Path of the backing file; also the coordinator identity.
    pub path: PathBuf,
    /// Schema to apply additively at open, if any.
    pub schema: Option<Schema>,
    /// Optional remote-sync binding.
    pub sync: Option<SyncConfig>,
}

impl StoreConfig {
    /// Creates a configuration for a local file with no schema and no sync.
    #[must_use]
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            schema: None,
            sync: None,
        }
    }
}
