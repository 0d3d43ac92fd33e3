//! Error types for the notifier.

use ripple_store::StoreError;

/// Result type for notifier operations.
pub type Result<T> = std::result::Result<T, NotifierError>;

/// Errors from the global notifier and the subscription registrar.
#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    /// A partial-sync operation was attempted on a database whose sync
    /// configuration is absent or not partial.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// An object class is not present in the active schema.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Propagated storage-engine failure.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// A subscription reached a terminal non-success status; carries the
    /// server's error message.
    #[error("subscription failed: {0}")]
    SubscriptionFailed(String),
}
