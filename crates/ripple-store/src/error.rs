//! Error types for store operations.

use crate::version::VersionId;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors from storage primitives.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem error while creating or resolving a database file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Schema reconciliation failed (non-additive change requested).
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// The named table does not exist.
    #[error("no such table '{0}'")]
    NoSuchTable(String),

    /// The named column does not exist in the table.
    #[error("no such column '{0}'")]
    NoSuchColumn(String),

    /// A value was written or read with the wrong type for its column.
    #[error("type mismatch for column '{0}'")]
    TypeMismatch(String),

    /// The row index is out of bounds for the table.
    #[error("row index {0} out of bounds")]
    RowOutOfBounds(usize),

    /// The requested version is not available from the coordinator.
    #[error("version {0} is not available")]
    InvalidVersion(VersionId),

    /// An operation required an active read transaction and none was open.
    #[error("no active read transaction")]
    NoReadTransaction,

    /// A read transaction cannot move backwards.
    #[error("cannot advance read transaction from {from} back to {to}")]
    VersionRegression {
        /// Version the read transaction is currently pinned at.
        from: VersionId,
        /// Requested (older) target version.
        to: VersionId,
    },
}
