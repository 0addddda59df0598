use postbox_shared::{CursorError, IdentityError, UserRef};
use thiserror::Error;
use uuid::Uuid;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backing SQLite call failed (locked past the busy timeout, I/O,
    /// constraint, corrupt row). Safe for the caller to retry.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] rusqlite::Error),

    /// A lookup by id missed.
    #[error("Message not found: {0}")]
    NotFound(Uuid),

    /// A mutation was attempted by someone other than the owning recipient.
    #[error("Forbidden: {requester} does not own message {id}")]
    Forbidden { id: Uuid, requester: UserRef },

    /// A pagination token could not be decoded.
    #[error("Invalid cursor: {0}")]
    InvalidCursor(#[from] CursorError),

    /// A compose destination names neither a user nor a group.
    #[error("Invalid destination: {0:?}")]
    InvalidDestination(String),

    /// A stored or supplied identity was rejected.
    #[error("Invalid identity: {0}")]
    InvalidIdentity(#[from] IdentityError),

    /// Stored JSON (group memberships) could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// A thread panicked while holding the connection or a user lock.
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

impl StoreError {
    /// Whether the caller may reasonably retry the same operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::StorageUnavailable(_))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_storage_errors_are_retryable() {
        let busy = StoreError::StorageUnavailable(rusqlite::Error::InvalidQuery);
        assert!(busy.is_retryable());
        assert!(!StoreError::NotFound(Uuid::nil()).is_retryable());
        assert!(!StoreError::InvalidCursor(CursorError::InvalidFormat).is_retryable());
    }
}
