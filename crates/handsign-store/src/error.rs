//! Error types for handsign-store

use thiserror::Error;

/// Errors returned by blob stores and model registries.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Object or record does not exist
    #[error("not found: {key}")]
    NotFound { key: String },

    /// A record with the same key is already registered
    #[error("already exists: {key}")]
    AlreadyExists { key: String },

    /// Retryable failure that persisted after the retry budget was spent
    #[error("transient failure for {key} after {attempts} attempt(s): {reason}")]
    Transient {
        key: String,
        attempts: u32,
        reason: String,
    },

    /// Object key that cannot be mapped onto the backend
    #[error("invalid object key: {key}")]
    InvalidKey { key: String },

    /// Digest string that is not 64-char hex
    #[error("invalid digest: {digest}")]
    InvalidDigest { digest: String },

    /// Any other backend failure (database, HTTP status, ...)
    #[error("backend error: {0}")]
    Backend(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// Whether this error means the requested object is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    /// Whether this error is a transient I/O failure (retry budget exhausted).
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Transient { .. })
    }
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display_contains_key() {
        let err = StorageError::NotFound {
            key: "models/abc.zip".to_string(),
        };
        assert!(err.to_string().contains("models/abc.zip"));
        assert!(err.is_not_found());
        assert!(!err.is_transient());
    }

    #[test]
    fn transient_reports_attempts() {
        let err = StorageError::Transient {
            key: "k".to_string(),
            attempts: 3,
            reason: "connection reset".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("3 attempt"));
        assert!(msg.contains("connection reset"));
        assert!(err.is_transient());
    }
}
