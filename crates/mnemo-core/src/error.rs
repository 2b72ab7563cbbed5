//! Engine Error Types
//!
//! Defines error types for the mnemo memory engine.

use thiserror::Error;

/// Engine Result type alias
pub type MnemoResult<T> = Result<T, MnemoError>;

/// Engine errors
#[derive(Debug, Error)]
pub enum MnemoError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigValidationError),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Write-integrity violation detected before reaching SQLite
    #[error("integrity violation: {message}")]
    Integrity { message: String },

    /// Entry not found
    #[error("{entity_type} not found: {id}")]
    NotFound { entity_type: String, id: String },

    /// Invalid operation
    #[error("invalid operation: {message}")]
    InvalidOperation { message: String },

    /// Search backend failure
    #[error("{backend} backend error: {message}")]
    Backend { backend: String, message: String },

    /// Timeout error
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl MnemoError {
    /// Create an integrity error
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(entity_type: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.to_string(),
        }
    }

    /// Create an invalid operation error
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Create a backend error
    pub fn backend(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Check if this error is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this error is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Foreign-key, unique and check constraint failures.
    ///
    /// These point at a caller bug and are always surfaced.
    pub fn is_integrity_violation(&self) -> bool {
        match self {
            Self::Integrity { .. } => true,
            Self::Database(rusqlite::Error::SqliteFailure(err, _)) => {
                err.code == rusqlite::ErrorCode::ConstraintViolation
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = MnemoError::not_found("Observation", 42);
        assert!(err.is_not_found());
        assert!(err.to_string().contains("Observation"));
        assert!(err.to_string().contains("42"));

        let err = MnemoError::timeout(5000);
        assert!(err.is_timeout());
        assert!(err.to_string().contains("5000"));

        let err = MnemoError::backend("vector", "connection refused");
        assert_eq!(err.to_string(), "vector backend error: connection refused");
    }

    #[test]
    fn test_integrity_detection() {
        assert!(MnemoError::integrity("dup").is_integrity_violation());
        assert!(!MnemoError::invalid_operation("nope").is_integrity_violation());

        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (k TEXT UNIQUE); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err: MnemoError = conn
            .execute("INSERT INTO t VALUES ('a')", [])
            .unwrap_err()
            .into();
        assert!(err.is_integrity_violation());
    }
}
