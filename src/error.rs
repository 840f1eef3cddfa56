//! Error types for filevault.

use thiserror::Error;

/// Common error type for filevault.
#[derive(Error, Debug)]
pub enum VaultError {
    /// Database error.
    ///
    /// Errors from sqlx are converted into this variant automatically.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error from the blob store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The caller does not own the resource.
    #[error("permission denied: {0}")]
    Permission(String),

    /// Validation error for caller input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found (or not visible to the requesting user).
    #[error("{0} not found")]
    NotFound(String),

    /// Duplicate name or protected-root violation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Upload would exceed the user's storage quota.
    #[error("storage quota exceeded: required {required} bytes, available {available} bytes")]
    QuotaExceeded {
        quota: i64,
        used: i64,
        available: i64,
        required: i64,
    },

    /// Uploaded content failed verification (hash mismatch, incomplete chunk set).
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl VaultError {
    /// Stable machine-readable kind, for callers that map errors onto responses.
    pub fn kind(&self) -> &'static str {
        match self {
            VaultError::NotFound(_) => "not_found",
            VaultError::Conflict(_) => "conflict",
            VaultError::QuotaExceeded { .. } => "quota_exceeded",
            VaultError::Integrity(_) => "integrity",
            VaultError::Validation(_) => "validation",
            VaultError::Permission(_) => "permission",
            VaultError::Database(_) | VaultError::Io(_) | VaultError::Config(_) => "internal",
        }
    }
}

impl From<sqlx::Error> for VaultError {
    fn from(e: sqlx::Error) -> Self {
        VaultError::Database(e.to_string())
    }
}

/// Result type alias for filevault operations.
pub type Result<T> = std::result::Result<T, VaultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_error_display() {
        let err = VaultError::Permission("upload session belongs to another user".to_string());
        assert_eq!(
            err.to_string(),
            "permission denied: upload session belongs to another user"
        );
    }

    #[test]
    fn test_not_found_error_display() {
        let err = VaultError::NotFound("folder".to_string());
        assert_eq!(err.to_string(), "folder not found");
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_quota_error_carries_numbers() {
        let err = VaultError::QuotaExceeded {
            quota: 100,
            used: 90,
            available: 10,
            required: 25,
        };
        assert_eq!(
            err.to_string(),
            "storage quota exceeded: required 25 bytes, available 10 bytes"
        );
        assert_eq!(err.kind(), "quota_exceeded");
    }

    #[test]
    fn test_integrity_error_display() {
        let err = VaultError::Integrity("not all chunks uploaded, uploaded 2/3".to_string());
        assert_eq!(
            err.to_string(),
            "integrity check failed: not all chunks uploaded, uploaded 2/3"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: VaultError = io_err.into();
        assert!(matches!(err, VaultError::Io(_)));
        assert!(err.to_string().contains("file not found"));
        assert_eq!(err.kind(), "internal");
    }

    #[test]
    fn test_result_alias() {
        fn sample_ok() -> Result<i32> {
            Ok(42)
        }

        fn sample_err() -> Result<i32> {
            Err(VaultError::Conflict("folder name already exists".to_string()))
        }

        assert_eq!(sample_ok().unwrap(), 42);
        assert!(sample_err().is_err());
    }
}
