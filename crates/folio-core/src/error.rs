//! Error types for folio.

use thiserror::Error;

/// Result type alias using folio's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// PostgreSQL SQLSTATE codes that indicate the transaction lost a lock race
/// and can be re-run from the start.
const RETRYABLE_SQLSTATES: &[&str] = &[
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "55P03", // lock_not_available (lock_timeout)
];

/// Core error type for folio operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Document not found
    #[error("Document not found: {0}")]
    DocumentNotFound(uuid::Uuid),

    /// Collection not found
    #[error("Collection not found: {0}")]
    CollectionNotFound(uuid::Uuid),

    /// Insert targeted a parent node that is not part of the structure
    #[error("Parent document not found in collection structure: {0}")]
    ParentNotFound(uuid::Uuid),

    /// A structural precondition was violated
    #[error("Validation error: {0}")]
    Validation(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Concurrent writers kept colliding on the same key
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Forbidden (authenticated but not authorized)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the failure came from lock contention and the whole transaction
    /// may be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::Database(db_err)) => db_err
                .code()
                .map(|code| RETRYABLE_SQLSTATES.iter().any(|state| code == *state))
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Whether the error is the caller's fault (4xx semantics).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_)
                | Error::DocumentNotFound(_)
                | Error::CollectionNotFound(_)
                | Error::ParentNotFound(_)
                | Error::Validation(_)
                | Error::InvalidInput(_)
                | Error::Conflict(_)
                | Error::Forbidden(_)
        )
    }

    /// Whether the database reported a unique constraint violation.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::Database(db_err)) => db_err.is_unique_violation(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_error_display_document_not_found() {
        let id = Uuid::nil();
        let err = Error::DocumentNotFound(id);
        assert_eq!(err.to_string(), format!("Document not found: {}", id));
    }

    #[test]
    fn test_error_display_parent_not_found() {
        let id = Uuid::new_v4();
        let err = Error::ParentNotFound(id);
        assert!(err.to_string().contains(&id.to_string()));
        assert!(err.to_string().starts_with("Parent document not found"));
    }

    #[test]
    fn test_error_display_validation() {
        let err = Error::Validation("index out of range".to_string());
        assert_eq!(err.to_string(), "Validation error: index out of range");
    }

    #[test]
    fn test_client_errors() {
        assert!(Error::Validation("x".into()).is_client_error());
        assert!(Error::ParentNotFound(Uuid::nil()).is_client_error());
        assert!(Error::Forbidden("x".into()).is_client_error());
        assert!(!Error::Internal("x".into()).is_client_error());
        assert!(!Error::Database(sqlx::Error::RowNotFound).is_client_error());
    }

    #[test]
    fn test_non_database_errors_are_not_retryable() {
        assert!(!Error::Validation("x".into()).is_retryable());
        assert!(!Error::Database(sqlx::Error::RowNotFound).is_retryable());
        assert!(!Error::Database(sqlx::Error::PoolTimedOut).is_unique_violation());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
