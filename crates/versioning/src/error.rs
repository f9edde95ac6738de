//! Error types for the versioning engine.
//!
//! This module defines all error types used throughout the engine, following a
//! hierarchy that separates resource state errors, concurrency errors, identity
//! errors, validation errors, transaction errors and backend errors.
//!
//! Every error surfaced by a write is reported to the caller unmodified. The
//! [`StorageError::kind`] classification maps each variant onto the outcome
//! categories an API layer renders (not found, conflict, gone, ...).

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use std::fmt;

use thiserror::Error;

/// The primary error type for all engine operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Resource state errors
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Concurrency and versioning errors
    #[error(transparent)]
    Concurrency(#[from] ConcurrencyError),

    /// Identity resolution errors
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// Validation errors
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Transaction errors
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// Backend-specific errors
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Errors related to resource state.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// The requested resource was not found.
    #[error("resource not found: {resource_type}/{id}")]
    NotFound { resource_type: String, id: String },

    /// A resource with the given identity already exists.
    #[error("resource already exists: {resource_type}/{id}")]
    AlreadyExists { resource_type: String, id: String },

    /// The resource has been deleted.
    #[error("resource deleted: {resource_type}/{id}")]
    Gone {
        resource_type: String,
        id: String,
        deleted_at: Option<chrono::DateTime<chrono::Utc>>,
    },

    /// The requested version of the resource was not found.
    #[error("version {version} is not valid for resource {resource_type}/{id}")]
    VersionNotFound {
        resource_type: String,
        id: String,
        version: i64,
    },
}

/// Errors related to concurrency control.
#[derive(Error, Debug)]
pub enum ConcurrencyError {
    /// Version conflict detected during optimistic locking.
    #[error(
        "version conflict on {resource_type}/{id}: expected {expected_version}, found {actual_version}"
    )]
    VersionConflict {
        resource_type: String,
        id: String,
        expected_version: i64,
        actual_version: i64,
    },

    /// A patch named a version that is no longer the current one.
    #[error(
        "Version {version} is not the most recent version of this resource, unable to apply patch"
    )]
    StalePatch {
        resource_type: String,
        id: String,
        version: i64,
    },
}

/// Errors raised while resolving resource identities.
#[derive(Error, Debug)]
pub enum IdentityError {
    /// Two live identity records exist for the same key.
    #[error("non-unique identity: more than one resource exists for {resource_type}/{id}")]
    NonUnique { resource_type: String, id: String },

    /// The identity cache or map returned an internally inconsistent answer.
    #[error("identity for surrogate id {surrogate_id} is inconsistent: {message}")]
    Inconsistent { surrogate_id: i64, message: String },
}

/// Errors related to request and resource validation.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// The request is malformed.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// The resource content cannot be processed.
    #[error("unprocessable resource: {message}")]
    Unprocessable {
        message: String,
        details: Vec<ValidationDetail>,
    },

    /// Too many tags, security labels and profiles on a single resource.
    #[error(
        "Resource contains {count} meta entries (tag/profile/security label), maximum is {max}"
    )]
    TooManyMetaEntries { count: usize, max: usize },

    /// The id refers to a resource of a different type.
    #[error(
        "Existing resource ID[{resource_type}/{id}] is of type[{resource_type}] - Cannot update with [{incoming_type}]"
    )]
    TypeMismatch {
        resource_type: String,
        id: String,
        incoming_type: String,
    },
}

/// Detailed validation error information.
#[derive(Debug, Clone)]
pub struct ValidationDetail {
    /// The path to the element with the error.
    pub path: String,
    /// A human-readable error message.
    pub message: String,
    /// The severity of the issue.
    pub severity: ValidationSeverity,
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationSeverity {
    /// Fatal error - operation cannot proceed.
    Error,
    /// Warning - operation can proceed but with concerns.
    Warning,
    /// Informational - no action required.
    Information,
}

impl fmt::Display for ValidationSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationSeverity::Error => write!(f, "error"),
            ValidationSeverity::Warning => write!(f, "warning"),
            ValidationSeverity::Information => write!(f, "information"),
        }
    }
}

/// Errors related to transactions.
#[derive(Error, Debug)]
pub enum TransactionError {
    /// Transaction was rolled back.
    #[error("transaction rolled back: {reason}")]
    RolledBack { reason: String },

    /// Transaction is no longer valid (already committed or rolled back).
    #[error("transaction no longer valid")]
    InvalidTransaction,

    /// Conditional operation matched multiple resources.
    #[error("conditional {operation} matched {count} resources, expected at most 1")]
    MultipleMatches { operation: String, count: usize },
}

/// Errors originating from the database backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The backend is currently unavailable.
    #[error("backend unavailable: {backend_name}")]
    Unavailable {
        backend_name: String,
        message: String,
    },

    /// Connection to the backend failed.
    #[error("connection failed to {backend_name}: {message}")]
    ConnectionFailed {
        backend_name: String,
        message: String,
    },

    /// Connection pool exhausted.
    #[error("connection pool exhausted for {backend_name}")]
    PoolExhausted { backend_name: String },

    /// A uniqueness constraint rejected an insert.
    #[error("unique constraint violated in {backend_name}: {message}")]
    UniqueViolation {
        backend_name: String,
        message: String,
    },

    /// Schema migration error.
    #[error("schema migration failed: {message}")]
    MigrationError { message: String },

    /// Internal backend error.
    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {message}")]
    SerializationError { message: String },
}

/// Coarse classification of a [`StorageError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Identity or version could not be resolved.
    NotFound,
    /// Optimistic concurrency was violated.
    VersionConflict,
    /// Data-integrity anomaly in the identity map.
    NonUniqueIdentity,
    /// Malformed id, missing version component, disallowed client id.
    InvalidRequest,
    /// Validation, reference, tag-count or type-mismatch failure.
    Unprocessable,
    /// The resource is tombstoned.
    Gone,
    /// A conditional operation matched more than one resource.
    PreconditionFailed,
    /// Anything raised by the backend or transaction machinery.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not-found",
            ErrorKind::VersionConflict => "version-conflict",
            ErrorKind::NonUniqueIdentity => "non-unique-identity",
            ErrorKind::InvalidRequest => "invalid-request",
            ErrorKind::Unprocessable => "unprocessable",
            ErrorKind::Gone => "gone",
            ErrorKind::PreconditionFailed => "precondition-failed",
            ErrorKind::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

impl StorageError {
    /// Returns the classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::Resource(ResourceError::NotFound { .. })
            | StorageError::Resource(ResourceError::VersionNotFound { .. }) => ErrorKind::NotFound,
            StorageError::Resource(ResourceError::AlreadyExists { .. }) => ErrorKind::VersionConflict,
            StorageError::Resource(ResourceError::Gone { .. }) => ErrorKind::Gone,
            StorageError::Concurrency(_) => ErrorKind::VersionConflict,
            StorageError::Identity(IdentityError::NonUnique { .. }) => ErrorKind::NonUniqueIdentity,
            StorageError::Identity(IdentityError::Inconsistent { .. }) => ErrorKind::Internal,
            StorageError::Validation(ValidationError::InvalidRequest { .. }) => {
                ErrorKind::InvalidRequest
            }
            StorageError::Validation(_) => ErrorKind::Unprocessable,
            StorageError::Transaction(TransactionError::MultipleMatches { .. }) => {
                ErrorKind::PreconditionFailed
            }
            StorageError::Transaction(_) | StorageError::Backend(_) => ErrorKind::Internal,
        }
    }

    /// Returns `true` if the caller may retry the operation unchanged.
    ///
    /// Only transient backend conditions qualify; conflicts and identity
    /// anomalies need caller input.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StorageError::Backend(BackendError::Unavailable { .. })
                | StorageError::Backend(BackendError::PoolExhausted { .. })
                | StorageError::Backend(BackendError::ConnectionFailed { .. })
        )
    }

    /// Shorthand for an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        StorageError::Validation(ValidationError::InvalidRequest {
            message: message.into(),
        })
    }

    /// Shorthand for an unprocessable entity error without details.
    pub fn unprocessable(message: impl Into<String>) -> Self {
        StorageError::Validation(ValidationError::Unprocessable {
            message: message.into(),
            details: Vec::new(),
        })
    }

    /// Shorthand for a not-found error.
    pub fn not_found(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        StorageError::Resource(ResourceError::NotFound {
            resource_type: resource_type.into(),
            id: id.into(),
        })
    }

    /// Returns `true` if this error is a uniqueness violation from the backend.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StorageError::Backend(BackendError::UniqueViolation { .. }))
    }
}

/// Result type alias for engine operations.
pub type StorageResult<T> = Result<T, StorageError>;

// Implement conversions from common error types

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Backend(BackendError::SerializationError {
            message: err.to_string(),
        })
    }
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::Internal {
            backend_name: "codec".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(code, _) = &err {
            if code.code == rusqlite::ErrorCode::ConstraintViolation
                && (code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
            {
                return StorageError::Backend(BackendError::UniqueViolation {
                    backend_name: "sqlite".to_string(),
                    message: err.to_string(),
                });
            }
        }
        StorageError::Backend(BackendError::Internal {
            backend_name: "sqlite".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

#[cfg(feature = "sqlite")]
impl From<r2d2::Error> for StorageError {
    fn from(_err: r2d2::Error) -> Self {
        StorageError::Backend(BackendError::PoolExhausted {
            backend_name: "sqlite".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::not_found("Patient", "123");
        assert_eq!(err.to_string(), "resource not found: Patient/123");
    }

    #[test]
    fn test_concurrency_error_display() {
        let err = ConcurrencyError::VersionConflict {
            resource_type: "Patient".to_string(),
            id: "123".to_string(),
            expected_version: 1,
            actual_version: 2,
        };
        assert_eq!(
            err.to_string(),
            "version conflict on Patient/123: expected 1, found 2"
        );
    }

    #[test]
    fn test_meta_count_message() {
        let err = ValidationError::TooManyMetaEntries { count: 12, max: 10 };
        assert_eq!(
            err.to_string(),
            "Resource contains 12 meta entries (tag/profile/security label), maximum is 10"
        );
    }

    #[test]
    fn test_type_mismatch_message() {
        let err = ValidationError::TypeMismatch {
            resource_type: "Patient".to_string(),
            id: "abc".to_string(),
            incoming_type: "Observation".to_string(),
        };
        assert!(err.to_string().contains("Cannot update with [Observation]"));
    }

    #[test]
    fn test_error_kind_classification() {
        assert_eq!(StorageError::not_found("A", "1").kind(), ErrorKind::NotFound);
        assert_eq!(
            StorageError::invalid_request("bad").kind(),
            ErrorKind::InvalidRequest
        );
        assert_eq!(
            StorageError::unprocessable("bad").kind(),
            ErrorKind::Unprocessable
        );
        let non_unique: StorageError = IdentityError::NonUnique {
            resource_type: "A".to_string(),
            id: "x".to_string(),
        }
        .into();
        assert_eq!(non_unique.kind(), ErrorKind::NonUniqueIdentity);
        assert!(!non_unique.is_retryable());

        let multiple: StorageError = TransactionError::MultipleMatches {
            operation: "create".to_string(),
            count: 2,
        }
        .into();
        assert_eq!(multiple.kind(), ErrorKind::PreconditionFailed);
    }

    #[test]
    fn test_retryable_only_for_transient_backend_errors() {
        let pool: StorageError = BackendError::PoolExhausted {
            backend_name: "sqlite".to_string(),
        }
        .into();
        assert!(pool.is_retryable());

        let conflict: StorageError = ConcurrencyError::VersionConflict {
            resource_type: "A".to_string(),
            id: "1".to_string(),
            expected_version: 1,
            actual_version: 2,
        }
        .into();
        assert!(!conflict.is_retryable());
    }

    #[test]
    fn test_validation_severity_display() {
        assert_eq!(ValidationSeverity::Error.to_string(), "error");
        assert_eq!(ValidationSeverity::Warning.to_string(), "warning");
        assert_eq!(ValidationSeverity::Information.to_string(), "information");
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_unique_violation_mapping() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE t (k TEXT PRIMARY KEY)", []).unwrap();
        conn.execute("INSERT INTO t (k) VALUES ('a')", []).unwrap();
        let err: StorageError = conn
            .execute("INSERT INTO t (k) VALUES ('a')", [])
            .unwrap_err()
            .into();
        assert!(err.is_unique_violation());
    }
}
