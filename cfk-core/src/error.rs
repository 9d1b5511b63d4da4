//! Error types for Czech File Knife
//!
//! The sentinel variants below (`StorageNotFound` through
//! `DriverExtractNotSupported`) are the taxonomy callers are expected to
//! match on by identity via the `is_*` predicates, mirroring how the
//! donor's `is_retryable`/`is_auth_error` helpers are used rather than
//! `matches!` against the enum directly at call sites.

use thiserror::Error;

/// Result type alias
pub type CfkResult<T> = Result<T, CfkError>;

/// Main error type
#[derive(Error, Debug)]
pub enum CfkError {
    #[error("no storage mounted for: {0}")]
    StorageNotFound(String),

    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("not a folder: {0}")]
    NotFolder(String),

    #[error("not a file: {0}")]
    NotFile(String),

    #[error("operation not implemented by backend: {0}")]
    NotImplement(String),

    #[error("operation not supported by backend: {0}")]
    NotSupport(String),

    #[error("upload not supported by backend: {0}")]
    UploadNotSupported(String),

    #[error("metadata not found: {0}")]
    MetaNotFound(String),

    #[error("move/copy between two storages requires the transfer engine")]
    MoveBetweenTwoStorages,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("archive extraction not supported by driver: {0}")]
    DriverExtractNotSupported(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited: retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("timeout")]
    Timeout,

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl CfkError {
    pub fn is_storage_not_found(&self) -> bool {
        matches!(self, CfkError::StorageNotFound(_))
    }

    pub fn is_object_not_found(&self) -> bool {
        matches!(self, CfkError::ObjectNotFound(_))
    }

    pub fn is_not_folder(&self) -> bool {
        matches!(self, CfkError::NotFolder(_))
    }

    pub fn is_not_file(&self) -> bool {
        matches!(self, CfkError::NotFile(_))
    }

    pub fn is_not_implement(&self) -> bool {
        matches!(self, CfkError::NotImplement(_))
    }

    pub fn is_not_support(&self) -> bool {
        matches!(self, CfkError::NotSupport(_))
    }

    pub fn is_upload_not_supported(&self) -> bool {
        matches!(self, CfkError::UploadNotSupported(_))
    }

    pub fn is_meta_not_found(&self) -> bool {
        matches!(self, CfkError::MetaNotFound(_))
    }

    pub fn is_move_between_two_storages(&self) -> bool {
        matches!(self, CfkError::MoveBetweenTwoStorages)
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, CfkError::PermissionDenied(_))
    }

    pub fn is_driver_extract_not_supported(&self) -> bool {
        matches!(self, CfkError::DriverExtractNotSupported(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, CfkError::Network(_) | CfkError::RateLimited { .. } | CfkError::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_predicates_match_only_their_own_variant() {
        let err = CfkError::ObjectNotFound("/a/b".into());
        assert!(err.is_object_not_found());
        assert!(!err.is_not_folder());
        assert!(!err.is_storage_not_found());
    }

    #[test]
    fn move_between_two_storages_has_no_payload() {
        assert!(CfkError::MoveBetweenTwoStorages.is_move_between_two_storages());
    }
}
