//! Error types for bitacora
//!
//! The typed kinds mirror the error taxonomy of the remote control plane so
//! callers can match on what the service said rather than on strings.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Bitacora error types
#[derive(Error, Debug)]
pub enum Error {
    /// Resource does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Resource already exists under the requested id or display name
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Caller-supplied argument failed validation
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The credential is not allowed to perform the operation
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The backing tensorboard experiment disappeared mid-upload.
    /// Fatal to an uploader session: the poll loop exits.
    #[error("tensorboard experiment not found: {0}")]
    ExperimentNotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed wire payload (tensor, graph def, write request)
    #[error("decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// Malformed JSON (event bridge files, metadata payloads)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True when the error is the service's already-exists rejection.
    ///
    /// The create-or-adopt paths branch on this to fall back to a filtered
    /// list of the parent.
    #[must_use]
    pub const fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    /// True when the error is the service's not-found rejection.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NotFound("contexts/exp-r1".to_string());
        assert_eq!(err.to_string(), "not found: contexts/exp-r1");
    }

    #[test]
    fn test_error_kind_predicates() {
        assert!(Error::AlreadyExists("x".to_string()).is_already_exists());
        assert!(!Error::AlreadyExists("x".to_string()).is_not_found());
        assert!(Error::NotFound("x".to_string()).is_not_found());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
