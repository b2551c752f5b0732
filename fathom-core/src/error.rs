use std::io;
use std::time::Duration;

use thiserror::Error;

use fathom_model::RootId;

/// Unified error type for storage operations.
///
/// Every protocol client maps its native failures into these variants at the
/// boundary, so the resilience layer can decide what to retry without
/// knowing which backend produced the error.
#[derive(Error, Debug)]
pub enum FsError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("permanent failure: {0}")]
    Permanent(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("circuit breaker open for root {root_id}, retry in {retry_after:?}")]
    BreakerOpen {
        root_id: RootId,
        retry_after: Duration,
    },

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("scan finished with {failed} failed directories")]
    ScanPartial { failed: usize },

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, FsError>;

impl FsError {
    /// Worth retrying: the backend may answer on the next attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, FsError::Transient(_) | FsError::Timeout(_))
    }

    /// Retrying cannot help; the request itself is at fault.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            FsError::Permanent(_) | FsError::NotFound(_) | FsError::Config(_)
        )
    }

    pub fn is_retryable(&self) -> bool {
        self.is_transient()
    }

    /// Classify a std IO error. Connection-level failures are transient,
    /// request-level ones permanent; kinds we cannot place default to
    /// transient because network filesystems surface outages as
    /// uncategorized IO errors.
    pub fn from_io(context: &str, err: io::Error) -> Self {
        use io::ErrorKind::*;

        match err.kind() {
            NotFound => FsError::NotFound(format!("{context}: {err}")),
            PermissionDenied | AlreadyExists | InvalidInput | InvalidData
            | NotADirectory | IsADirectory | DirectoryNotEmpty
            | ReadOnlyFilesystem | Unsupported => {
                FsError::Permanent(format!("{context}: {err}"))
            }
            TimedOut => FsError::Timeout(format!("{context}: {err}")),
            _ => FsError::Transient(format!("{context}: {err}")),
        }
    }
}

impl From<fathom_config::ConfigError> for FsError {
    fn from(err: fathom_config::ConfigError) -> Self {
        FsError::Config(err.to_string())
    }
}

impl From<fathom_model::ModelError> for FsError {
    fn from(err: fathom_model::ModelError) -> Self {
        FsError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_classification() {
        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "no");
        assert!(FsError::from_io("connect", refused).is_transient());

        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "no");
        assert!(FsError::from_io("open", denied).is_permanent());

        let missing = io::Error::new(io::ErrorKind::NotFound, "gone");
        let err = FsError::from_io("stat", missing);
        assert!(matches!(err, FsError::NotFound(_)));
        assert!(err.is_permanent());
    }

    #[test]
    fn breaker_open_is_neither_class() {
        let err = FsError::BreakerOpen {
            root_id: RootId::new(),
            retry_after: Duration::from_secs(30),
        };
        assert!(!err.is_transient());
        assert!(!err.is_permanent());
    }

    #[test]
    fn timeout_is_retryable() {
        assert!(FsError::Timeout("list".into()).is_retryable());
        assert!(!FsError::Cancelled("list".into()).is_retryable());
    }
}
