//! Error types.

use std::path::PathBuf;

use crate::ids::{DirectoryId, FileId};

/// Failure of a single collaborator operation.
///
/// These never escape the scheduler as `Err`; they are recorded on the file
/// as "up to date, failed".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IoFailure {
    #[error("not found")]
    NotFound,
    #[error("cancelled")]
    Cancelled,
    #[error("{0}")]
    Other(String),
}

impl From<std::io::Error> for IoFailure {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => IoFailure::NotFound,
            std::io::ErrorKind::Interrupted => IoFailure::Cancelled,
            _ => IoFailure::Other(e.to_string()),
        }
    }
}

impl From<nix::Error> for IoFailure {
    fn from(e: nix::Error) -> Self {
        match e {
            nix::Error::ENOENT => IoFailure::NotFound,
            other => IoFailure::Other(other.to_string()),
        }
    }
}

/// Misuse detectable at the API boundary.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("unknown directory handle {0:?}")]
    UnknownDirectory(DirectoryId),

    #[error("unknown file handle {0:?}")]
    UnknownFile(FileId),

    #[error("file {file:?} does not belong to directory {dir:?}")]
    ForeignFile { dir: DirectoryId, file: FileId },

    #[error("location has no file name: {0}")]
    BadLocation(PathBuf),
}

/// The local backend could not be set up.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("no tokio runtime: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    #[error("failed to start thumbnail worker: {0}")]
    Worker(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_mapping() {
        let nf = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(IoFailure::from(nf), IoFailure::NotFound);

        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(IoFailure::from(denied), IoFailure::Other(_)));
    }

    #[test]
    fn test_nix_error_mapping() {
        assert_eq!(IoFailure::from(nix::Error::ENOENT), IoFailure::NotFound);
        assert!(matches!(
            IoFailure::from(nix::Error::EACCES),
            IoFailure::Other(_)
        ));
    }
}
