//! Change notifications published to subscribers.

use crate::error::IoFailure;
use crate::file::DeepCounts;
use crate::ids::{DirectoryId, FileId};

#[derive(Debug, Clone, PartialEq)]
pub enum DirectoryEvent {
    /// Files seen for the first time by a listing.
    FilesAdded { dir: DirectoryId, files: Vec<FileId> },
    /// Files whose attributes changed, or that are now gone.
    FilesChanged { dir: DirectoryId, files: Vec<FileId> },
    /// First complete listing of the directory has been delivered.
    DoneLoading { dir: DirectoryId },
    LoadError { dir: DirectoryId, error: IoFailure },
    /// Running totals of a recursive count, after each subdirectory.
    DeepCountProgress {
        dir: DirectoryId,
        file: FileId,
        counts: DeepCounts,
    },
}

impl DirectoryEvent {
    pub fn dir(&self) -> DirectoryId {
        match self {
            DirectoryEvent::FilesAdded { dir, .. }
            | DirectoryEvent::FilesChanged { dir, .. }
            | DirectoryEvent::DoneLoading { dir }
            | DirectoryEvent::LoadError { dir, .. }
            | DirectoryEvent::DeepCountProgress { dir, .. } => *dir,
        }
    }
}
