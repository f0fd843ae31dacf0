//! Collaborator boundary.
//!
//! The scheduler never touches the filesystem itself. Every operation goes
//! through an [`FsBackend`], which performs the work elsewhere and posts the
//! result back as a [`Message`] on the scheduler's channel. Results are only
//! ever applied on the scheduler's own thread.

use std::any::Any;
use std::fmt;
use std::path::{Path, PathBuf};

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::error::IoFailure;
use crate::fetch::FetchKind;
use crate::ids::DirectoryId;
use crate::provider::{ProviderHandle, ProviderId};

// ---------------------------------------------------------------------------
// Metadata records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileType {
    #[default]
    Unknown,
    Regular,
    Directory,
    Symlink,
    Special,
    /// Something that can be mounted (a volume, a network share).
    Mountable,
}

/// One metadata record, as produced by enumeration or a single query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntryInfo {
    pub name: String,
    pub file_type: FileType,
    pub size: u64,
    /// Zero or absent when the filesystem has no stable inode numbers.
    pub inode: Option<u64>,
    /// Modification time, seconds since the epoch.
    pub mtime: u64,
    pub content_type: Option<String>,
    pub is_hidden: bool,
    pub is_backup: bool,
    pub is_executable: bool,
    pub is_mountpoint: bool,
    /// Path of a cached thumbnail, if the thumbnail store has one.
    pub thumbnail_path: Option<PathBuf>,
    /// Symlink or mountable target.
    pub target: Option<PathBuf>,
}

impl EntryInfo {
    /// Record with the hidden/backup flags derived from the name.
    pub fn named(name: impl Into<String>, file_type: FileType) -> Self {
        let name = name.into();
        Self {
            is_hidden: name.starts_with('.'),
            is_backup: name.ends_with('~'),
            name,
            file_type,
            ..Default::default()
        }
    }

    #[inline]
    pub fn is_directory(&self) -> bool {
        self.file_type == FileType::Directory
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    pub name: String,
    pub root: PathBuf,
    pub fs_type: String,
    /// Hidden behind another mount of the same root.
    pub is_shadowed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FilesystemInfo {
    pub read_only: bool,
    pub use_preview: bool,
}

/// Decoded thumbnail header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    /// Modification time of the source file recorded in the thumbnail.
    pub source_mtime: Option<u64>,
}

/// Bound on a content read: stop once `max_bytes` is reached or more than
/// `max_lines` newlines have been seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadLimit {
    pub max_bytes: usize,
    pub max_lines: Option<usize>,
}

impl ReadLimit {
    pub fn bytes(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            max_lines: None,
        }
    }

    /// Whether a reader holding `data` should keep reading.
    pub fn wants_more(&self, data: &[u8]) -> bool {
        if data.len() >= self.max_bytes {
            return false;
        }
        match self.max_lines {
            Some(lines) => data.iter().filter(|b| **b == b'\n').count() <= lines,
            None => true,
        }
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Identifies the in-flight fetch an outcome belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    pub(crate) dir: DirectoryId,
    pub(crate) kind: FetchKind,
    pub(crate) generation: u64,
}

impl Ticket {
    pub fn kind(&self) -> FetchKind {
        self.kind
    }
}

/// Streaming result of an enumeration.
#[derive(Debug, Clone, PartialEq)]
pub enum ListingEvent {
    /// The location could or could not be opened. An `Err` ends the stream.
    Opened(Result<(), IoFailure>),
    Batch(Vec<EntryInfo>),
    /// End of stream. `Some` if enumeration stopped on an error.
    Finished(Option<IoFailure>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Listing(ListingEvent),
    Info(Result<EntryInfo, IoFailure>),
    Contents(Result<Vec<u8>, IoFailure>),
    Mount(Result<Option<MountInfo>, IoFailure>),
    Filesystem(Result<Option<FilesystemInfo>, IoFailure>),
    Thumbnail(Result<Thumbnail, IoFailure>),
}

/// Change reported by a directory watch.
///
/// The watcher queries metadata for new entries before reporting them.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchChange {
    Created(EntryInfo),
    Changed(PathBuf),
    Removed(PathBuf),
}

/// Everything that can arrive on the scheduler's channel.
#[derive(Debug)]
pub enum Message {
    Fetch {
        ticket: Ticket,
        outcome: Outcome,
    },
    Provider {
        dir: DirectoryId,
        provider: ProviderId,
        handle: ProviderHandle,
        attributes: Option<Vec<(String, String)>>,
    },
    Watch {
        dir: DirectoryId,
        change: WatchChange,
    },
}

/// Sending half of the scheduler channel, handed to collaborators.
#[derive(Clone)]
pub struct CompletionSink {
    tx: UnboundedSender<Message>,
}

impl CompletionSink {
    pub(crate) fn new(tx: UnboundedSender<Message>) -> Self {
        Self { tx }
    }

    /// Post the outcome of a fetch. Silently dropped if the scheduler is gone.
    pub fn deliver(&self, ticket: Ticket, outcome: Outcome) {
        let _ = self.tx.send(Message::Fetch { ticket, outcome });
    }

    pub fn watch_event(&self, dir: DirectoryId, change: WatchChange) {
        let _ = self.tx.send(Message::Watch { dir, change });
    }

    pub(crate) fn send(&self, message: Message) {
        let _ = self.tx.send(message);
    }
}

impl fmt::Debug for CompletionSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSink")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// Keeps a directory watch alive. Dropping it stops the watch.
pub struct WatchHandle {
    _guard: Box<dyn Any>,
}

impl WatchHandle {
    pub fn new<G: Any>(guard: G) -> Self {
        Self {
            _guard: Box::new(guard),
        }
    }
}

impl fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WatchHandle")
    }
}

// ---------------------------------------------------------------------------
// Backend trait
// ---------------------------------------------------------------------------

/// Filesystem capabilities the scheduler consumes.
///
/// Asynchronous methods must return immediately and report through `sink`;
/// they must never call back into the scheduler. Once `token` is cancelled
/// the backend should stop work, but late deliveries are harmless.
pub trait FsBackend {
    /// List the children of `location` in batches of at most `batch_size`.
    /// Emits `Opened`, then any number of `Batch`, then `Finished`.
    fn enumerate(
        &self,
        ticket: Ticket,
        location: &Path,
        batch_size: usize,
        token: CancellationToken,
        sink: CompletionSink,
    );

    /// Metadata for a single location. Replies with `Outcome::Info`.
    fn query_info(&self, ticket: Ticket, location: &Path, token: CancellationToken, sink: CompletionSink);

    /// Read a bounded prefix of a file. Replies with `Outcome::Contents`.
    fn load_contents(
        &self,
        ticket: Ticket,
        location: &Path,
        limit: ReadLimit,
        token: CancellationToken,
        sink: CompletionSink,
    );

    /// Mount whose root encloses `location`. Replies with `Outcome::Mount`.
    fn find_enclosing_mount(
        &self,
        ticket: Ticket,
        location: &Path,
        token: CancellationToken,
        sink: CompletionSink,
    );

    /// Read-only and preview flags of the backing filesystem. Replies with
    /// `Outcome::Filesystem`.
    fn query_filesystem_info(
        &self,
        ticket: Ticket,
        location: &Path,
        token: CancellationToken,
        sink: CompletionSink,
    );

    /// Decode the image header at `path`. Replies with `Outcome::Thumbnail`.
    fn load_thumbnail(&self, ticket: Ticket, path: &Path, token: CancellationToken, sink: CompletionSink);

    /// Current mount table.
    fn list_mounts(&self) -> Vec<MountInfo>;

    /// Names listed in `<location>/.hidden`, if that is a regular file.
    fn read_hidden_names(&self, location: &Path) -> Vec<String>;

    /// Start watching `location`; changes are posted as `Message::Watch`.
    fn watch(&self, dir: DirectoryId, location: &Path, sink: CompletionSink) -> Option<WatchHandle>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_derives_hidden_and_backup() {
        let e = EntryInfo::named(".profile", FileType::Regular);
        assert!(e.is_hidden);
        assert!(!e.is_backup);
        let e = EntryInfo::named("notes.txt~", FileType::Regular);
        assert!(e.is_backup);
        assert!(!e.is_hidden);
    }

    #[test]
    fn test_read_limit_stops_on_bytes_or_lines() {
        let limit = ReadLimit {
            max_bytes: 10,
            max_lines: Some(2),
        };
        assert!(limit.wants_more(b"a\nb\n"));
        assert!(!limit.wants_more(b"a\nb\nc\n"));
        assert!(!limit.wants_more(b"0123456789"));
        assert!(ReadLimit::bytes(4).wants_more(b"\n\n\n"));
    }
}
