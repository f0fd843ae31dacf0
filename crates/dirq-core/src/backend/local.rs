//! Local filesystem backend.
//!
//! Blocking filesystem calls run on tokio's blocking pool; each job posts
//! its result through the [`CompletionSink`] it was handed.

use std::fs::Metadata;
use std::io::Read;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use dirq_config::log_fetch_debug;
use md5::{Digest, Md5};
use nix::sys::statvfs::{statvfs, FsFlags};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use super::thumbnail_worker::ThumbnailWorker;
use super::{content_type, mounts};
use crate::error::{BackendError, IoFailure};
use crate::ids::DirectoryId;
use crate::io::{
    CompletionSink, EntryInfo, FileType, FilesystemInfo, FsBackend, ListingEvent, MountInfo, Outcome, ReadLimit,
    Ticket, WatchHandle,
};
use crate::watch::DirWatch;

/// Per-directory thumbnail store shared between users.
const SHARED_THUMBNAIL_DIR: &str = ".sh_thumbnails/normal";

const READ_CHUNK: usize = 8 * 1024;

pub struct LocalBackend {
    runtime: Handle,
    /// Freedesktop thumbnail cache, keyed by the MD5 of the file URI.
    thumbnail_cache: PathBuf,
    thumbnails: ThumbnailWorker,
}

impl LocalBackend {
    /// Must be called from within a tokio runtime.
    pub fn new(thumbnail_cache: PathBuf) -> Result<Self, BackendError> {
        Ok(Self {
            runtime: Handle::try_current()?,
            thumbnail_cache,
            thumbnails: ThumbnailWorker::spawn()?,
        })
    }

    pub fn thumbnail_worker(&self) -> &ThumbnailWorker {
        &self.thumbnails
    }

    fn spawn<F>(&self, ticket: Ticket, token: CancellationToken, sink: CompletionSink, job: F)
    where
        F: FnOnce(&CancellationToken) -> Option<Outcome> + Send + 'static,
    {
        self.runtime.spawn_blocking(move || {
            if token.is_cancelled() {
                return;
            }
            if let Some(outcome) = job(&token) {
                sink.deliver(ticket, outcome);
            }
        });
    }
}

impl FsBackend for LocalBackend {
    fn enumerate(&self, ticket: Ticket, location: &Path, batch_size: usize, token: CancellationToken, sink: CompletionSink) {
        let location = location.to_path_buf();
        let cache = self.thumbnail_cache.clone();
        let out = sink.clone();
        self.spawn(ticket, token, sink, move |token| {
            let parent_dev = std::fs::metadata(&location).map(|m| m.dev()).ok();
            let entries = match std::fs::read_dir(&location) {
                Ok(entries) => entries,
                Err(e) => return Some(Outcome::Listing(ListingEvent::Opened(Err(e.into())))),
            };
            out.deliver(ticket, Outcome::Listing(ListingEvent::Opened(Ok(()))));

            let mut batch = Vec::with_capacity(batch_size);
            for entry in entries {
                if token.is_cancelled() {
                    return None;
                }
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        if !batch.is_empty() {
                            out.deliver(ticket, Outcome::Listing(ListingEvent::Batch(std::mem::take(&mut batch))));
                        }
                        return Some(Outcome::Listing(ListingEvent::Finished(Some(e.into()))));
                    }
                };
                // Entries that vanish mid-listing are skipped.
                if let Ok(info) = stat_entry(&entry.path(), parent_dev, &cache) {
                    batch.push(info);
                }
                if batch.len() >= batch_size {
                    out.deliver(ticket, Outcome::Listing(ListingEvent::Batch(std::mem::take(&mut batch))));
                }
            }
            if !batch.is_empty() {
                out.deliver(ticket, Outcome::Listing(ListingEvent::Batch(batch)));
            }
            Some(Outcome::Listing(ListingEvent::Finished(None)))
        });
    }

    fn query_info(&self, ticket: Ticket, location: &Path, token: CancellationToken, sink: CompletionSink) {
        let location = location.to_path_buf();
        let cache = self.thumbnail_cache.clone();
        self.spawn(ticket, token, sink, move |_| {
            let parent_dev = location
                .parent()
                .and_then(|p| std::fs::metadata(p).ok())
                .map(|m| m.dev());
            Some(Outcome::Info(stat_entry(&location, parent_dev, &cache)))
        });
    }

    fn load_contents(&self, ticket: Ticket, location: &Path, limit: ReadLimit, token: CancellationToken, sink: CompletionSink) {
        let location = location.to_path_buf();
        self.spawn(ticket, token, sink, move |token| {
            let result = read_prefix(&location, limit, token);
            match result {
                Err(IoFailure::Cancelled) => None,
                other => Some(Outcome::Contents(other)),
            }
        });
    }

    fn find_enclosing_mount(&self, ticket: Ticket, location: &Path, token: CancellationToken, sink: CompletionSink) {
        let location = location.to_path_buf();
        self.spawn(ticket, token, sink, move |_| {
            let table = mounts::read_mount_table();
            let found = mounts::enclosing_mount(&table, &location).cloned();
            Some(Outcome::Mount(Ok(found)))
        });
    }

    fn query_filesystem_info(&self, ticket: Ticket, location: &Path, token: CancellationToken, sink: CompletionSink) {
        let location = location.to_path_buf();
        self.spawn(ticket, token, sink, move |_| {
            let stat = match statvfs(location.as_path()) {
                Ok(stat) => stat,
                Err(e) => return Some(Outcome::Filesystem(Err(e.into()))),
            };
            let table = mounts::read_mount_table();
            let remote = mounts::enclosing_mount(&table, &location)
                .map(|m| mounts::is_remote(&m.fs_type))
                .unwrap_or(false);
            Some(Outcome::Filesystem(Ok(Some(FilesystemInfo {
                read_only: stat.flags().contains(FsFlags::ST_RDONLY),
                use_preview: !remote,
            }))))
        });
    }

    fn load_thumbnail(&self, ticket: Ticket, path: &Path, token: CancellationToken, sink: CompletionSink) {
        self.thumbnails.submit(ticket, path.to_path_buf(), token, sink);
    }

    fn list_mounts(&self) -> Vec<MountInfo> {
        mounts::read_mount_table()
    }

    fn read_hidden_names(&self, location: &Path) -> Vec<String> {
        let path = location.join(".hidden");
        match std::fs::metadata(&path) {
            Ok(m) if m.is_file() => {}
            _ => return Vec::new(),
        }
        match std::fs::read_to_string(&path) {
            Ok(text) => parse_hidden_names(&text),
            Err(e) => {
                log_fetch_debug!("Unreadable .hidden", path = tracing::field::display(path.display()), error = tracing::field::display(e));
                Vec::new()
            }
        }
    }

    fn watch(&self, dir: DirectoryId, location: &Path, sink: CompletionSink) -> Option<WatchHandle> {
        DirWatch::start(dir, location.to_path_buf(), self.thumbnail_cache.clone(), sink).map(WatchHandle::new)
    }
}

pub(crate) fn parse_hidden_names(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Metadata for `path`, following symlinks. A dangling symlink is reported
/// as the link itself.
pub(crate) fn stat_entry(path: &Path, parent_dev: Option<u64>, thumbnail_cache: &Path) -> Result<EntryInfo, IoFailure> {
    let link_meta = std::fs::symlink_metadata(path)?;
    let is_link = link_meta.file_type().is_symlink();
    let meta = if is_link {
        std::fs::metadata(path).unwrap_or(link_meta)
    } else {
        link_meta
    };

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned());
    let file_type = file_type_of(&meta);
    let mut info = EntryInfo::named(name, file_type);
    info.size = meta.len();
    info.inode = Some(meta.ino()).filter(|ino| *ino != 0);
    info.mtime = u64::try_from(meta.mtime()).unwrap_or(0);
    info.is_executable = file_type == FileType::Regular && meta.permissions().mode() & 0o111 != 0;
    info.is_mountpoint = file_type == FileType::Directory && parent_dev.map(|d| d != meta.dev()).unwrap_or(false);
    info.content_type = Some(content_type::guess(path, file_type, info.size));
    if is_link {
        info.target = std::fs::read_link(path).ok();
    }
    if file_type == FileType::Regular {
        info.thumbnail_path = find_thumbnail(path, thumbnail_cache);
    }
    Ok(info)
}

fn file_type_of(meta: &Metadata) -> FileType {
    let ft = meta.file_type();
    if ft.is_dir() {
        FileType::Directory
    } else if ft.is_file() {
        FileType::Regular
    } else if ft.is_symlink() {
        FileType::Symlink
    } else {
        FileType::Special
    }
}

/// Cached thumbnail for `path`: the directory's shared store first, then the
/// per-user cache.
fn find_thumbnail(path: &Path, cache: &Path) -> Option<PathBuf> {
    let name = path.file_name()?;
    let parent = path.parent()?;
    let mut shared_name = name.to_os_string();
    shared_name.push(".png");
    let shared = parent.join(SHARED_THUMBNAIL_DIR).join(shared_name);
    if shared.is_file() {
        return Some(shared);
    }

    let uri = url::Url::from_file_path(path).ok()?;
    let digest = Md5::digest(uri.as_str().as_bytes());
    let cached = cache.join(format!("{}.png", hex::encode(digest)));
    cached.is_file().then_some(cached)
}

fn read_prefix(path: &Path, limit: ReadLimit, token: &CancellationToken) -> Result<Vec<u8>, IoFailure> {
    let mut file = std::fs::File::open(path)?;
    let mut data = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    while limit.wants_more(&data) {
        if token.is_cancelled() {
            return Err(IoFailure::Cancelled);
        }
        let n = file.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&chunk[..n]);
    }
    data.truncate(limit.max_bytes);
    Ok(data)
}
