//! Directory watches for monitored directories.
//!
//! Watches a single directory, non-recursively, and turns native events into
//! [`WatchChange`]s posted on the scheduler channel. Uses FSEvents on macOS,
//! inotify on Linux.

use std::path::{Path, PathBuf};
use std::time::Duration;

use dirq_config::{log_watch_debug, log_watch_info, log_watch_warn};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::backend::stat_entry;
use crate::ids::DirectoryId;
use crate::io::{CompletionSink, WatchChange};

/// Live watch on one directory. Dropping it stops the watch.
pub struct DirWatch {
    _watcher: RecommendedWatcher,
}

impl DirWatch {
    /// Start watching `root`. Returns `None` if the platform refuses.
    pub fn start(dir: DirectoryId, root: PathBuf, thumbnail_cache: PathBuf, sink: CompletionSink) -> Option<Self> {
        let watched = root.clone();
        let config = Config::default()
            .with_poll_interval(Duration::from_secs(2))
            .with_compare_contents(false);

        let handler = move |res: notify::Result<Event>| match res {
            Ok(event) => {
                log_watch_debug!("FS event received", dir = dir.0, event = tracing::field::debug(&event));
                for change in to_changes(&watched, event, &thumbnail_cache) {
                    sink.watch_event(dir, change);
                }
            }
            Err(e) => log_watch_warn!("FS watch error", dir = dir.0, error = tracing::field::display(e)),
        };

        let mut watcher = match RecommendedWatcher::new(handler, config) {
            Ok(w) => w,
            Err(e) => {
                log_watch_warn!("Failed to create FS watcher", error = tracing::field::display(e));
                return None;
            }
        };
        if let Err(e) = watcher.watch(&root, RecursiveMode::NonRecursive) {
            log_watch_warn!(
                "Failed to start FS watch",
                path = tracing::field::display(root.display()),
                error = tracing::field::display(e)
            );
            return None;
        }

        log_watch_info!("FS watch started", dir = dir.0, path = tracing::field::display(root.display()));
        Some(Self { _watcher: watcher })
    }
}

/// Changes for direct children of `root` described by `event`.
fn to_changes(root: &Path, event: Event, thumbnail_cache: &Path) -> Vec<WatchChange> {
    let parent_dev = std::fs::metadata(root).ok().map(|m| std::os::unix::fs::MetadataExt::dev(&m));

    event
        .paths
        .into_iter()
        .filter(|path| path.parent() == Some(root))
        .filter_map(|path| match event.kind {
            // The entry may already be gone again; then there is nothing to add.
            EventKind::Create(_) => stat_entry(&path, parent_dev, thumbnail_cache)
                .ok()
                .map(WatchChange::Created),
            EventKind::Modify(_) => Some(WatchChange::Changed(path)),
            EventKind::Remove(_) => Some(WatchChange::Removed(path)),
            _ => None,
        })
        .collect()
}
