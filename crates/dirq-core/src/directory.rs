//! Per-directory scheduling state.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use crate::fetch::{FetchKind, FetchState};
use crate::ids::{DirectoryId, FileId};
use crate::io::{EntryInfo, WatchHandle};
use crate::queue::WorkQueues;
use crate::request::{RequestCounter, RequestKind};
use crate::subscription::{Monitor, ReadyCallback};

/// One outstanding fetch of a given kind.
#[derive(Debug)]
pub(crate) struct InFlight {
    pub generation: u64,
    pub token: CancellationToken,
    /// Target file. Cleared if the file is destroyed while the fetch runs.
    pub file: Option<FileId>,
    pub state: FetchState,
}

/// Whether the dispatch loop is running for a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DispatchState {
    Idle,
    /// `rerun` is set when another state change arrives mid-pass.
    Running { rerun: bool },
}

/// Accumulators for a listing of the directory itself.
#[derive(Debug)]
pub(crate) struct LoadState {
    /// File representing this directory, referenced for the load's duration.
    pub directory_file: Option<FileId>,
    pub count: u32,
    pub mime: MimeSet,
}

/// Content types in first-seen order, deduplicated case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct MimeSet {
    order: Vec<String>,
    seen: HashSet<String>,
}

impl MimeSet {
    pub fn insert(&mut self, mime: &str) {
        if self.seen.insert(mime.to_ascii_lowercase()) {
            self.order.push(mime.to_string());
        }
    }

    pub fn into_list(self) -> Vec<String> {
        self.order
    }
}

#[derive(Debug)]
pub(crate) struct Directory {
    pub id: DirectoryId,
    pub location: PathBuf,
    pub ref_count: usize,

    pub files_by_name: HashMap<String, FileId>,
    /// Files in insertion order.
    pub file_list: Vec<FileId>,
    /// File representing the directory itself, when it has no parent.
    pub as_file: Option<FileId>,

    pub queues: WorkQueues,
    pub slots: [Option<InFlight>; FetchKind::COUNT],

    pub monitors: Vec<Monitor>,
    pub monitor_counters: RequestCounter,
    pub callbacks: Vec<ReadyCallback>,
    pub callback_counters: RequestCounter,

    pub file_list_monitored: bool,
    pub directory_loaded: bool,
    pub directory_loaded_sent_notification: bool,
    pub load_state: Option<LoadState>,
    pub pending_entries: Vec<EntryInfo>,
    pub dequeue_pending_scheduled: bool,
    pub hidden_names: HashSet<String>,

    pub dispatch: DispatchState,
    pub call_ready_scheduled: bool,

    pub watch: Option<WatchHandle>,
    pub mime_db_subscribed: bool,
}

impl Directory {
    pub fn new(id: DirectoryId, location: PathBuf) -> Self {
        Self {
            id,
            location,
            ref_count: 0,
            files_by_name: HashMap::new(),
            file_list: Vec::new(),
            as_file: None,
            queues: WorkQueues::default(),
            slots: Default::default(),
            monitors: Vec::new(),
            monitor_counters: RequestCounter::default(),
            callbacks: Vec::new(),
            callback_counters: RequestCounter::default(),
            file_list_monitored: false,
            directory_loaded: false,
            directory_loaded_sent_notification: false,
            load_state: None,
            pending_entries: Vec::new(),
            dequeue_pending_scheduled: false,
            hidden_names: HashSet::new(),
            dispatch: DispatchState::Idle,
            call_ready_scheduled: false,
            watch: None,
            mime_db_subscribed: false,
        }
    }

    #[inline]
    pub fn slot(&self, kind: FetchKind) -> Option<&InFlight> {
        self.slots[kind.index()].as_ref()
    }

    #[inline]
    pub fn slot_mut(&mut self, kind: FetchKind) -> &mut Option<InFlight> {
        &mut self.slots[kind.index()]
    }

    /// Total subscriptions wanting `kind`.
    pub fn request_count(&self, kind: RequestKind) -> u32 {
        self.monitor_counters.get(kind) + self.callback_counters.get(kind)
    }

    pub fn is_file_list_wanted(&self) -> bool {
        self.request_count(RequestKind::FileList) > 0
    }

    pub fn add_file(&mut self, file: FileId, name: String) {
        self.files_by_name.insert(name, file);
        self.file_list.push(file);
    }

    pub fn remove_file(&mut self, file: FileId, name: &str) {
        if self.files_by_name.get(name) == Some(&file) {
            self.files_by_name.remove(name);
        }
        self.file_list.retain(|f| *f != file);
        self.queues.remove(file);
    }

    pub fn add_monitor(&mut self, monitor: Monitor) {
        self.monitor_counters.add(monitor.request);
        self.monitors.push(monitor);
    }

    /// Remove the monitor registered by `client` for `file`, if any.
    pub fn remove_monitor(&mut self, file: Option<FileId>, client: crate::ids::ClientId) -> bool {
        let Some(pos) = self
            .monitors
            .iter()
            .position(|m| m.file == file && m.client == client)
        else {
            return false;
        };
        let monitor = self.monitors.remove(pos);
        self.monitor_counters.remove(monitor.request);
        true
    }

    pub fn add_callback(&mut self, callback: ReadyCallback) {
        self.callback_counters.add(callback.request);
        self.callbacks.push(callback);
    }

    pub fn remove_callback_at(&mut self, index: usize) -> ReadyCallback {
        let callback = self.callbacks.remove(index);
        self.callback_counters.remove(callback.request);
        callback
    }

    /// Kinds currently in flight.
    pub fn in_flight_kinds(&self) -> impl Iterator<Item = FetchKind> + '_ {
        FetchKind::ALL
            .into_iter()
            .filter(|kind| self.slots[kind.index()].is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ClientId;
    use crate::request::RequestMask;

    #[test]
    fn test_mime_set_dedups_case_insensitively() {
        let mut set = MimeSet::default();
        set.insert("text/plain");
        set.insert("TEXT/PLAIN");
        set.insert("image/png");
        assert_eq!(set.into_list(), vec!["text/plain", "image/png"]);
    }

    #[test]
    fn test_monitor_counters_follow_membership() {
        let mut dir = Directory::new(DirectoryId(1), PathBuf::from("/d"));
        let request = RequestMask::from(RequestKind::FileInfo).with(RequestKind::FileList);
        dir.add_monitor(Monitor {
            file: None,
            client: ClientId(7),
            request,
            monitor_hidden: false,
        });
        assert_eq!(dir.request_count(RequestKind::FileInfo), 1);
        assert!(dir.is_file_list_wanted());

        assert!(!dir.remove_monitor(None, ClientId(8)));
        assert!(dir.remove_monitor(None, ClientId(7)));
        assert_eq!(dir.request_count(RequestKind::FileInfo), 0);
        assert!(!dir.is_file_list_wanted());
    }

    #[test]
    fn test_remove_file_clears_queues() {
        let mut dir = Directory::new(DirectoryId(1), PathBuf::from("/d"));
        dir.add_file(FileId(3), "a".into());
        dir.queues.enqueue(FileId(3));
        dir.remove_file(FileId(3), "a");
        assert!(dir.file_list.is_empty());
        assert!(dir.files_by_name.is_empty());
        assert!(dir.queues.is_empty());
    }
}
