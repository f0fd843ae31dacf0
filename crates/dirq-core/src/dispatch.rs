//! The per-directory dispatch loop.
//!
//! Any change that could affect what a directory should be doing ends in
//! [`Core::state_changed`]. One pass stops fetches nobody needs any more,
//! walks the work queues tier by tier starting what is needed, and marks
//! ready-callbacks whose requests are now satisfied. Passes repeat until
//! nothing changes, then parked directories are woken while admission
//! slots remain.

use dirq_config::log_sched_trace;

use crate::directory::DispatchState;
use crate::fetch::{self, file_list, FetchKind, EXTENSION_TIER, HIGH_TIER, LOW_TIER, STOP_ORDER};
use crate::file::File;
use crate::ids::{DirectoryId, FileId};
use crate::queue::Tier;
use crate::request::{RequestKind, RequestMask};
use crate::state::{Core, IdleTask};
use crate::subscription::{ReadyCall, ReadyHandler};

/// Request kinds checked when deciding whether a request is satisfied.
/// Extension info never holds up a ready-callback.
const SATISFACTION_KINDS: [RequestKind; 10] = [
    RequestKind::DirectoryCount,
    RequestKind::FileInfo,
    RequestKind::FilesystemInfo,
    RequestKind::TopLeftText,
    RequestKind::LargeTopLeftText,
    RequestKind::DeepCount,
    RequestKind::Thumbnail,
    RequestKind::Mount,
    RequestKind::MimeList,
    RequestKind::LinkInfo,
];

impl Core {
    // --- needs -----------------------------------------------------------

    /// Some active callback or monitor of `file`'s directory wants `kind`
    /// for it.
    pub(crate) fn is_wanted(&self, file: FileId, kind: RequestKind) -> bool {
        let Some(f) = self.files.get(&file) else {
            return false;
        };
        let Some(d) = self.dirs.get(&f.directory) else {
            return false;
        };

        if d.callback_counters.get(kind) > 0 {
            let wanted = d.callbacks.iter().any(|cb| {
                cb.active
                    && cb.request.wants(kind)
                    && match cb.file() {
                        Some(target) => target == file,
                        None => d.as_file != Some(file),
                    }
            });
            if wanted {
                return true;
            }
        }

        if d.monitor_counters.get(kind) > 0 {
            return d.monitors.iter().any(|m| {
                m.request.wants(kind)
                    && match m.file {
                        Some(target) => target == file,
                        None => {
                            d.as_file != Some(file)
                                && self.should_show(f, &d.hidden_names, m.monitor_hidden)
                        }
                    }
            });
        }

        false
    }

    fn should_show(&self, file: &File, hidden_names: &std::collections::HashSet<String>, monitor_hidden: bool) -> bool {
        self.config.show_hidden_files || monitor_hidden || !file.is_hidden_file(hidden_names)
    }

    /// Link info is only fetched for link files. For anything else it is
    /// settled on the spot once file info is known.
    pub(crate) fn lacks_link_info(&mut self, file: FileId) -> bool {
        let Some(f) = self.files.get_mut(&file) else {
            return false;
        };
        if !f.info.is_up_to_date() || f.link_info.is_up_to_date() {
            return false;
        }
        if f.is_link_file() {
            return true;
        }
        f.link_info.not_applicable();
        false
    }

    pub(crate) fn lacks(&mut self, file: FileId, kind: RequestKind) -> bool {
        if kind == RequestKind::LinkInfo {
            return self.lacks_link_info(file);
        }
        let Some(f) = self.files.get(&file) else {
            return false;
        };
        match kind {
            RequestKind::DirectoryCount => f.lacks_directory_count(),
            RequestKind::FileInfo => f.lacks_info(),
            RequestKind::FilesystemInfo => f.lacks_filesystem_info(),
            RequestKind::TopLeftText => f.lacks_top_left(),
            RequestKind::LargeTopLeftText => f.lacks_large_top_left(),
            RequestKind::DeepCount => f.lacks_deep_count(),
            RequestKind::Thumbnail => f.lacks_thumbnail(),
            RequestKind::Mount => f.lacks_mount(),
            RequestKind::MimeList => f.lacks_mime_list(),
            RequestKind::ExtensionInfo => f.lacks_extension_info(),
            RequestKind::LinkInfo | RequestKind::FileList => false,
        }
    }

    fn has_problem(&mut self, dir: DirectoryId, file: Option<FileId>, kind: RequestKind) -> bool {
        match file {
            Some(file) => self.lacks(file, kind),
            None => {
                let files = match self.dirs.get(&dir) {
                    Some(d) => d.file_list.clone(),
                    None => return false,
                };
                files.into_iter().any(|f| self.lacks(f, kind))
            }
        }
    }

    /// Whether everything `request` asks for is known for `file`, or for
    /// every file of `dir` when `file` is `None`.
    pub(crate) fn request_is_satisfied(&mut self, dir: DirectoryId, file: Option<FileId>, request: RequestMask) -> bool {
        if request.wants(RequestKind::FileList) {
            let loaded = self
                .dirs
                .get(&dir)
                .map(|d| d.directory_loaded && d.directory_loaded_sent_notification)
                .unwrap_or(false);
            if !loaded {
                return false;
            }
        }
        SATISFACTION_KINDS
            .into_iter()
            .all(|kind| !request.wants(kind) || !self.has_problem(dir, file, kind))
    }

    // --- queues ----------------------------------------------------------

    pub(crate) fn enqueue_file(&mut self, dir: DirectoryId, file: FileId) {
        if let Some(d) = self.dirs.get_mut(&dir) {
            d.queues.enqueue(file);
        }
    }

    pub(crate) fn enqueue_all(&mut self, dir: DirectoryId) {
        if let Some(d) = self.dirs.get_mut(&dir) {
            for file in d.file_list.clone() {
                d.queues.enqueue(file);
            }
        }
    }

    // --- the loop --------------------------------------------------------

    fn start_or_stop_io(&mut self, dir: DirectoryId) {
        file_list::start_or_stop(self, dir);

        for kind in STOP_ORDER {
            fetch::stop(self, dir, kind);
        }

        let tiers: [(Tier, &[FetchKind]); 3] = [
            (Tier::High, &HIGH_TIER[..]),
            (Tier::Low, &LOW_TIER[..]),
            (Tier::Extension, &EXTENSION_TIER[..]),
        ];
        for (tier, kinds) in tiers {
            while let Some(file) = self.dirs.get(&dir).and_then(|d| d.queues.head(tier)) {
                let mut doing_io = false;
                for kind in kinds {
                    fetch::start(self, dir, file, *kind, &mut doing_io);
                }
                if doing_io {
                    return;
                }
                if let Some(d) = self.dirs.get_mut(&dir) {
                    d.queues.demote(file, tier);
                }
            }
        }
    }

    /// Re-evaluate `dir`. Re-entrant calls are folded into the running pass.
    pub(crate) fn state_changed(&mut self, dir: DirectoryId) {
        let Some(d) = self.dirs.get_mut(&dir) else {
            return;
        };
        if let DispatchState::Running { .. } = d.dispatch {
            d.dispatch = DispatchState::Running { rerun: true };
            log_sched_trace!("Re-entrant dispatch folded", dir = dir.0);
            return;
        }
        d.dispatch = DispatchState::Running { rerun: false };
        d.ref_count += 1;

        loop {
            self.start_or_stop_io(dir);
            let ready = self.mark_ready_callbacks(dir);

            let Some(d) = self.dirs.get_mut(&dir) else {
                break;
            };
            let rerun = matches!(d.dispatch, DispatchState::Running { rerun: true }) || ready;
            d.dispatch = DispatchState::Running { rerun: false };
            if !rerun {
                break;
            }
            log_sched_trace!("Dispatch pass repeated", dir = dir.0);
        }

        if let Some(d) = self.dirs.get_mut(&dir) {
            d.dispatch = DispatchState::Idle;
        }
        self.directory_unref(dir);
        self.wake_up();
    }

    /// Re-dispatch parked directories, oldest first, while slots remain.
    pub(crate) fn wake_up(&mut self) {
        if !self.admission.begin_wake() {
            return;
        }
        while let Some(dir) = self.admission.next_to_wake() {
            log_sched_trace!("Waking parked directory", dir = dir.0);
            self.state_changed(dir);
        }
        self.admission.finish_wake();
    }

    // --- ready callbacks -------------------------------------------------

    /// Deactivate every callback whose request is now satisfied and schedule
    /// them to fire. Returns true if any were found.
    fn mark_ready_callbacks(&mut self, dir: DirectoryId) -> bool {
        let count = self.dirs.get(&dir).map(|d| d.callbacks.len()).unwrap_or(0);
        let mut found = false;

        for i in 0..count {
            let Some((active, file, request)) = self
                .dirs
                .get(&dir)
                .and_then(|d| d.callbacks.get(i))
                .map(|cb| (cb.active, cb.file(), cb.request))
            else {
                break;
            };
            if active && self.request_is_satisfied(dir, file, request) {
                if let Some(cb) = self.dirs.get_mut(&dir).and_then(|d| d.callbacks.get_mut(i)) {
                    cb.active = false;
                    found = true;
                }
            }
        }

        if found {
            if let Some(d) = self.dirs.get_mut(&dir) {
                if !d.call_ready_scheduled {
                    d.call_ready_scheduled = true;
                    self.schedule(IdleTask::CallReadyCallbacks(dir));
                }
            }
        }
        found
    }

    /// Detach the oldest satisfied callback of `dir`, ready to run.
    pub(crate) fn take_ready_call(&mut self, dir: DirectoryId) -> Option<ReadyCall> {
        let d = self.dirs.get_mut(&dir)?;
        let index = d.callbacks.iter().position(|cb| !cb.active)?;
        let callback = d.remove_callback_at(index);

        Some(match callback.handler {
            ReadyHandler::WholeDirectory(Some(cb)) => {
                let files = if callback.request.wants(RequestKind::FileList) {
                    d.file_list.clone()
                } else {
                    Vec::new()
                };
                ReadyCall::Directory(cb, dir, files)
            }
            ReadyHandler::SingleFile(file, Some(cb)) => ReadyCall::File(cb, file),
            _ => ReadyCall::Nothing,
        })
    }
}
