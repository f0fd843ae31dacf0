//! Scheduler state and object lifecycle.
//!
//! [`Core`] owns every directory and file. Handles are reference counted by
//! hand: a file holds a reference on its directory, and a monitored listing
//! holds a reference on each of its files. An object is torn down when its
//! count reaches zero.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use dirq_config::{log_sched_debug, log_sched_warn};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::admission::Admission;
use crate::directory::{Directory, DispatchState};
use crate::error::{Result, SchedulerError};
use crate::events::DirectoryEvent;
use crate::fetch::{self, FetchKind, Job};
use crate::file::File;
use crate::ids::{DirectoryId, FileId};
use crate::io::{CompletionSink, EntryInfo, FsBackend, Ticket};
use crate::provider::ProviderRegistry;
use crate::settings::SchedulerConfig;

/// Deferred work run from the scheduler's main loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IdleTask {
    CallReadyCallbacks(DirectoryId),
    DequeuePending(DirectoryId),
}

pub(crate) struct Core {
    pub config: SchedulerConfig,
    pub backend: Rc<dyn FsBackend>,
    pub providers: ProviderRegistry,
    pub sink: CompletionSink,
    pub admission: Admission,
    pub dirs: HashMap<DirectoryId, Directory>,
    dirs_by_location: HashMap<PathBuf, DirectoryId>,
    pub files: HashMap<FileId, File>,
    pub idle: VecDeque<IdleTask>,
    subscribers: Vec<UnboundedSender<DirectoryEvent>>,
    next_id: u64,
    next_generation: u64,
}

impl Core {
    pub fn new(
        config: SchedulerConfig,
        backend: Rc<dyn FsBackend>,
        providers: ProviderRegistry,
        sink: CompletionSink,
    ) -> Self {
        Self {
            admission: Admission::new(config.max_jobs),
            config,
            backend,
            providers,
            sink,
            dirs: HashMap::new(),
            dirs_by_location: HashMap::new(),
            files: HashMap::new(),
            idle: VecDeque::new(),
            subscribers: Vec::new(),
            next_id: 0,
            next_generation: 0,
        }
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn next_ticket(&mut self, dir: DirectoryId, kind: FetchKind) -> Ticket {
        self.next_generation += 1;
        Ticket {
            dir,
            kind,
            generation: self.next_generation,
        }
    }

    pub fn new_job(&mut self, dir: DirectoryId, kind: FetchKind, file: FileId) -> Job {
        Job {
            ticket: self.next_ticket(dir, kind),
            file,
            token: CancellationToken::new(),
        }
    }

    // --- events ----------------------------------------------------------

    pub fn subscribe(&mut self, tx: UnboundedSender<DirectoryEvent>) {
        self.subscribers.push(tx);
    }

    pub fn emit(&mut self, event: DirectoryEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn file_changed(&mut self, file: FileId) {
        if let Some(dir) = self.files.get(&file).map(|f| f.directory) {
            self.emit(DirectoryEvent::FilesChanged {
                dir,
                files: vec![file],
            });
        }
    }

    // --- lookups ---------------------------------------------------------

    pub fn file(&self, file: FileId) -> Result<&File> {
        self.files.get(&file).ok_or(SchedulerError::UnknownFile(file))
    }

    pub fn directory(&self, dir: DirectoryId) -> Result<&Directory> {
        self.dirs.get(&dir).ok_or(SchedulerError::UnknownDirectory(dir))
    }

    /// Check that `file`, if given, is one of `dir`'s files.
    pub fn check_owner(&self, dir: DirectoryId, file: Option<FileId>) -> Result<()> {
        self.directory(dir)?;
        if let Some(file) = file {
            if self.file(file)?.directory != dir {
                return Err(SchedulerError::ForeignFile { dir, file });
            }
        }
        Ok(())
    }

    pub fn directory_at(&self, location: &Path) -> Option<DirectoryId> {
        self.dirs_by_location.get(location).copied()
    }

    // --- directories -----------------------------------------------------

    /// Directory for `location`, created on first use. Adds a reference.
    pub fn directory_get(&mut self, location: &Path) -> DirectoryId {
        if let Some(dir) = self.dirs_by_location.get(location).copied() {
            self.directory_ref(dir);
            return dir;
        }
        let dir = DirectoryId(self.next_id());
        let mut directory = Directory::new(dir, location.to_path_buf());
        directory.ref_count = 1;
        self.dirs.insert(dir, directory);
        self.dirs_by_location.insert(location.to_path_buf(), dir);
        log_sched_debug!("Directory opened", dir = dir.0, location = tracing::field::display(location.display()));
        dir
    }

    pub fn directory_ref(&mut self, dir: DirectoryId) {
        if let Some(d) = self.dirs.get_mut(&dir) {
            d.ref_count += 1;
        }
    }

    pub fn directory_unref(&mut self, dir: DirectoryId) {
        let Some(d) = self.dirs.get_mut(&dir) else {
            return;
        };
        if d.ref_count == 0 {
            log_sched_warn!("Directory released more often than referenced", dir = dir.0);
            return;
        }
        d.ref_count -= 1;
        if d.ref_count == 0 {
            self.destroy_directory(dir);
        }
    }

    fn destroy_directory(&mut self, dir: DirectoryId) {
        let Some(d) = self.dirs.get_mut(&dir) else {
            return;
        };
        if !d.monitors.is_empty() || !d.callbacks.is_empty() {
            log_sched_warn!("Directory closed with subscriptions registered", dir = dir.0);
        }
        d.monitors.clear();
        d.callbacks.clear();
        d.monitor_counters = Default::default();
        d.callback_counters = Default::default();
        d.file_list_monitored = false;
        // Keep the directory alive while its fetches unwind.
        d.ref_count = 1;

        for kind in FetchKind::ALL {
            fetch::cancel(self, dir, kind);
        }
        fetch::file_list::drop_pending(self, dir);
        self.admission.forget(dir);

        let Some(d) = self.dirs.remove(&dir) else {
            return;
        };
        assert!(
            d.slots.iter().all(Option::is_none),
            "directory destroyed with fetches in flight"
        );
        assert!(d.queues.is_empty(), "directory destroyed with queued files");
        self.dirs_by_location.remove(&d.location);
        log_sched_debug!("Directory closed", dir = dir.0);
    }

    // --- files -----------------------------------------------------------

    /// File for `location`, created on first use. Adds a reference.
    pub fn file_get(&mut self, location: &Path) -> Result<FileId> {
        if !location.is_absolute() {
            return Err(SchedulerError::BadLocation(location.to_path_buf()));
        }

        let Some(parent) = location.parent() else {
            return Ok(self.root_file(location));
        };
        let name = location
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| SchedulerError::BadLocation(location.to_path_buf()))?;

        let dir = self.directory_get(parent);
        let existing = self.dirs.get(&dir).and_then(|d| d.files_by_name.get(&name).copied());
        if let Some(file) = existing {
            self.file_ref(file);
            self.directory_unref(dir);
            return Ok(file);
        }

        // The reference taken by `directory_get` now belongs to the file.
        let file = self.insert_file(dir, location.to_path_buf(), name, None);
        self.file_ref(file);
        Ok(file)
    }

    /// Self-owned file of a directory with no parent.
    fn root_file(&mut self, location: &Path) -> FileId {
        let dir = self.directory_get(location);
        if let Some(file) = self.dirs.get(&dir).and_then(|d| d.as_file) {
            self.file_ref(file);
            self.directory_unref(dir);
            return file;
        }
        let id = FileId(self.next_id());
        let mut file = File::new(id, dir, location.to_path_buf(), true);
        file.ref_count = 1;
        file.pending_providers = self.providers.all();
        self.files.insert(id, file);
        if let Some(d) = self.dirs.get_mut(&dir) {
            d.as_file = Some(id);
        }
        id
    }

    /// Add a new child of `dir`. Consumes one reference on `dir`.
    fn insert_file(&mut self, dir: DirectoryId, location: PathBuf, name: String, info: Option<EntryInfo>) -> FileId {
        let id = FileId(self.next_id());
        let mut file = File::new(id, dir, location, false);
        if let Some(info) = info {
            file.update_info(info);
        }
        file.pending_providers = self.providers.all();

        if let Some(d) = self.dirs.get_mut(&dir) {
            if d.file_list_monitored {
                file.held_by_listing = true;
                file.ref_count = 1;
            }
            d.add_file(id, name);
            d.queues.enqueue(id);
        }
        self.files.insert(id, file);
        id
    }

    /// New file for an entry produced by a listing of `dir`.
    pub fn new_file_from_info(&mut self, dir: DirectoryId, info: EntryInfo) -> Option<FileId> {
        let location = self.dirs.get(&dir)?.location.join(&info.name);
        let name = info.name.clone();
        self.directory_ref(dir);
        Some(self.insert_file(dir, location, name, Some(info)))
    }

    pub fn file_ref(&mut self, file: FileId) {
        if let Some(f) = self.files.get_mut(&file) {
            f.ref_count += 1;
        }
    }

    pub fn file_unref(&mut self, file: FileId) {
        let Some(f) = self.files.get_mut(&file) else {
            return;
        };
        if f.ref_count == 0 {
            log_sched_warn!("File released more often than referenced", file = file.0);
            return;
        }
        f.ref_count -= 1;
        if f.ref_count == 0 {
            self.destroy_file(file);
        }
    }

    /// Drop the listing's reference on `file`, if it holds one.
    pub fn release_listing_hold(&mut self, file: FileId) {
        let held = match self.files.get_mut(&file) {
            Some(f) if f.held_by_listing => {
                f.held_by_listing = false;
                true
            }
            _ => false,
        };
        if held {
            self.file_unref(file);
        }
    }

    /// Give the listing of `file`'s directory a reference on it.
    pub fn take_listing_hold(&mut self, file: FileId) {
        if let Some(f) = self.files.get_mut(&file) {
            if !f.held_by_listing && !f.self_owned {
                f.held_by_listing = true;
                f.ref_count += 1;
            }
        }
    }

    fn destroy_file(&mut self, file: FileId) {
        let Some(f) = self.files.get(&file) else {
            return;
        };
        let dir = f.directory;
        let name = f.name.clone();

        if let Some(d) = self.dirs.get_mut(&dir) {
            if d.as_file == Some(file) {
                d.as_file = None;
            } else {
                d.remove_file(file, &name);
            }
        }
        let changed = self.destroying_file(dir, file);
        self.files.remove(&file);
        if changed {
            self.state_changed(dir);
        }
        self.directory_unref(dir);
    }

    /// Remove every reference `dir` keeps to a file that is going away.
    /// Returns true if any subscription or fetch was affected.
    fn destroying_file(&mut self, dir: DirectoryId, file: FileId) -> bool {
        let Some(d) = self.dirs.get_mut(&dir) else {
            return false;
        };
        let mut changed = false;

        let mut i = 0;
        while i < d.callbacks.len() {
            if d.callbacks[i].file() == Some(file) {
                if d.callbacks[i].active {
                    log_sched_warn!("Destroyed file has a ready callback pending", file = file.0);
                }
                d.remove_callback_at(i);
                changed = true;
            } else {
                i += 1;
            }
        }

        let mut i = 0;
        while i < d.monitors.len() {
            if d.monitors[i].file == Some(file) {
                log_sched_warn!("Destroyed file is still being monitored", file = file.0);
                let monitor = d.monitors.remove(i);
                d.monitor_counters.remove(monitor.request);
                changed = true;
            } else {
                i += 1;
            }
        }

        for in_flight in d.slots.iter_mut().flatten() {
            if in_flight.file == Some(file) {
                in_flight.file = None;
                changed = true;
            }
        }

        changed
    }

    /// Mark `file` as no longer present in its directory. The caller emits
    /// the change and then calls [`release_listing_hold`](Self::release_listing_hold).
    pub fn mark_gone(&mut self, file: FileId) {
        let Some(f) = self.files.get_mut(&file) else {
            return;
        };
        f.is_gone = true;
        f.unconfirmed = false;
        let dir = f.directory;
        let name = f.name.clone();
        let self_owned = f.self_owned;
        if !self_owned {
            if let Some(d) = self.dirs.get_mut(&dir) {
                d.remove_file(file, &name);
            }
        }
    }

    /// File representing `dir` itself, created if needed. Adds a reference.
    pub fn corresponding_file(&mut self, dir: DirectoryId) -> Option<FileId> {
        let d = self.dirs.get(&dir)?;
        if let Some(file) = d.as_file {
            self.file_ref(file);
            return Some(file);
        }
        let location = d.location.clone();
        self.file_get(&location).ok()
    }

    /// Like [`corresponding_file`](Self::corresponding_file) but never
    /// creates anything and adds no reference.
    pub fn existing_corresponding_file(&self, dir: DirectoryId) -> Option<FileId> {
        let d = self.dirs.get(&dir)?;
        if let Some(file) = d.as_file {
            return Some(file);
        }
        let parent = self.dirs_by_location.get(d.location.parent()?)?;
        let name = d.location.file_name()?.to_string_lossy();
        self.dirs.get(parent)?.files_by_name.get(name.as_ref()).copied()
    }

    // --- dispatch helpers --------------------------------------------------

    /// Run `f` with `dir`'s dispatch loop held off, then dispatch once.
    ///
    /// Used while an in-flight record is detached from its slot, so that a
    /// nested state change cannot start a duplicate fetch in its place.
    pub fn hold_dispatch(&mut self, dir: DirectoryId, f: impl FnOnce(&mut Core)) {
        let Some(d) = self.dirs.get_mut(&dir) else {
            return;
        };
        d.ref_count += 1;
        let was_idle = d.dispatch == DispatchState::Idle;
        if was_idle {
            d.dispatch = DispatchState::Running { rerun: false };
        }

        f(self);

        if was_idle {
            if let Some(d) = self.dirs.get_mut(&dir) {
                d.dispatch = DispatchState::Idle;
            }
        }
        self.state_changed(dir);
        self.directory_unref(dir);
    }

    pub fn schedule(&mut self, task: IdleTask) {
        self.idle.push_back(task);
    }

    /// Hidden per the global preference and the directory's `.hidden`.
    pub fn should_skip(&self, dir: Option<DirectoryId>, info: &EntryInfo) -> bool {
        match dir.and_then(|d| self.dirs.get(&d)) {
            Some(d) => self.should_skip_listed(&d.hidden_names, info),
            None => self.should_skip_listed(&HashSet::new(), info),
        }
    }

    /// Like [`should_skip`](Self::should_skip), for a directory that is not
    /// open and whose `.hidden` names were read separately.
    pub(crate) fn should_skip_listed(&self, hidden_names: &HashSet<String>, info: &EntryInfo) -> bool {
        if self.config.show_hidden_files {
            return false;
        }
        info.is_hidden || info.is_backup || hidden_names.contains(&info.name)
    }
}
