//! Registering interest, and throwing cached state away.

use dirq_config::{log_sched_debug, log_sched_warn};

use crate::error::Result;
use crate::fetch::{self, file_list, FetchKind};
use crate::file::DeepCountStatus;
use crate::ids::{ClientId, DirectoryId, FileId};
use crate::request::{set_up_request, FileAttributes, RequestKind, RequestMask};
use crate::state::Core;
use crate::subscription::{Monitor, ReadyCallback, ReadyHandler};

/// Attributes dropped when the MIME database changes.
const MIME_DATA_INVALIDATES: FileAttributes = FileAttributes::INFO
    .union(FileAttributes::LINK_INFO)
    .union(FileAttributes::DIRECTORY_ITEM_MIME_TYPES);

impl Core {
    // --- monitors --------------------------------------------------------

    pub(crate) fn monitor_add(
        &mut self,
        dir: DirectoryId,
        file: Option<FileId>,
        client: ClientId,
        monitor_hidden: bool,
        attrs: FileAttributes,
    ) -> Result<()> {
        self.check_owner(dir, file)?;

        let mut request = set_up_request(attrs);
        if file.is_none() {
            request.set(RequestKind::FileList);
        }

        let Some(d) = self.dirs.get_mut(&dir) else {
            return Ok(());
        };
        d.remove_monitor(file, client);
        d.add_monitor(Monitor {
            file,
            client,
            request,
            monitor_hidden,
        });
        if request.wants(RequestKind::FileInfo) {
            d.mime_db_subscribed = true;
        }
        if d.watch.is_none() {
            let location = d.location.clone();
            let watch = self.backend.watch(dir, &location, self.sink.clone());
            if let Some(d) = self.dirs.get_mut(&dir) {
                d.watch = watch;
            }
        }

        log_sched_debug!("Monitor added", dir = dir.0, client = client.0);
        match file {
            Some(file) => self.enqueue_file(dir, file),
            None => self.enqueue_all(dir),
        }
        self.state_changed(dir);
        Ok(())
    }

    pub(crate) fn monitor_remove(&mut self, dir: DirectoryId, file: Option<FileId>, client: ClientId) -> Result<()> {
        self.directory(dir)?;
        let Some(d) = self.dirs.get_mut(&dir) else {
            return Ok(());
        };
        if d.remove_monitor(file, client) {
            log_sched_debug!("Monitor removed", dir = dir.0, client = client.0);
        }
        if d.monitors.is_empty() {
            d.watch = None;
        }
        self.state_changed(dir);
        Ok(())
    }

    // --- ready callbacks -------------------------------------------------

    pub(crate) fn call_when_ready(
        &mut self,
        dir: DirectoryId,
        handler: ReadyHandler,
        attrs: FileAttributes,
        wait_for_file_list: bool,
    ) -> Result<()> {
        let file = handler.file();
        self.check_owner(dir, file)?;

        let mut request = set_up_request(attrs);
        if wait_for_file_list {
            request.set(RequestKind::FileList);
        }

        let Some(d) = self.dirs.get_mut(&dir) else {
            return Ok(());
        };
        let duplicate = d.callbacks.iter().any(|cb| cb.active && cb.handler.same_key(&handler));
        if duplicate {
            if handler.has_callback() {
                log_sched_warn!("Ready callback registered twice, keeping the first", dir = dir.0);
            }
            return Ok(());
        }
        d.add_callback(ReadyCallback {
            handler,
            request,
            active: true,
        });

        match file {
            Some(file) => self.enqueue_file(dir, file),
            None => self.enqueue_all(dir),
        }
        self.state_changed(dir);
        Ok(())
    }

    pub(crate) fn cancel_callback(&mut self, dir: DirectoryId, handler: &ReadyHandler) -> Result<()> {
        self.directory(dir)?;
        let Some(d) = self.dirs.get_mut(&dir) else {
            return Ok(());
        };
        let mut i = 0;
        while i < d.callbacks.len() {
            if d.callbacks[i].handler.same_key(handler) {
                d.remove_callback_at(i);
            } else {
                i += 1;
            }
        }
        self.state_changed(dir);
        Ok(())
    }

    pub(crate) fn check_if_ready(&mut self, dir: DirectoryId, file: Option<FileId>, attrs: FileAttributes) -> Result<bool> {
        self.check_owner(dir, file)?;
        Ok(self.request_is_satisfied(dir, file, set_up_request(attrs)))
    }

    /// Any callback or monitor of `dir` covers `file`, directly or as part
    /// of the whole directory.
    pub(crate) fn has_active_request_for_file(&self, dir: DirectoryId, file: FileId) -> bool {
        let Some(d) = self.dirs.get(&dir) else {
            return false;
        };
        let covers = |target: Option<FileId>| target.is_none() || target == Some(file);
        d.callbacks.iter().any(|cb| covers(cb.file())) || d.monitors.iter().any(|m| covers(m.file))
    }

    // --- invalidation ----------------------------------------------------

    fn invalidate_file_internal(&mut self, file: FileId, request: RequestMask) {
        let providers = self.providers.all();
        let Some(f) = self.files.get_mut(&file) else {
            return;
        };
        for kind in request.kinds() {
            match kind {
                RequestKind::FileList => {}
                RequestKind::FileInfo => f.info.invalidate(),
                RequestKind::LinkInfo => f.link_info.invalidate(),
                RequestKind::DirectoryCount => f.directory_count.invalidate(),
                RequestKind::DeepCount => f.deep_counts.status = DeepCountStatus::NotStarted,
                RequestKind::MimeList => f.mime_list.invalidate(),
                RequestKind::TopLeftText | RequestKind::LargeTopLeftText => f.top_left_text.invalidate(),
                RequestKind::ExtensionInfo => f.pending_providers = providers.clone(),
                RequestKind::Thumbnail => f.thumbnail.invalidate(),
                RequestKind::Mount => f.mount.invalidate(),
                RequestKind::FilesystemInfo => f.filesystem_info.invalidate(),
            }
        }
    }

    /// Cancel every in-flight fetch of `dir` serving `request`.
    fn cancel_loading_attributes(&mut self, dir: DirectoryId, request: RequestMask) {
        for kind in fetch::STOP_ORDER {
            if kind.serves(request) {
                fetch::cancel(self, dir, kind);
            }
        }
        self.state_changed(dir);
    }

    /// Drop `attrs` for every file of `dir` and fetch them again if wanted.
    pub(crate) fn invalidate_attributes(&mut self, dir: DirectoryId, attrs: FileAttributes) {
        self.invalidate_directory_files(dir, attrs);
        self.enqueue_all(dir);
        self.state_changed(dir);
    }

    fn invalidate_directory_files(&mut self, dir: DirectoryId, attrs: FileAttributes) {
        let request = set_up_request(attrs);
        self.cancel_loading_attributes(dir, request);
        let Some(d) = self.dirs.get(&dir) else {
            return;
        };
        let files: Vec<FileId> = d.file_list.iter().copied().chain(d.as_file).collect();
        for file in files {
            self.invalidate_file_internal(file, request);
        }
    }

    pub(crate) fn invalidate_file_attributes(&mut self, file: FileId, attrs: FileAttributes) {
        let Some(dir) = self.files.get(&file).map(|f| f.directory) else {
            return;
        };
        self.cancel_loading_file_attributes(file, attrs);
        self.invalidate_file_internal(file, set_up_request(attrs));
        self.enqueue_file(dir, file);
        self.state_changed(dir);
    }

    /// Stop work on `attrs` for one file and take it out of the queues.
    pub(crate) fn cancel_loading_file_attributes(&mut self, file: FileId, attrs: FileAttributes) {
        let Some(dir) = self.files.get(&file).map(|f| f.directory) else {
            return;
        };
        let request = set_up_request(attrs);
        let targeted: Vec<FetchKind> = match self.dirs.get_mut(&dir) {
            Some(d) => {
                d.queues.remove(file);
                fetch::STOP_ORDER
                    .into_iter()
                    .filter(|kind| kind.serves(request))
                    .filter(|kind| d.slot(*kind).map(|s| s.file == Some(file)).unwrap_or(false))
                    .collect()
            }
            None => return,
        };
        for kind in targeted {
            fetch::cancel(self, dir, kind);
        }
        self.state_changed(dir);
    }

    /// Forget `attrs` and the listing, then load everything again.
    pub(crate) fn force_reload(&mut self, dir: DirectoryId, attrs: FileAttributes) {
        if !self.dirs.contains_key(&dir) {
            return;
        }
        log_sched_debug!("Reloading directory", dir = dir.0);
        self.invalidate_directory_files(dir, attrs);

        file_list::cancel(self, dir);
        if let Some(d) = self.dirs.get_mut(&dir) {
            d.directory_loaded = false;
        }
        if let Some(file) = self.existing_corresponding_file(dir) {
            self.invalidate_file_attributes(
                file,
                FileAttributes::DIRECTORY_ITEM_COUNT | FileAttributes::DIRECTORY_ITEM_MIME_TYPES,
            );
        }

        self.enqueue_all(dir);
        self.state_changed(dir);
    }

    /// Reload what depends on content types in every directory that asked
    /// for file info.
    pub(crate) fn mime_data_changed(&mut self) {
        let dirs: Vec<DirectoryId> = self
            .dirs
            .values()
            .filter(|d| d.mime_db_subscribed)
            .map(|d| d.id)
            .collect();
        for dir in dirs {
            self.force_reload(dir, MIME_DATA_INVALIDATES);
        }
    }
}
