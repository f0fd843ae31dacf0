//! Public entry point.
//!
//! [`Scheduler`] is a cheap handle around the single-threaded [`Core`].
//! Collaborators post results onto its channel from wherever they run; the
//! results are applied, and ready-callbacks invoked, only from
//! [`Scheduler::dispatch_pending`] or [`Scheduler::run_until`] on the owning
//! thread.

use std::cell::{RefCell, RefMut};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use dirq_config::log_sched_debug;
use tokio::sync::mpsc::{self, UnboundedReceiver};

use crate::error::{Result, SchedulerError};
use crate::events::DirectoryEvent;
use crate::fetch::{self, file_list, FetchKind};
use crate::file::File;
use crate::ids::{ClientId, DirectoryId, FileId};
use crate::io::{CompletionSink, EntryInfo, FsBackend, Message};
use crate::provider::ProviderRegistry;
use crate::queue::Tier;
use crate::request::{FileAttributes, RequestKind};
use crate::settings::SchedulerConfig;
use crate::state::{Core, IdleTask};
use crate::subscription::ReadyHandler;

struct Shared {
    core: RefCell<Core>,
    /// Taken out while `run_until` awaits the next message.
    inbox: RefCell<Option<UnboundedReceiver<Message>>>,
}

/// The receiver, borrowed out of its slot for one await. Put back on drop,
/// so a cancelled `run_until` loses nothing.
struct Inbox<'a> {
    slot: &'a RefCell<Option<UnboundedReceiver<Message>>>,
    rx: Option<UnboundedReceiver<Message>>,
}

impl<'a> Inbox<'a> {
    fn take(slot: &'a RefCell<Option<UnboundedReceiver<Message>>>) -> Option<Self> {
        let rx = slot.borrow_mut().take()?;
        Some(Self { slot, rx: Some(rx) })
    }

    async fn recv(&mut self) -> Option<Message> {
        self.rx.as_mut()?.recv().await
    }
}

impl Drop for Inbox<'_> {
    fn drop(&mut self) {
        *self.slot.borrow_mut() = self.rx.take();
    }
}

/// Directory attribute-fetch scheduler.
///
/// Cloning yields another handle to the same scheduler.
#[derive(Clone)]
pub struct Scheduler {
    shared: Rc<Shared>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, backend: Rc<dyn FsBackend>) -> Self {
        Self::with_providers(config, backend, ProviderRegistry::new())
    }

    pub fn with_providers(config: SchedulerConfig, backend: Rc<dyn FsBackend>, providers: ProviderRegistry) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        log_sched_debug!(
            "Scheduler created",
            max_jobs = config.max_jobs,
            providers = providers.all().len()
        );
        let core = Core::new(config, backend, providers, CompletionSink::new(tx));
        Self {
            shared: Rc::new(Shared {
                core: RefCell::new(core),
                inbox: RefCell::new(Some(rx)),
            }),
        }
    }

    fn core(&self) -> RefMut<'_, Core> {
        self.shared.core.borrow_mut()
    }

    // --- directories and files ---------------------------------------------

    /// Directory at `location`, created on first use. The caller owns one
    /// reference and must release it with [`Scheduler::directory_unref`].
    pub fn directory_get(&self, location: impl AsRef<Path>) -> Result<DirectoryId> {
        let location = location.as_ref();
        if !location.is_absolute() {
            return Err(SchedulerError::BadLocation(location.to_path_buf()));
        }
        Ok(self.core().directory_get(location))
    }

    pub fn directory_ref(&self, dir: DirectoryId) {
        self.core().directory_ref(dir);
    }

    pub fn directory_unref(&self, dir: DirectoryId) {
        self.core().directory_unref(dir);
    }

    pub fn directory_location(&self, dir: DirectoryId) -> Option<PathBuf> {
        self.core().dirs.get(&dir).map(|d| d.location.clone())
    }

    /// Files currently known to `dir`, in insertion order.
    pub fn directory_files(&self, dir: DirectoryId) -> Vec<FileId> {
        self.core().dirs.get(&dir).map(|d| d.file_list.clone()).unwrap_or_default()
    }

    pub fn find_file(&self, dir: DirectoryId, name: &str) -> Option<FileId> {
        self.core().dirs.get(&dir).and_then(|d| d.files_by_name.get(name).copied())
    }

    /// A complete listing has been delivered since the last reload.
    pub fn is_directory_loaded(&self, dir: DirectoryId) -> bool {
        self.core()
            .dirs
            .get(&dir)
            .map(|d| d.directory_loaded && d.directory_loaded_sent_notification)
            .unwrap_or(false)
    }

    /// File at `location`, created on first use. The caller owns one
    /// reference and must release it with [`Scheduler::file_unref`].
    pub fn file_get(&self, location: impl AsRef<Path>) -> Result<FileId> {
        self.core().file_get(location.as_ref())
    }

    pub fn file_ref(&self, file: FileId) {
        self.core().file_ref(file);
    }

    pub fn file_unref(&self, file: FileId) {
        self.core().file_unref(file);
    }

    /// Read a file's cached state.
    pub fn with_file<R>(&self, file: FileId, f: impl FnOnce(&File) -> R) -> Option<R> {
        self.core().files.get(&file).map(f)
    }

    /// Apply metadata obtained elsewhere.
    pub fn file_update_info(&self, file: FileId, info: EntryInfo) -> Result<()> {
        let mut core = self.core();
        let f = core.files.get_mut(&file).ok_or(SchedulerError::UnknownFile(file))?;
        let dir = f.directory;
        if f.update_info(info) {
            core.file_changed(file);
            core.state_changed(dir);
        }
        Ok(())
    }

    /// Fall back to decoding the file itself when its cached thumbnail
    /// cannot be loaded.
    pub fn set_thumbnail_wants_original(&self, file: FileId, wants: bool) -> Result<()> {
        let mut core = self.core();
        let f = core.files.get_mut(&file).ok_or(SchedulerError::UnknownFile(file))?;
        f.thumbnail_wants_original = wants;
        Ok(())
    }

    // --- requests ----------------------------------------------------------

    /// Keep `attrs` fresh for `file`, or for every file of `dir` plus the
    /// file list when `file` is `None`, until the monitor is removed.
    pub fn monitor_add(
        &self,
        dir: DirectoryId,
        file: Option<FileId>,
        client: ClientId,
        monitor_hidden: bool,
        attrs: FileAttributes,
    ) -> Result<()> {
        self.core().monitor_add(dir, file, client, monitor_hidden, attrs)
    }

    pub fn monitor_remove(&self, dir: DirectoryId, file: Option<FileId>, client: ClientId) -> Result<()> {
        self.core().monitor_remove(dir, file, client)
    }

    /// Invoke `handler` once `attrs` are known. `wait_for_file_list` also
    /// waits for a complete listing of `dir`.
    pub fn call_when_ready(
        &self,
        dir: DirectoryId,
        handler: ReadyHandler,
        attrs: FileAttributes,
        wait_for_file_list: bool,
    ) -> Result<()> {
        self.core().call_when_ready(dir, handler, attrs, wait_for_file_list)
    }

    pub fn cancel_callback(&self, dir: DirectoryId, handler: &ReadyHandler) -> Result<()> {
        self.core().cancel_callback(dir, handler)
    }

    pub fn check_if_ready(&self, dir: DirectoryId, file: Option<FileId>, attrs: FileAttributes) -> Result<bool> {
        self.core().check_if_ready(dir, file, attrs)
    }

    pub fn has_active_request_for_file(&self, dir: DirectoryId, file: FileId) -> bool {
        self.core().has_active_request_for_file(dir, file)
    }

    pub fn force_reload(&self, dir: DirectoryId, attrs: FileAttributes) {
        self.core().force_reload(dir, attrs);
    }

    pub fn invalidate_attributes(&self, dir: DirectoryId, attrs: FileAttributes) {
        self.core().invalidate_attributes(dir, attrs);
    }

    pub fn invalidate_file_attributes(&self, file: FileId, attrs: FileAttributes) {
        self.core().invalidate_file_attributes(file, attrs);
    }

    pub fn cancel_loading_file_attributes(&self, file: FileId, attrs: FileAttributes) {
        self.core().cancel_loading_file_attributes(file, attrs);
    }

    /// The content-type database changed.
    pub fn mime_data_changed(&self) {
        self.core().mime_data_changed();
    }

    // --- observation -------------------------------------------------------

    pub fn subscribe(&self) -> UnboundedReceiver<DirectoryEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.core().subscribe(tx);
        rx
    }

    /// Jobs holding an admission slot.
    pub fn in_flight(&self) -> usize {
        self.core().admission.in_flight()
    }

    /// Directories parked until a slot frees up, oldest first.
    pub fn waiting_directories(&self) -> Vec<DirectoryId> {
        self.core().admission.waiting().collect()
    }

    pub fn is_fetching(&self, dir: DirectoryId, kind: FetchKind) -> bool {
        self.core().dirs.get(&dir).map(|d| d.slot(kind).is_some()).unwrap_or(false)
    }

    /// Subscriptions of `dir` wanting `kind`.
    pub fn request_count(&self, dir: DirectoryId, kind: RequestKind) -> u32 {
        self.core().dirs.get(&dir).map(|d| d.request_count(kind)).unwrap_or(0)
    }

    pub fn queued_tier(&self, dir: DirectoryId, file: FileId) -> Option<Tier> {
        self.core().dirs.get(&dir).and_then(|d| d.queues.tier_of(file))
    }

    // --- main loop ---------------------------------------------------------

    /// Apply every delivery that has arrived and run deferred work until
    /// nothing is left. Returns the number of items handled.
    pub fn dispatch_pending(&self) -> usize {
        let mut handled = 0;
        loop {
            let message = self
                .shared
                .inbox
                .borrow_mut()
                .as_mut()
                .and_then(|rx| rx.try_recv().ok());
            if let Some(message) = message {
                self.handle(message);
                handled += 1;
                continue;
            }

            let task = self.core().idle.pop_front();
            match task {
                Some(task) => {
                    self.run_idle(task);
                    handled += 1;
                }
                None => return handled,
            }
        }
    }

    /// Keep dispatching until `done` holds, waiting for deliveries in
    /// between.
    pub async fn run_until(&self, mut done: impl FnMut(&Scheduler) -> bool) {
        loop {
            self.dispatch_pending();
            if done(self) {
                return;
            }

            let Some(mut inbox) = Inbox::take(&self.shared.inbox) else {
                return;
            };
            let message = inbox.recv().await;
            drop(inbox);
            match message {
                Some(message) => self.handle(message),
                None => return,
            }
        }
    }

    fn handle(&self, message: Message) {
        let mut core = self.core();
        match message {
            Message::Fetch { ticket, outcome } => fetch::complete(&mut core, ticket, outcome),
            Message::Provider {
                dir,
                provider,
                handle,
                attributes,
            } => fetch::provider_response(&mut core, dir, provider, handle, attributes),
            Message::Watch { dir, change } => {
                if core.dirs.contains_key(&dir) {
                    file_list::watch_event(&mut core, dir, change);
                }
            }
        }
    }

    fn run_idle(&self, task: IdleTask) {
        match task {
            IdleTask::CallReadyCallbacks(dir) => {
                {
                    let mut core = self.core();
                    let Some(d) = core.dirs.get_mut(&dir) else {
                        return;
                    };
                    d.call_ready_scheduled = false;
                    core.directory_ref(dir);
                }
                // Callbacks run without the core borrowed and may call back in.
                loop {
                    let call = self.core().take_ready_call(dir);
                    match call {
                        Some(call) => call.invoke(self),
                        None => break,
                    }
                }
                let mut core = self.core();
                core.state_changed(dir);
                core.directory_unref(dir);
            }
            IdleTask::DequeuePending(dir) => {
                let mut core = self.core();
                let Some(d) = core.dirs.get_mut(&dir) else {
                    return;
                };
                if !d.dequeue_pending_scheduled {
                    return;
                }
                d.dequeue_pending_scheduled = false;
                file_list::dequeue_pending(&mut core, dir);
                core.state_changed(dir);
            }
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.shared.core.try_borrow() {
            Ok(core) => f
                .debug_struct("Scheduler")
                .field("directories", &core.dirs.len())
                .field("files", &core.files.len())
                .field("in_flight", &core.admission.in_flight())
                .finish(),
            Err(_) => f.write_str("Scheduler { .. }"),
        }
    }
}
