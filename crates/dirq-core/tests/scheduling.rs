//! Scheduler behaviour driven through the in-memory backend.
//!
//! Every test answers the recorded backend requests by hand and then runs
//! `dispatch_pending`, so interleavings are fully deterministic.

use std::cell::{Cell, RefCell};
use std::path::Path;
use std::rc::Rc;

use dirq_core::io::{ListingEvent, Thumbnail, WatchChange};
use dirq_core::provider::{InfoProvider, ProviderFile, ProviderHandle, ProviderRegistry, ProviderResponder, ProviderResult};
use dirq_core::subscription::{DirectoryCallback, FileCallback};
use dirq_core::testing::{MockBackend, Op, OpKind};
use dirq_core::{
    ClientId, DirectoryEvent, DirectoryId, EntryInfo, FetchKind, File, FileAttributes, FileId, FileType, IoFailure,
    Outcome, ReadyHandler, RequestKind, Scheduler, SchedulerConfig,
};
use tokio::sync::mpsc::UnboundedReceiver;

fn scheduler(max_jobs: usize) -> (Scheduler, Rc<MockBackend>) {
    let backend = Rc::new(MockBackend::new());
    let config = SchedulerConfig {
        max_jobs,
        ..SchedulerConfig::default()
    };
    (Scheduler::new(config, backend.clone()), backend)
}

fn entry(name: &str, file_type: FileType) -> EntryInfo {
    let mut info = EntryInfo::named(name, file_type);
    info.size = 1;
    info.mtime = 1_700_000_000;
    info
}

fn listing(backend: &MockBackend, location: &str) -> Op {
    backend
        .find(FetchKind::FileList, location)
        .unwrap_or_else(|| panic!("no listing requested for {location}"))
}

/// Answer a listing with one batch and a clean end.
fn finish_listing(backend: &MockBackend, op: &Op, entries: Vec<EntryInfo>) {
    backend.reply(op, Outcome::Listing(ListingEvent::Opened(Ok(()))));
    if !entries.is_empty() {
        backend.reply(op, Outcome::Listing(ListingEvent::Batch(entries)));
    }
    backend.reply(op, Outcome::Listing(ListingEvent::Finished(None)));
}

fn drain(rx: &mut UnboundedReceiver<DirectoryEvent>) -> Vec<DirectoryEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn counting_file_callback() -> (FileCallback, Rc<Cell<u32>>) {
    let calls = Rc::new(Cell::new(0));
    let counter = calls.clone();
    let callback: FileCallback = Rc::new(move |_: &Scheduler, _: FileId| counter.set(counter.get() + 1));
    (callback, calls)
}

fn open_file(scheduler: &Scheduler, location: &str) -> (FileId, DirectoryId) {
    let file = scheduler.file_get(location).unwrap();
    let dir = scheduler.with_file(file, File::directory).unwrap();
    (file, dir)
}

/// Provider giving a fixed answer and recording every request.
struct ScriptedProvider {
    name: &'static str,
    answer: ProviderResult,
    log: Rc<RefCell<Vec<String>>>,
    responder: RefCell<Option<ProviderResponder>>,
    cancelled: RefCell<Vec<ProviderHandle>>,
}

impl ScriptedProvider {
    fn new(name: &'static str, answer: ProviderResult, log: &Rc<RefCell<Vec<String>>>) -> Rc<Self> {
        Rc::new(Self {
            name,
            answer,
            log: log.clone(),
            responder: RefCell::new(None),
            cancelled: RefCell::new(Vec::new()),
        })
    }

    fn respond(&self, handle: ProviderHandle, attributes: Option<Vec<(String, String)>>) {
        let responder = self.responder.borrow().clone().expect("provider was never asked");
        responder.respond(handle, attributes);
    }
}

impl InfoProvider for ScriptedProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn update_file_info(&self, file: &ProviderFile<'_>, responder: ProviderResponder) -> ProviderResult {
        self.log.borrow_mut().push(format!("{}:{}", self.name, file.name));
        *self.responder.borrow_mut() = Some(responder);
        self.answer.clone()
    }

    fn cancel_update(&self, handle: ProviderHandle) {
        self.cancelled.borrow_mut().push(handle);
    }
}

fn scheduler_with_providers(providers: &[Rc<ScriptedProvider>]) -> (Scheduler, Rc<MockBackend>) {
    let backend = Rc::new(MockBackend::new());
    let mut registry = ProviderRegistry::new();
    for provider in providers {
        registry.register(provider.clone());
    }
    (
        Scheduler::with_providers(SchedulerConfig::default(), backend.clone(), registry),
        backend,
    )
}

fn attribute(key: &str, value: &str) -> (String, String) {
    (key.to_string(), value.to_string())
}

/// A known directory entry at `location`, opened as a file.
fn open_directory_entry(scheduler: &Scheduler, location: &str) -> (FileId, DirectoryId) {
    let (file, dir) = open_file(scheduler, location);
    let name = Path::new(location).file_name().unwrap().to_str().unwrap();
    scheduler.file_update_info(file, entry(name, FileType::Directory)).unwrap();
    (file, dir)
}

#[test]
fn test_ready_callback_fires_after_listing() {
    let (scheduler, backend) = scheduler(10);
    let mut events = scheduler.subscribe();
    let dir = scheduler.directory_get("/data").unwrap();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let callback: DirectoryCallback = Rc::new(move |s: &Scheduler, _: DirectoryId, files: &[FileId]| {
        // Files are still alive while the callback runs.
        let names: Vec<String> = files
            .iter()
            .filter_map(|f| s.with_file(*f, |f| f.name().to_string()))
            .collect();
        sink.borrow_mut().push(names);
    });
    scheduler
        .call_when_ready(dir, ReadyHandler::WholeDirectory(Some(callback)), FileAttributes::INFO, true)
        .unwrap();

    assert!(scheduler.is_fetching(dir, FetchKind::FileList));
    assert_eq!(scheduler.in_flight(), 1);
    let op = listing(&backend, "/data");
    assert_eq!(op.kind, OpKind::Enumerate { batch_size: 100 });

    finish_listing(
        &backend,
        &op,
        vec![entry("a.txt", FileType::Regular), entry("b", FileType::Directory)],
    );
    assert!(seen.borrow().is_empty(), "nothing is applied before dispatch");

    scheduler.dispatch_pending();

    assert_eq!(*seen.borrow(), vec![vec!["a.txt".to_string(), "b".to_string()]]);
    assert_eq!(scheduler.in_flight(), 0);

    let events = drain(&mut events);
    assert!(events
        .iter()
        .any(|e| matches!(e, DirectoryEvent::FilesAdded { files, .. } if files.len() == 2)));
    assert!(events.contains(&DirectoryEvent::DoneLoading { dir }));

    // Nobody wants the file list any more, so the listing lets go of it.
    assert!(scheduler.directory_files(dir).is_empty());
    assert!(!scheduler.is_directory_loaded(dir));
    scheduler.directory_unref(dir);
}

#[test]
fn test_admission_wakes_parked_directories_in_order() {
    let (scheduler, backend) = scheduler(1);
    let dirs: Vec<DirectoryId> = ["/a", "/b", "/c"]
        .iter()
        .map(|p| scheduler.directory_get(p).unwrap())
        .collect();
    for dir in &dirs {
        scheduler
            .call_when_ready(*dir, ReadyHandler::WholeDirectory(None), FileAttributes::NONE, true)
            .unwrap();
    }

    assert_eq!(scheduler.in_flight(), 1);
    assert_eq!(scheduler.waiting_directories(), vec![dirs[1], dirs[2]]);
    let live = backend.live(FetchKind::FileList);
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].location, Path::new("/a"));

    finish_listing(&backend, &live[0], Vec::new());
    scheduler.dispatch_pending();

    assert_eq!(scheduler.in_flight(), 1);
    assert_eq!(scheduler.waiting_directories(), vec![dirs[2]]);
    let live = backend.live(FetchKind::FileList);
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].location, Path::new("/b"));

    finish_listing(&backend, &live[0], Vec::new());
    scheduler.dispatch_pending();

    assert!(scheduler.waiting_directories().is_empty());
    let live = backend.live(FetchKind::FileList);
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].location, Path::new("/c"));

    finish_listing(&backend, &live[0], Vec::new());
    scheduler.dispatch_pending();
    assert_eq!(scheduler.in_flight(), 0);

    for dir in dirs {
        scheduler.directory_unref(dir);
    }
}

#[test]
fn test_stale_listing_delivery_is_dropped() {
    let (scheduler, backend) = scheduler(10);
    let dir = scheduler.directory_get("/data").unwrap();

    let fired = Rc::new(Cell::new(0));
    let counter = fired.clone();
    let callback: DirectoryCallback =
        Rc::new(move |_: &Scheduler, _: DirectoryId, _: &[FileId]| counter.set(counter.get() + 1));
    let handler = ReadyHandler::WholeDirectory(Some(callback));

    scheduler
        .call_when_ready(dir, handler.clone(), FileAttributes::NONE, true)
        .unwrap();
    let first = listing(&backend, "/data");

    scheduler.cancel_callback(dir, &handler).unwrap();
    assert!(first.is_cancelled());
    assert_eq!(scheduler.in_flight(), 0);

    scheduler
        .call_when_ready(dir, handler.clone(), FileAttributes::NONE, true)
        .unwrap();
    let live = backend.live(FetchKind::FileList);
    assert_eq!(live.len(), 1);
    let second = live[0].clone();

    // The first listing answers late.
    finish_listing(&backend, &first, vec![entry("stale.txt", FileType::Regular)]);
    scheduler.dispatch_pending();

    assert_eq!(scheduler.find_file(dir, "stale.txt"), None);
    assert!(scheduler.is_fetching(dir, FetchKind::FileList));
    assert_eq!(scheduler.in_flight(), 1);
    assert_eq!(fired.get(), 0);

    finish_listing(&backend, &second, vec![entry("fresh.txt", FileType::Regular)]);
    scheduler.dispatch_pending();
    assert_eq!(fired.get(), 1);
    assert_eq!(scheduler.in_flight(), 0);
    scheduler.directory_unref(dir);
}

#[test]
fn test_monitor_tracks_watch_changes() {
    let (scheduler, backend) = scheduler(10);
    let mut events = scheduler.subscribe();
    let dir = scheduler.directory_get("/data").unwrap();

    scheduler
        .monitor_add(dir, None, ClientId(1), false, FileAttributes::INFO)
        .unwrap();
    assert_eq!(backend.live_watches(), 1);

    let op = listing(&backend, "/data");
    finish_listing(&backend, &op, vec![entry("a.txt", FileType::Regular)]);
    scheduler.dispatch_pending();
    assert!(scheduler.is_directory_loaded(dir));
    assert_eq!(scheduler.directory_files(dir).len(), 1);
    drain(&mut events);

    assert!(backend.emit_watch(dir, WatchChange::Created(entry("new.txt", FileType::Regular))));
    scheduler.dispatch_pending();
    let new = scheduler.find_file(dir, "new.txt").expect("created file is listed");
    assert!(drain(&mut events).contains(&DirectoryEvent::FilesAdded { dir, files: vec![new] }));

    let a = scheduler.find_file(dir, "a.txt").unwrap();
    assert!(backend.emit_watch(dir, WatchChange::Removed("/data/a.txt".into())));
    scheduler.dispatch_pending();
    assert_eq!(scheduler.find_file(dir, "a.txt"), None);
    assert!(drain(&mut events).contains(&DirectoryEvent::FilesChanged { dir, files: vec![a] }));

    scheduler.monitor_remove(dir, None, ClientId(1)).unwrap();
    assert_eq!(backend.live_watches(), 0);
    assert!(scheduler.directory_files(dir).is_empty());
    assert!(!backend.emit_watch(dir, WatchChange::Removed("/data/new.txt".into())));
    scheduler.directory_unref(dir);
}

#[test]
fn test_duplicate_ready_callback_is_ignored() {
    let (scheduler, backend) = scheduler(10);
    let (file, dir) = open_file(&scheduler, "/data/x.txt");
    let (callback, calls) = counting_file_callback();
    let handler = ReadyHandler::SingleFile(file, Some(callback));

    scheduler
        .call_when_ready(dir, handler.clone(), FileAttributes::INFO, false)
        .unwrap();
    scheduler.call_when_ready(dir, handler, FileAttributes::INFO, false).unwrap();
    assert_eq!(scheduler.request_count(dir, RequestKind::FileInfo), 1);

    let queries = backend.live(FetchKind::FileInfo);
    assert_eq!(queries.len(), 1);
    backend.reply(&queries[0], Outcome::Info(Ok(entry("x.txt", FileType::Regular))));
    scheduler.dispatch_pending();

    assert_eq!(calls.get(), 1);
    assert_eq!(scheduler.request_count(dir, RequestKind::FileInfo), 0);
    assert_eq!(scheduler.with_file(file, |f| f.size()), Some(1));
    scheduler.file_unref(file);
}

#[test]
fn test_missing_file_is_marked_gone() {
    let (scheduler, backend) = scheduler(10);
    let (file, dir) = open_file(&scheduler, "/data/x.txt");
    let (callback, calls) = counting_file_callback();

    scheduler
        .call_when_ready(dir, ReadyHandler::SingleFile(file, Some(callback)), FileAttributes::INFO, false)
        .unwrap();
    let query = backend.find(FetchKind::FileInfo, "/data/x.txt").unwrap();
    assert_eq!(query.kind, OpKind::QueryInfo);

    backend.reply(&query, Outcome::Info(Err(IoFailure::NotFound)));
    scheduler.dispatch_pending();

    // A failed fetch still counts as known.
    assert_eq!(calls.get(), 1);
    assert_eq!(scheduler.with_file(file, File::is_gone), Some(true));
    assert_eq!(
        scheduler.with_file(file, |f| f.get_info_error().cloned()),
        Some(Some(IoFailure::NotFound))
    );
    assert_eq!(scheduler.find_file(dir, "x.txt"), None);
    scheduler.file_unref(file);
}

#[test]
fn test_force_reload_drops_files_missing_from_new_listing() {
    let (scheduler, backend) = scheduler(10);
    let mut events = scheduler.subscribe();
    let dir = scheduler.directory_get("/data").unwrap();
    scheduler
        .monitor_add(dir, None, ClientId(1), false, FileAttributes::INFO)
        .unwrap();

    let first = listing(&backend, "/data");
    finish_listing(
        &backend,
        &first,
        vec![entry("a.txt", FileType::Regular), entry("b.txt", FileType::Regular)],
    );
    scheduler.dispatch_pending();
    let a = scheduler.find_file(dir, "a.txt").unwrap();
    drain(&mut events);

    scheduler.force_reload(dir, FileAttributes::INFO);
    assert!(!scheduler.is_directory_loaded(dir));
    let second = listing(&backend, "/data");
    assert!(!second.is_cancelled());
    // File info was dropped too and is being fetched again.
    let query = backend.find(FetchKind::FileInfo, "/data/a.txt").unwrap();

    finish_listing(&backend, &second, vec![entry("b.txt", FileType::Regular)]);
    scheduler.dispatch_pending();

    assert_eq!(scheduler.find_file(dir, "a.txt"), None);
    assert!(scheduler.find_file(dir, "b.txt").is_some());
    assert!(scheduler.is_directory_loaded(dir));
    let events = drain(&mut events);
    assert!(events
        .iter()
        .any(|e| matches!(e, DirectoryEvent::FilesChanged { files, .. } if files.contains(&a))));
    assert!(events.contains(&DirectoryEvent::DoneLoading { dir }));

    // The query for the vanished file is abandoned.
    assert!(query.is_cancelled());
    assert_eq!(scheduler.in_flight(), 0);

    scheduler.monitor_remove(dir, None, ClientId(1)).unwrap();
    scheduler.directory_unref(dir);
}

#[test]
fn test_low_tier_waits_for_file_info() {
    let (scheduler, backend) = scheduler(10);
    let (file, dir) = open_file(&scheduler, "/data/notes.txt");

    scheduler
        .call_when_ready(
            dir,
            ReadyHandler::SingleFile(file, None),
            FileAttributes::TOP_LEFT_TEXT,
            false,
        )
        .unwrap();
    assert_eq!(scheduler.queued_tier(dir, file), Some(dirq_core::Tier::High));
    assert!(backend.live(FetchKind::TopLeftText).is_empty());

    let mut info = entry("notes.txt", FileType::Regular);
    info.content_type = Some("text/plain".into());
    let query = backend.find(FetchKind::FileInfo, "/data/notes.txt").unwrap();
    backend.reply(&query, Outcome::Info(Ok(info)));
    scheduler.dispatch_pending();

    let read = backend.find(FetchKind::TopLeftText, "/data/notes.txt").unwrap();
    assert!(matches!(read.kind, OpKind::LoadContents(limit) if limit.max_lines == Some(5)));
    assert_eq!(scheduler.queued_tier(dir, file), Some(dirq_core::Tier::Low));

    backend.reply(&read, Outcome::Contents(Ok(b"first line\nsecond\n".to_vec())));
    scheduler.dispatch_pending();

    assert_eq!(
        scheduler.with_file(file, |f| f.top_left_text().value().cloned()),
        Some(Some("first line\nsecond".to_string()))
    );
    assert!(scheduler
        .check_if_ready(dir, Some(file), FileAttributes::TOP_LEFT_TEXT)
        .unwrap());
    assert_eq!(scheduler.in_flight(), 0);
    scheduler.file_unref(file);
}

#[test]
fn test_removing_last_monitor_cancels_count() {
    let (scheduler, backend) = scheduler(10);
    let (file, dir) = open_file(&scheduler, "/data/sub");
    scheduler
        .file_update_info(file, entry("sub", FileType::Directory))
        .unwrap();

    scheduler
        .monitor_add(dir, Some(file), ClientId(7), false, FileAttributes::DIRECTORY_ITEM_COUNT)
        .unwrap();
    let count = backend.find(FetchKind::DirectoryCount, "/data/sub").unwrap();
    assert!(matches!(count.kind, OpKind::Enumerate { .. }));
    assert_eq!(scheduler.in_flight(), 1);

    scheduler.monitor_remove(dir, Some(file), ClientId(7)).unwrap();
    assert!(count.is_cancelled());
    assert_eq!(scheduler.in_flight(), 0);
    assert!(!scheduler.is_fetching(dir, FetchKind::DirectoryCount));

    // A late answer changes nothing.
    backend.reply(&count, Outcome::Listing(ListingEvent::Finished(None)));
    scheduler.dispatch_pending();
    assert_eq!(scheduler.with_file(file, |f| f.directory_count().is_up_to_date()), Some(false));
    scheduler.file_unref(file);
}

#[test]
fn test_link_info_settles_without_io_for_plain_files() {
    let (scheduler, backend) = scheduler(10);
    let (file, dir) = open_file(&scheduler, "/data/readme.txt");
    let (callback, calls) = counting_file_callback();
    scheduler
        .call_when_ready(
            dir,
            ReadyHandler::SingleFile(file, Some(callback)),
            FileAttributes::INFO | FileAttributes::LINK_INFO,
            false,
        )
        .unwrap();

    let mut info = entry("readme.txt", FileType::Regular);
    info.content_type = Some("text/plain".into());
    let query = backend.find(FetchKind::FileInfo, "/data/readme.txt").unwrap();
    backend.reply(&query, Outcome::Info(Ok(info)));
    scheduler.dispatch_pending();

    assert_eq!(calls.get(), 1);
    assert!(backend.find(FetchKind::LinkInfo, "/data/readme.txt").is_none());
    assert_eq!(
        scheduler.with_file(file, |f| f.link_info().state()),
        Some(dirq_core::AttrState::Unknowable)
    );
    scheduler.file_unref(file);
}

#[test]
fn test_file_released_during_mount_lookup() {
    let (scheduler, backend) = scheduler(10);
    let (file, dir) = open_file(&scheduler, "/data/mnt");
    let mut info = entry("mnt", FileType::Directory);
    info.is_mountpoint = true;
    scheduler.file_update_info(file, info).unwrap();

    scheduler
        .call_when_ready(dir, ReadyHandler::SingleFile(file, None), FileAttributes::MOUNT, false)
        .unwrap();
    let lookup = backend.find(FetchKind::Mount, "/data/mnt").unwrap();
    assert_eq!(lookup.kind, OpKind::FindEnclosingMount);

    // Keep the directory open while its only file goes away.
    scheduler.directory_ref(dir);
    scheduler.file_unref(file);
    assert_eq!(scheduler.with_file(file, |_| ()), None);
    assert_eq!(scheduler.in_flight(), 0);

    backend.reply(&lookup, Outcome::Mount(Ok(None)));
    assert!(scheduler.dispatch_pending() >= 1);
    assert_eq!(scheduler.find_file(dir, "mnt"), None);
    scheduler.directory_unref(dir);
}

#[test]
fn test_satisfied_callback_fires_without_io() {
    let (scheduler, backend) = scheduler(10);
    let (file, dir) = open_file(&scheduler, "/data/known.txt");
    scheduler
        .file_update_info(file, entry("known.txt", FileType::Regular))
        .unwrap();
    let (callback, calls) = counting_file_callback();

    scheduler
        .call_when_ready(dir, ReadyHandler::SingleFile(file, Some(callback)), FileAttributes::INFO, false)
        .unwrap();
    assert!(backend.ops().is_empty());
    assert_eq!(calls.get(), 0, "callbacks never fire from inside registration");

    scheduler.dispatch_pending();
    assert_eq!(calls.get(), 1);
    assert!(backend.ops().is_empty());
    scheduler.file_unref(file);
}

#[test]
fn test_item_count_of_plain_file_settles_without_io() {
    let (scheduler, backend) = scheduler(10);
    let (file, dir) = open_file(&scheduler, "/data/readme.txt");
    scheduler
        .file_update_info(file, entry("readme.txt", FileType::Regular))
        .unwrap();
    let (callback, calls) = counting_file_callback();

    scheduler
        .call_when_ready(
            dir,
            ReadyHandler::SingleFile(file, Some(callback)),
            FileAttributes::DIRECTORY_ITEM_COUNT,
            false,
        )
        .unwrap();
    scheduler.dispatch_pending();

    assert_eq!(calls.get(), 1);
    assert!(backend.ops().is_empty());
    assert_eq!(
        scheduler.with_file(file, |f| f.directory_count().state()),
        Some(dirq_core::AttrState::Unknowable)
    );
    assert_eq!(scheduler.request_count(dir, RequestKind::DirectoryCount), 0);
    scheduler.file_unref(file);
}

#[test]
fn test_item_count_resolves_once_info_arrives() {
    let (scheduler, backend) = scheduler(10);
    let (file, dir) = open_file(&scheduler, "/data/x.txt");
    scheduler
        .monitor_add(
            dir,
            Some(file),
            ClientId(1),
            false,
            FileAttributes::INFO | FileAttributes::DIRECTORY_ITEM_COUNT,
        )
        .unwrap();
    // File info goes first; the count waits behind it.
    assert!(backend.live(FetchKind::DirectoryCount).is_empty());

    let query = backend.find(FetchKind::FileInfo, "/data/x.txt").unwrap();
    backend.reply(&query, Outcome::Info(Ok(EntryInfo::named("x.txt", FileType::Regular))));
    scheduler.dispatch_pending();

    assert_eq!(
        scheduler.with_file(file, |f| f.directory_count().is_up_to_date()),
        Some(true)
    );
    assert_eq!(scheduler.with_file(file, |f| f.directory_count().failed()), Some(false));
    assert!(backend.find(FetchKind::DirectoryCount, "/data/x.txt").is_none());
    assert_eq!(scheduler.in_flight(), 0);

    scheduler.monitor_remove(dir, Some(file), ClientId(1)).unwrap();
    scheduler.file_unref(file);
}

#[test]
fn test_item_count_with_unknown_type_enumerates() {
    let (scheduler, backend) = scheduler(10);
    let (file, dir) = open_file(&scheduler, "/data/sub");
    let (callback, calls) = counting_file_callback();

    scheduler
        .call_when_ready(
            dir,
            ReadyHandler::SingleFile(file, Some(callback)),
            FileAttributes::DIRECTORY_ITEM_COUNT,
            false,
        )
        .unwrap();
    let count = backend.find(FetchKind::DirectoryCount, "/data/sub").unwrap();
    assert!(matches!(count.kind, OpKind::Enumerate { .. }));
    assert!(backend.live(FetchKind::FileInfo).is_empty());

    finish_listing(
        &backend,
        &count,
        vec![
            entry("a", FileType::Regular),
            entry("b", FileType::Regular),
            entry("c", FileType::Directory),
        ],
    );
    scheduler.dispatch_pending();

    assert_eq!(calls.get(), 1);
    assert_eq!(
        scheduler.with_file(file, |f| f.directory_count().value().copied()),
        Some(Some(3))
    );
    assert_eq!(scheduler.in_flight(), 0);
    scheduler.file_unref(file);
}

#[test]
fn test_share_root_never_counts() {
    let (scheduler, backend) = scheduler(10);
    let (file, dir) = open_file(&scheduler, "/net/share");
    let mut info = entry("share", FileType::Directory);
    info.content_type = Some(dirq_core::file::SMB_SHARE_MIME.into());
    scheduler.file_update_info(file, info).unwrap();
    let (callback, calls) = counting_file_callback();

    scheduler
        .call_when_ready(
            dir,
            ReadyHandler::SingleFile(file, Some(callback)),
            FileAttributes::DIRECTORY_ITEM_COUNT,
            false,
        )
        .unwrap();
    scheduler.dispatch_pending();

    assert_eq!(calls.get(), 1);
    assert!(backend.find(FetchKind::DirectoryCount, "/net/share").is_none());
    scheduler.file_unref(file);
}

#[test]
fn test_shallow_count_skips_hidden_backup_and_listed_entries() {
    let entries = || {
        vec![
            entry("a.txt", FileType::Regular),
            entry(".profile", FileType::Regular),
            entry("notes.txt~", FileType::Regular),
            entry("secret", FileType::Regular),
            entry("b", FileType::Directory),
        ]
    };

    let (scheduler, backend) = scheduler(10);
    backend.set_hidden_names("/data/sub", &["secret"]);
    let (file, dir) = open_directory_entry(&scheduler, "/data/sub");
    scheduler
        .monitor_add(dir, Some(file), ClientId(1), false, FileAttributes::DIRECTORY_ITEM_COUNT)
        .unwrap();
    let count = backend.find(FetchKind::DirectoryCount, "/data/sub").unwrap();
    finish_listing(&backend, &count, entries());
    scheduler.dispatch_pending();
    assert_eq!(
        scheduler.with_file(file, |f| f.directory_count().value().copied()),
        Some(Some(2))
    );
    scheduler.monitor_remove(dir, Some(file), ClientId(1)).unwrap();
    scheduler.file_unref(file);

    // With hidden files shown everything counts.
    let backend = Rc::new(MockBackend::new());
    let config = SchedulerConfig {
        show_hidden_files: true,
        ..SchedulerConfig::default()
    };
    let scheduler = Scheduler::new(config, backend.clone());
    backend.set_hidden_names("/data/sub", &["secret"]);
    let (file, dir) = open_directory_entry(&scheduler, "/data/sub");
    scheduler
        .monitor_add(dir, Some(file), ClientId(1), false, FileAttributes::DIRECTORY_ITEM_COUNT)
        .unwrap();
    let count = backend.find(FetchKind::DirectoryCount, "/data/sub").unwrap();
    finish_listing(&backend, &count, entries());
    scheduler.dispatch_pending();
    assert_eq!(
        scheduler.with_file(file, |f| f.directory_count().value().copied()),
        Some(Some(5))
    );
    scheduler.monitor_remove(dir, Some(file), ClientId(1)).unwrap();
    scheduler.file_unref(file);
}

#[test]
fn test_repeated_invalidate_keeps_one_fetch() {
    let (scheduler, backend) = scheduler(10);
    let (file, dir) = open_directory_entry(&scheduler, "/data/sub");
    scheduler
        .monitor_add(dir, Some(file), ClientId(1), false, FileAttributes::DIRECTORY_ITEM_COUNT)
        .unwrap();
    let first = backend.find(FetchKind::DirectoryCount, "/data/sub").unwrap();

    scheduler.invalidate_attributes(dir, FileAttributes::DIRECTORY_ITEM_COUNT);
    assert!(first.is_cancelled());
    let live = backend.live(FetchKind::DirectoryCount);
    assert_eq!(live.len(), 1);
    let second = live[0].clone();
    assert_eq!(scheduler.in_flight(), 1);

    scheduler.invalidate_attributes(dir, FileAttributes::DIRECTORY_ITEM_COUNT);
    assert!(second.is_cancelled());
    let live = backend.live(FetchKind::DirectoryCount);
    assert_eq!(live.len(), 1);
    let third = live[0].clone();
    assert_eq!(scheduler.in_flight(), 1);
    assert_eq!(
        backend
            .ops()
            .iter()
            .filter(|op| op.fetch_kind() == FetchKind::DirectoryCount)
            .count(),
        3
    );

    // Late answers from the abandoned fetches change nothing.
    finish_listing(&backend, &first, vec![entry("old", FileType::Regular)]);
    finish_listing(&backend, &second, vec![entry("old", FileType::Regular)]);
    scheduler.dispatch_pending();
    assert_eq!(
        scheduler.with_file(file, |f| f.directory_count().is_up_to_date()),
        Some(false)
    );
    assert!(scheduler.is_fetching(dir, FetchKind::DirectoryCount));

    finish_listing(
        &backend,
        &third,
        vec![entry("x", FileType::Regular), entry("y", FileType::Regular)],
    );
    scheduler.dispatch_pending();
    assert_eq!(
        scheduler.with_file(file, |f| f.directory_count().value().copied()),
        Some(Some(2))
    );
    assert_eq!(scheduler.in_flight(), 0);

    scheduler.monitor_remove(dir, Some(file), ClientId(1)).unwrap();
    scheduler.file_unref(file);
}

fn photo(thumbnail_path: &str) -> EntryInfo {
    let mut info = entry("photo.jpg", FileType::Regular);
    info.content_type = Some("image/jpeg".into());
    info.thumbnail_path = Some(thumbnail_path.into());
    info
}

fn decoded(path: &str, source_mtime: Option<u64>) -> Outcome {
    Outcome::Thumbnail(Ok(Thumbnail {
        path: path.into(),
        width: 128,
        height: 96,
        source_mtime,
    }))
}

#[test]
fn test_thumbnail_falls_back_to_original() {
    let (scheduler, backend) = scheduler(10);
    let (file, dir) = open_file(&scheduler, "/data/photo.jpg");
    scheduler.file_update_info(file, photo("/cache/photo.png")).unwrap();
    scheduler.set_thumbnail_wants_original(file, true).unwrap();
    let (callback, calls) = counting_file_callback();

    scheduler
        .call_when_ready(dir, ReadyHandler::SingleFile(file, Some(callback)), FileAttributes::THUMBNAIL, false)
        .unwrap();
    let cached = backend.find(FetchKind::Thumbnail, "/cache/photo.png").unwrap();
    assert_eq!(cached.kind, OpKind::LoadThumbnail);

    backend.reply(&cached, Outcome::Thumbnail(Err(IoFailure::NotFound)));
    scheduler.dispatch_pending();

    // Same fetch, same slot; now reading the image itself.
    assert_eq!(calls.get(), 0);
    let original = backend.find(FetchKind::Thumbnail, "/data/photo.jpg").unwrap();
    assert_eq!(original.ticket, cached.ticket);
    assert_eq!(scheduler.in_flight(), 1);

    backend.reply(&original, decoded("/data/photo.jpg", None));
    scheduler.dispatch_pending();

    assert_eq!(calls.get(), 1);
    assert_eq!(
        scheduler.with_file(file, |f| f.thumbnail().value().map(|t| (t.width, t.height))),
        Some(Some((128, 96)))
    );
    assert_eq!(scheduler.in_flight(), 0);
    scheduler.file_unref(file);
}

#[test]
fn test_thumbnail_failure_without_fallback() {
    let (scheduler, backend) = scheduler(10);
    let (file, dir) = open_file(&scheduler, "/data/photo.jpg");
    scheduler.file_update_info(file, photo("/cache/photo.png")).unwrap();

    scheduler
        .call_when_ready(dir, ReadyHandler::SingleFile(file, None), FileAttributes::THUMBNAIL, false)
        .unwrap();
    let cached = backend.find(FetchKind::Thumbnail, "/cache/photo.png").unwrap();
    backend.reply(&cached, Outcome::Thumbnail(Err(IoFailure::NotFound)));
    scheduler.dispatch_pending();

    assert!(backend.find(FetchKind::Thumbnail, "/data/photo.jpg").is_none());
    assert_eq!(scheduler.with_file(file, |f| f.thumbnail().failed()), Some(true));
    assert_eq!(scheduler.in_flight(), 0);
    scheduler.file_unref(file);
}

#[test]
fn test_stale_thumbnail_is_discarded() {
    let (scheduler, backend) = scheduler(10);
    let (file, dir) = open_file(&scheduler, "/data/photo.jpg");
    scheduler.file_update_info(file, photo("/cache/photo.png")).unwrap();
    let (callback, calls) = counting_file_callback();

    scheduler
        .call_when_ready(dir, ReadyHandler::SingleFile(file, Some(callback)), FileAttributes::THUMBNAIL, false)
        .unwrap();
    let cached = backend.find(FetchKind::Thumbnail, "/cache/photo.png").unwrap();
    // Rendered from an older version of the image.
    backend.reply(&cached, decoded("/cache/photo.png", Some(1_600_000_000)));
    scheduler.dispatch_pending();

    assert_eq!(calls.get(), 1);
    assert_eq!(
        scheduler.with_file(file, |f| f.thumbnail().state()),
        Some(dirq_core::AttrState::Unknowable)
    );
    assert!(scheduler
        .check_if_ready(dir, Some(file), FileAttributes::THUMBNAIL)
        .unwrap());
    assert_eq!(backend.live(FetchKind::Thumbnail).len(), 0);

    // A zero mtime in the thumbnail is taken as fresh.
    scheduler.file_update_info(file, photo("/cache/photo-2.png")).unwrap();
    scheduler
        .call_when_ready(dir, ReadyHandler::SingleFile(file, None), FileAttributes::THUMBNAIL, false)
        .unwrap();
    let cached = backend.find(FetchKind::Thumbnail, "/cache/photo-2.png").unwrap();
    backend.reply(&cached, decoded("/cache/photo-2.png", Some(0)));
    scheduler.dispatch_pending();
    assert_eq!(
        scheduler.with_file(file, |f| f.thumbnail().state()),
        Some(dirq_core::AttrState::Known)
    );
    scheduler.file_unref(file);
}

#[test]
fn test_extension_providers_run_one_at_a_time() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let first = ScriptedProvider::new("first", ProviderResult::InProgress(ProviderHandle(1)), &log);
    let second = ScriptedProvider::new(
        "second",
        ProviderResult::Complete(vec![attribute("emblem", "ok")]),
        &log,
    );
    let (scheduler, _backend) = scheduler_with_providers(&[first.clone(), second.clone()]);
    let (file, dir) = open_file(&scheduler, "/data/doc.txt");
    scheduler
        .file_update_info(file, entry("doc.txt", FileType::Regular))
        .unwrap();

    scheduler
        .monitor_add(dir, Some(file), ClientId(1), false, FileAttributes::EXTENSION_INFO)
        .unwrap();
    assert_eq!(*log.borrow(), vec!["first:doc.txt"]);
    assert!(scheduler.is_fetching(dir, FetchKind::ExtensionInfo));
    assert_eq!(scheduler.in_flight(), 1);

    first.respond(ProviderHandle(1), Some(vec![attribute("color", "red")]));
    scheduler.dispatch_pending();

    assert_eq!(*log.borrow(), vec!["first:doc.txt", "second:doc.txt"]);
    assert_eq!(
        scheduler.with_file(file, |f| f.extension_attributes().to_vec()),
        Some(vec![attribute("color", "red"), attribute("emblem", "ok")])
    );
    assert_eq!(scheduler.with_file(file, File::pending_provider_count), Some(0));
    assert!(!scheduler.is_fetching(dir, FetchKind::ExtensionInfo));
    assert_eq!(scheduler.in_flight(), 0);

    scheduler.monitor_remove(dir, Some(file), ClientId(1)).unwrap();
    scheduler.file_unref(file);
}

#[test]
fn test_unexpected_provider_response_is_ignored() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let first = ScriptedProvider::new("first", ProviderResult::InProgress(ProviderHandle(1)), &log);
    let second = ScriptedProvider::new(
        "second",
        ProviderResult::Complete(vec![attribute("emblem", "ok")]),
        &log,
    );
    let (scheduler, _backend) = scheduler_with_providers(&[first.clone(), second.clone()]);
    let (file, dir) = open_file(&scheduler, "/data/doc.txt");
    scheduler
        .file_update_info(file, entry("doc.txt", FileType::Regular))
        .unwrap();
    scheduler
        .monitor_add(dir, Some(file), ClientId(1), false, FileAttributes::EXTENSION_INFO)
        .unwrap();

    // Answer for an update nobody is waiting on.
    first.respond(ProviderHandle(2), Some(vec![attribute("color", "red")]));
    scheduler.dispatch_pending();

    assert_eq!(*log.borrow(), vec!["first:doc.txt"]);
    assert!(scheduler.is_fetching(dir, FetchKind::ExtensionInfo));
    assert_eq!(scheduler.with_file(file, |f| f.extension_attributes().len()), Some(0));
    assert_eq!(scheduler.with_file(file, File::pending_provider_count), Some(2));

    // A failed update still moves on to the next provider.
    first.respond(ProviderHandle(1), None);
    scheduler.dispatch_pending();
    assert_eq!(*log.borrow(), vec!["first:doc.txt", "second:doc.txt"]);
    assert_eq!(
        scheduler.with_file(file, |f| f.extension_attributes().to_vec()),
        Some(vec![attribute("emblem", "ok")])
    );
    assert_eq!(scheduler.in_flight(), 0);

    scheduler.monitor_remove(dir, Some(file), ClientId(1)).unwrap();
    scheduler.file_unref(file);
}

#[test]
fn test_extension_info_never_holds_up_ready_callback() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let slow = ScriptedProvider::new("slow", ProviderResult::InProgress(ProviderHandle(7)), &log);
    let (scheduler, _backend) = scheduler_with_providers(&[slow.clone()]);
    let (file, dir) = open_file(&scheduler, "/data/doc.txt");
    scheduler
        .file_update_info(file, entry("doc.txt", FileType::Regular))
        .unwrap();
    scheduler
        .monitor_add(dir, Some(file), ClientId(1), false, FileAttributes::EXTENSION_INFO)
        .unwrap();
    assert!(scheduler.is_fetching(dir, FetchKind::ExtensionInfo));

    let (callback, calls) = counting_file_callback();
    scheduler
        .call_when_ready(
            dir,
            ReadyHandler::SingleFile(file, Some(callback)),
            FileAttributes::INFO | FileAttributes::EXTENSION_INFO,
            false,
        )
        .unwrap();
    scheduler.dispatch_pending();

    assert_eq!(calls.get(), 1);
    assert!(scheduler.is_fetching(dir, FetchKind::ExtensionInfo));
    assert_eq!(scheduler.with_file(file, File::pending_provider_count), Some(1));

    // Dropping the last interest cancels the provider's update.
    scheduler.monitor_remove(dir, Some(file), ClientId(1)).unwrap();
    assert_eq!(*slow.cancelled.borrow(), vec![ProviderHandle(7)]);
    assert_eq!(scheduler.in_flight(), 0);

    slow.respond(ProviderHandle(7), Some(vec![attribute("color", "red")]));
    scheduler.dispatch_pending();
    assert_eq!(scheduler.with_file(file, |f| f.extension_attributes().len()), Some(0));
    scheduler.file_unref(file);
}

#[test]
fn test_admission_ceiling_across_directories() {
    let (scheduler, backend) = scheduler(10);
    let attrs = FileAttributes::DIRECTORY_ITEM_COUNT
        | FileAttributes::DEEP_COUNTS
        | FileAttributes::DIRECTORY_ITEM_MIME_TYPES
        | FileAttributes::FILESYSTEM_INFO;
    let low_tier = [
        FetchKind::DirectoryCount,
        FetchKind::DeepCount,
        FetchKind::MimeList,
        FetchKind::FilesystemInfo,
    ];
    let fetching = |dir: DirectoryId| -> Vec<FetchKind> {
        low_tier
            .into_iter()
            .filter(|kind| scheduler.is_fetching(dir, *kind))
            .collect()
    };

    let opened: Vec<(FileId, DirectoryId)> = ["/d1/sub", "/d2/sub", "/d3/sub"]
        .iter()
        .map(|location| open_directory_entry(&scheduler, location))
        .collect();
    for (file, dir) in &opened {
        scheduler
            .call_when_ready(*dir, ReadyHandler::SingleFile(*file, None), attrs, false)
            .unwrap();
    }
    let dirs: Vec<DirectoryId> = opened.iter().map(|(_, dir)| *dir).collect();

    assert_eq!(scheduler.in_flight(), 10);
    assert_eq!(fetching(dirs[0]).len(), 4);
    assert_eq!(fetching(dirs[1]).len(), 4);
    assert_eq!(fetching(dirs[2]), vec![FetchKind::DirectoryCount, FetchKind::DeepCount]);
    assert_eq!(scheduler.waiting_directories(), vec![dirs[2]]);

    // Finishing one count frees a slot for the parked directory.
    let count = backend.find(FetchKind::DirectoryCount, "/d1/sub").unwrap();
    finish_listing(&backend, &count, Vec::new());
    scheduler.dispatch_pending();

    assert_eq!(scheduler.in_flight(), 10);
    assert_eq!(
        fetching(dirs[2]),
        vec![FetchKind::DirectoryCount, FetchKind::DeepCount, FetchKind::MimeList]
    );
    assert_eq!(scheduler.waiting_directories(), vec![dirs[2]]);

    for (file, _) in opened {
        scheduler.file_unref(file);
    }
}
