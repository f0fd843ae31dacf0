//! End-to-end runs against the local filesystem.

use std::cell::{Cell, RefCell};
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use dirq_core::subscription::{DirectoryCallback, FileCallback};
use dirq_core::{
    DeepCountStatus, DirectoryId, File, FileAttributes, FileId, LocalBackend, ReadyHandler, Scheduler,
    SchedulerConfig,
};
use dirq_config::testing::TestEnvironment;
use tempfile::TempDir;

fn open(cache: &Path) -> Scheduler {
    let backend = LocalBackend::new(cache.to_path_buf()).unwrap();
    Scheduler::new(SchedulerConfig::default(), Rc::new(backend))
}

async fn run(scheduler: &Scheduler, done: &Cell<bool>) {
    tokio::time::timeout(Duration::from_secs(10), scheduler.run_until(|_| done.get()))
        .await
        .expect("scheduler did not finish in time");
}

#[tokio::test]
async fn test_list_with_previews_and_counts() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().canonicalize().unwrap();
    std::fs::write(root.join("notes.txt"), "hello\nworld\n").unwrap();
    std::fs::create_dir(root.join("sub")).unwrap();
    std::fs::write(root.join("sub/one.txt"), "1").unwrap();
    std::fs::write(root.join("sub/two.txt"), "2").unwrap();

    let cache = TempDir::new().unwrap();
    let scheduler = open(cache.path());
    let dir = scheduler.directory_get(&root).unwrap();

    let done = Rc::new(Cell::new(false));
    let rows = Rc::new(RefCell::new(Vec::new()));
    let (flag, sink) = (done.clone(), rows.clone());
    let callback: DirectoryCallback = Rc::new(move |s: &Scheduler, _: DirectoryId, files: &[FileId]| {
        for file in files {
            let row = s.with_file(*file, |f| {
                (
                    f.name().to_string(),
                    f.top_left_text().value().cloned(),
                    f.directory_count().value().copied(),
                )
            });
            sink.borrow_mut().extend(row);
        }
        flag.set(true);
    });
    scheduler
        .call_when_ready(
            dir,
            ReadyHandler::WholeDirectory(Some(callback)),
            FileAttributes::INFO | FileAttributes::TOP_LEFT_TEXT | FileAttributes::DIRECTORY_ITEM_COUNT,
            true,
        )
        .unwrap();
    run(&scheduler, &done).await;

    let mut rows = rows.borrow().clone();
    rows.sort();
    assert_eq!(
        rows,
        vec![
            ("notes.txt".to_string(), Some("hello\nworld".to_string()), None),
            ("sub".to_string(), None, Some(2)),
        ]
    );
    assert_eq!(scheduler.in_flight(), 0);
    scheduler.directory_unref(dir);
}

#[tokio::test]
async fn test_deep_count_sizes_hard_links_once() {
    let env = TestEnvironment::new().unwrap();
    env.create_file("tree/a.txt", b"hello").unwrap();
    env.create_file("tree/.secret", b"xy").unwrap();
    env.create_file("tree/sub/b.txt", b"0123456789").unwrap();
    env.hard_link("tree/a.txt", "tree/sub/also_a.txt").unwrap();
    let root = env.root.join("tree").canonicalize().unwrap();
    let sub_size = std::fs::metadata(root.join("sub")).unwrap().len();

    let config = env.config();
    let backend = LocalBackend::new(config.thumbnails.cache_dir.clone()).unwrap();
    let scheduler = Scheduler::new(SchedulerConfig::from(&config), Rc::new(backend));
    let file = scheduler.file_get(&root).unwrap();
    let dir = scheduler.with_file(file, File::directory).unwrap();

    let done = Rc::new(Cell::new(false));
    let flag = done.clone();
    let callback: FileCallback = Rc::new(move |_: &Scheduler, _: FileId| flag.set(true));
    scheduler
        .call_when_ready(
            dir,
            ReadyHandler::SingleFile(file, Some(callback)),
            FileAttributes::INFO | FileAttributes::DEEP_COUNTS,
            false,
        )
        .unwrap();
    run(&scheduler, &done).await;

    let counts = scheduler.with_file(file, |f| *f.deep_counts()).unwrap();
    assert_eq!(counts.status, DeepCountStatus::Done);
    assert_eq!(counts.files, 3);
    assert_eq!(counts.directories, 1);
    assert_eq!(counts.hidden, 1);
    assert_eq!(counts.unreadable, 0);
    assert_eq!(counts.size, 5 + 2 + 10 + sub_size);
    scheduler.file_unref(file);
}

#[tokio::test]
async fn test_missing_directory_reports_load_error() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().canonicalize().unwrap().join("missing");

    let scheduler = open(&tmp.path().join("cache"));
    let mut events = scheduler.subscribe();
    let dir = scheduler.directory_get(&root).unwrap();

    let done = Rc::new(Cell::new(false));
    let flag = done.clone();
    let callback: DirectoryCallback = Rc::new(move |_: &Scheduler, _: DirectoryId, _: &[FileId]| flag.set(true));
    scheduler
        .call_when_ready(dir, ReadyHandler::WholeDirectory(Some(callback)), FileAttributes::INFO, true)
        .unwrap();
    run(&scheduler, &done).await;

    let mut saw_error = false;
    while let Ok(event) = events.try_recv() {
        if let dirq_core::DirectoryEvent::LoadError { error, .. } = event {
            assert_eq!(error, dirq_core::IoFailure::NotFound);
            saw_error = true;
        }
    }
    assert!(saw_error);
    assert!(scheduler.directory_files(dir).is_empty());
    scheduler.directory_unref(dir);
}
