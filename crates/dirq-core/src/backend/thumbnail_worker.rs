//! Thumbnail decoding on a dedicated thread.
//!
//! Jobs wait in a mutex-protected FIFO and are decoded one at a time. The
//! worker never touches scheduler state: each result is posted back through
//! the job's [`CompletionSink`].

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use dirq_config::log_thumb_debug;
use tokio_util::sync::CancellationToken;

use super::thumbnail::load_thumbnail;
use crate::error::IoFailure;
use crate::io::{CompletionSink, Outcome, Ticket};

struct Job {
    ticket: Ticket,
    path: PathBuf,
    token: CancellationToken,
    sink: CompletionSink,
}

/// Pending jobs, oldest first. At most one job per path.
#[derive(Default)]
struct JobQueue {
    jobs: VecDeque<Job>,
    shutdown: bool,
}

impl JobQueue {
    /// Queue `job`, replacing any older job for the same path. The
    /// replaced job is returned so its requester can be told.
    fn push(&mut self, job: Job) -> Option<Job> {
        let displaced = self.take(&job.path);
        self.jobs.push_back(job);
        displaced
    }

    fn take(&mut self, path: &Path) -> Option<Job> {
        let index = self.jobs.iter().position(|job| job.path == path)?;
        self.jobs.remove(index)
    }

    fn remove(&mut self, path: &Path) -> bool {
        self.take(path).is_some()
    }

    fn prioritize(&mut self, path: &Path) -> bool {
        let Some(index) = self.jobs.iter().position(|job| job.path == path) else {
            return false;
        };
        if let Some(job) = self.jobs.remove(index) {
            self.jobs.push_front(job);
        }
        true
    }

    fn pop(&mut self) -> Option<Job> {
        self.jobs.pop_front()
    }
}

struct Shared {
    queue: Mutex<JobQueue>,
    ready: Condvar,
}

impl Shared {
    fn new() -> Self {
        Self {
            queue: Mutex::new(JobQueue::default()),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, JobQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `job`. A job it replaces is answered as cancelled unless it
    /// belongs to the same fetch.
    fn enqueue(&self, job: Job) {
        let ticket = job.ticket;
        let displaced = self.lock().push(job);
        self.ready.notify_one();
        if let Some(old) = displaced.filter(|old| old.ticket != ticket) {
            old.sink.deliver(old.ticket, Outcome::Thumbnail(Err(IoFailure::Cancelled)));
        }
    }
}

pub struct ThumbnailWorker {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl ThumbnailWorker {
    pub fn spawn() -> std::io::Result<Self> {
        let shared = Arc::new(Shared::new());
        let worker = shared.clone();
        let handle = thread::Builder::new()
            .name("dirq-thumbnail".into())
            .spawn(move || run(&worker))?;
        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    pub(crate) fn submit(&self, ticket: Ticket, path: PathBuf, token: CancellationToken, sink: CompletionSink) {
        self.shared.enqueue(Job {
            ticket,
            path,
            token,
            sink,
        });
    }

    /// Drop the queued job for `path`. Returns false if none was waiting.
    pub fn dequeue(&self, path: &Path) -> bool {
        self.shared.lock().remove(path)
    }

    /// Move the queued job for `path` to the front.
    pub fn prioritize(&self, path: &Path) -> bool {
        self.shared.lock().prioritize(path)
    }

    /// Jobs waiting to be decoded.
    pub fn queued(&self) -> usize {
        self.shared.lock().jobs.len()
    }
}

impl Drop for ThumbnailWorker {
    fn drop(&mut self) {
        self.shared.lock().shutdown = true;
        self.shared.ready.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(shared: &Shared) {
    loop {
        let job = {
            let mut queue = shared.lock();
            loop {
                if queue.shutdown {
                    return;
                }
                if let Some(job) = queue.pop() {
                    break job;
                }
                queue = shared.ready.wait(queue).unwrap_or_else(PoisonError::into_inner);
            }
        };

        if job.token.is_cancelled() {
            continue;
        }
        let result = load_thumbnail(&job.path);
        if let Err(e) = &result {
            log_thumb_debug!(
                "Thumbnail unreadable",
                path = tracing::field::display(job.path.display()),
                error = tracing::field::display(e)
            );
        }
        job.sink.deliver(job.ticket, Outcome::Thumbnail(result));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::thumbnail::tests::png;
    use crate::fetch::FetchKind;
    use crate::ids::DirectoryId;
    use crate::io::Message;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn job(path: &str, sink: &CompletionSink) -> Job {
        job_for(1, path, sink)
    }

    fn job_for(generation: u64, path: &str, sink: &CompletionSink) -> Job {
        Job {
            ticket: Ticket {
                dir: DirectoryId(1),
                kind: FetchKind::Thumbnail,
                generation,
            },
            path: PathBuf::from(path),
            token: CancellationToken::new(),
            sink: sink.clone(),
        }
    }

    fn order(queue: &JobQueue) -> Vec<PathBuf> {
        queue.jobs.iter().map(|j| j.path.clone()).collect()
    }

    #[test]
    fn test_queue_order_and_reprioritization() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let sink = CompletionSink::new(tx);
        let mut queue = JobQueue::default();
        for path in ["/a.png", "/b.png", "/c.png"] {
            queue.push(job(path, &sink));
        }

        assert!(queue.prioritize(Path::new("/c.png")));
        assert_eq!(order(&queue), vec![PathBuf::from("/c.png"), "/a.png".into(), "/b.png".into()]);

        // A repeated request replaces the waiting one at the back.
        assert!(queue.push(job("/c.png", &sink)).is_some());
        assert_eq!(order(&queue), vec![PathBuf::from("/a.png"), "/b.png".into(), "/c.png".into()]);

        assert!(queue.remove(Path::new("/a.png")));
        assert!(!queue.remove(Path::new("/a.png")));
        assert!(!queue.prioritize(Path::new("/missing.png")));
        assert_eq!(queue.pop().map(|j| j.path), Some(PathBuf::from("/b.png")));
    }

    #[test]
    fn test_replaced_job_is_answered_as_cancelled() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = CompletionSink::new(tx);
        let shared = Shared::new();

        shared.enqueue(job_for(1, "/a.png", &sink));
        shared.enqueue(job_for(2, "/a.png", &sink));

        match rx.try_recv() {
            Ok(Message::Fetch {
                ticket,
                outcome: Outcome::Thumbnail(Err(IoFailure::Cancelled)),
            }) => assert_eq!(ticket.generation, 1),
            other => panic!("unexpected message: {other:?}"),
        }
        assert!(rx.try_recv().is_err());

        // Resubmitting for the same fetch answers nothing.
        shared.enqueue(job_for(2, "/a.png", &sink));
        assert!(rx.try_recv().is_err());
        let queued: Vec<u64> = shared.lock().jobs.iter().map(|j| j.ticket.generation).collect();
        assert_eq!(queued, vec![2]);
    }

    #[test]
    fn test_worker_posts_decoded_header() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("thumb.png");
        std::fs::write(&path, png(64, 48, Some(42))).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let worker = ThumbnailWorker::spawn().unwrap();
        let mut request = job("/unused", &CompletionSink::new(tx));
        request.path = path.clone();
        worker.submit(request.ticket, request.path, request.token, request.sink);

        match rx.blocking_recv() {
            Some(Message::Fetch {
                outcome: Outcome::Thumbnail(Ok(thumbnail)),
                ..
            }) => {
                assert_eq!(thumbnail.path, path);
                assert_eq!((thumbnail.width, thumbnail.height), (64, 48));
                assert_eq!(thumbnail.source_mtime, Some(42));
            }
            other => panic!("unexpected message: {other:?}"),
        }
        drop(worker);
    }
}
