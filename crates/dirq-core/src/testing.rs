//! In-memory backend for driving the scheduler by hand.
//!
//! [`MockBackend`] records every request instead of doing I/O. Tests inspect
//! the recorded [`Op`]s and answer them, in any order, with
//! [`MockBackend::reply`].

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tokio_util::sync::CancellationToken;

use crate::fetch::FetchKind;
use crate::ids::DirectoryId;
use crate::io::{CompletionSink, FsBackend, MountInfo, Outcome, ReadLimit, Ticket, WatchChange, WatchHandle};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpKind {
    Enumerate { batch_size: usize },
    QueryInfo,
    LoadContents(ReadLimit),
    FindEnclosingMount,
    QueryFilesystemInfo,
    LoadThumbnail,
}

/// One recorded backend request.
#[derive(Debug, Clone)]
pub struct Op {
    pub kind: OpKind,
    pub location: PathBuf,
    pub ticket: Ticket,
    pub token: CancellationToken,
    sink: CompletionSink,
}

impl Op {
    pub fn fetch_kind(&self) -> FetchKind {
        self.ticket.kind()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Default)]
struct Watches {
    live: Cell<usize>,
    sinks: RefCell<HashMap<DirectoryId, CompletionSink>>,
}

struct WatchGuard {
    dir: DirectoryId,
    watches: Rc<Watches>,
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        self.watches.live.set(self.watches.live.get() - 1);
        self.watches.sinks.borrow_mut().remove(&self.dir);
    }
}

#[derive(Default)]
pub struct MockBackend {
    ops: RefCell<Vec<Op>>,
    mounts: RefCell<Vec<MountInfo>>,
    hidden: RefCell<HashMap<PathBuf, Vec<String>>>,
    watches: Rc<Watches>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, kind: OpKind, location: &Path, ticket: Ticket, token: CancellationToken, sink: CompletionSink) {
        self.ops.borrow_mut().push(Op {
            kind,
            location: location.to_path_buf(),
            ticket,
            token,
            sink,
        });
    }

    /// Every request so far, oldest first.
    pub fn ops(&self) -> Vec<Op> {
        self.ops.borrow().clone()
    }

    /// Remove and return every recorded request.
    pub fn take_ops(&self) -> Vec<Op> {
        std::mem::take(&mut *self.ops.borrow_mut())
    }

    /// Requests of `kind` not yet cancelled.
    pub fn live(&self, kind: FetchKind) -> Vec<Op> {
        self.ops
            .borrow()
            .iter()
            .filter(|op| op.fetch_kind() == kind && !op.is_cancelled())
            .cloned()
            .collect()
    }

    /// Most recent request of `kind` for `location`.
    pub fn find(&self, kind: FetchKind, location: impl AsRef<Path>) -> Option<Op> {
        self.ops
            .borrow()
            .iter()
            .rev()
            .find(|op| op.fetch_kind() == kind && op.location == location.as_ref())
            .cloned()
    }

    /// Deliver `outcome` for `op`. Nothing is applied until the scheduler
    /// drains its channel.
    pub fn reply(&self, op: &Op, outcome: Outcome) {
        op.sink.deliver(op.ticket, outcome);
    }

    pub fn set_mounts(&self, mounts: Vec<MountInfo>) {
        *self.mounts.borrow_mut() = mounts;
    }

    pub fn set_hidden_names(&self, location: impl Into<PathBuf>, names: &[&str]) {
        self.hidden
            .borrow_mut()
            .insert(location.into(), names.iter().map(|n| n.to_string()).collect());
    }

    /// Watches currently alive.
    pub fn live_watches(&self) -> usize {
        self.watches.live.get()
    }

    /// Report a change on the watch of `dir`. Returns false if `dir` is not
    /// watched.
    pub fn emit_watch(&self, dir: DirectoryId, change: WatchChange) -> bool {
        match self.watches.sinks.borrow().get(&dir) {
            Some(sink) => {
                sink.watch_event(dir, change);
                true
            }
            None => false,
        }
    }
}

impl FsBackend for MockBackend {
    fn enumerate(&self, ticket: Ticket, location: &Path, batch_size: usize, token: CancellationToken, sink: CompletionSink) {
        self.record(OpKind::Enumerate { batch_size }, location, ticket, token, sink);
    }

    fn query_info(&self, ticket: Ticket, location: &Path, token: CancellationToken, sink: CompletionSink) {
        self.record(OpKind::QueryInfo, location, ticket, token, sink);
    }

    fn load_contents(&self, ticket: Ticket, location: &Path, limit: ReadLimit, token: CancellationToken, sink: CompletionSink) {
        self.record(OpKind::LoadContents(limit), location, ticket, token, sink);
    }

    fn find_enclosing_mount(&self, ticket: Ticket, location: &Path, token: CancellationToken, sink: CompletionSink) {
        self.record(OpKind::FindEnclosingMount, location, ticket, token, sink);
    }

    fn query_filesystem_info(&self, ticket: Ticket, location: &Path, token: CancellationToken, sink: CompletionSink) {
        self.record(OpKind::QueryFilesystemInfo, location, ticket, token, sink);
    }

    fn load_thumbnail(&self, ticket: Ticket, path: &Path, token: CancellationToken, sink: CompletionSink) {
        self.record(OpKind::LoadThumbnail, path, ticket, token, sink);
    }

    fn list_mounts(&self) -> Vec<MountInfo> {
        self.mounts.borrow().clone()
    }

    fn read_hidden_names(&self, location: &Path) -> Vec<String> {
        self.hidden.borrow().get(location).cloned().unwrap_or_default()
    }

    fn watch(&self, dir: DirectoryId, _location: &Path, sink: CompletionSink) -> Option<WatchHandle> {
        self.watches.live.set(self.watches.live.get() + 1);
        self.watches.sinks.borrow_mut().insert(dir, sink);
        Some(WatchHandle::new(WatchGuard {
            dir,
            watches: self.watches.clone(),
        }))
    }
}
