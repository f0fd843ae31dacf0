//! Monitors and ready-callbacks.
//!
//! A monitor keeps attributes fresh for as long as it is registered. A
//! ready-callback fires once, the first time its request is satisfied, and is
//! removed just before it runs.

use std::fmt;
use std::rc::Rc;

use crate::ids::{ClientId, DirectoryId, FileId};
use crate::request::RequestMask;
use crate::scheduler::Scheduler;

/// Called with the directory and, if the file list was requested, its
/// current files.
pub type DirectoryCallback = Rc<dyn Fn(&Scheduler, DirectoryId, &[FileId])>;

/// Called with the file the request was made for.
pub type FileCallback = Rc<dyn Fn(&Scheduler, FileId)>;

/// Who a ready-callback is for and what to invoke.
///
/// A `None` callback only asks for the attributes to be fetched.
#[derive(Clone)]
pub enum ReadyHandler {
    WholeDirectory(Option<DirectoryCallback>),
    SingleFile(FileId, Option<FileCallback>),
}

impl ReadyHandler {
    /// Target file, or `None` for the whole directory.
    pub fn file(&self) -> Option<FileId> {
        match self {
            ReadyHandler::WholeDirectory(_) => None,
            ReadyHandler::SingleFile(file, _) => Some(*file),
        }
    }

    pub fn has_callback(&self) -> bool {
        match self {
            ReadyHandler::WholeDirectory(cb) => cb.is_some(),
            ReadyHandler::SingleFile(_, cb) => cb.is_some(),
        }
    }

    /// Same target and same callback identity.
    pub fn same_key(&self, other: &ReadyHandler) -> bool {
        match (self, other) {
            (ReadyHandler::WholeDirectory(a), ReadyHandler::WholeDirectory(b)) => same_callback(a, b),
            (ReadyHandler::SingleFile(fa, a), ReadyHandler::SingleFile(fb, b)) => fa == fb && same_callback(a, b),
            _ => false,
        }
    }
}

fn same_callback<T: ?Sized>(a: &Option<Rc<T>>, b: &Option<Rc<T>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const (),
        _ => false,
    }
}

impl fmt::Debug for ReadyHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadyHandler::WholeDirectory(cb) => f
                .debug_tuple("WholeDirectory")
                .field(&cb.as_ref().map(|_| "callback"))
                .finish(),
            ReadyHandler::SingleFile(file, cb) => f
                .debug_tuple("SingleFile")
                .field(file)
                .field(&cb.as_ref().map(|_| "callback"))
                .finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Monitor {
    pub file: Option<FileId>,
    pub client: ClientId,
    pub request: RequestMask,
    pub monitor_hidden: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct ReadyCallback {
    pub handler: ReadyHandler,
    pub request: RequestMask,
    /// False once satisfied and queued to fire.
    pub active: bool,
}

impl ReadyCallback {
    #[inline]
    pub fn file(&self) -> Option<FileId> {
        self.handler.file()
    }
}

/// A satisfied callback, detached from scheduler state and ready to run.
pub(crate) enum ReadyCall {
    Directory(DirectoryCallback, DirectoryId, Vec<FileId>),
    File(FileCallback, FileId),
    Nothing,
}

impl ReadyCall {
    pub fn invoke(self, scheduler: &Scheduler) {
        match self {
            ReadyCall::Directory(cb, dir, files) => cb(scheduler, dir, &files),
            ReadyCall::File(cb, file) => cb(scheduler, file),
            ReadyCall::Nothing => {}
        }
    }
}
