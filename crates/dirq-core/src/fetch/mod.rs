//! Attribute fetchers.
//!
//! Every attribute kind follows the same lifecycle: a *start* step that
//! checks whether any subscription still needs the attribute and claims an
//! admission slot, a *stop* step that cancels the fetch once nobody needs it,
//! and a *complete* step that applies the collaborator's answer. The shared
//! parts live here; each submodule supplies the kind-specific [`Fetcher`].

mod count;
mod deep;
mod extension;
pub(crate) mod file_list;
mod filesystem;
mod info;
mod link;
mod mime;
mod mount;
mod thumbnail;
mod top_left;

pub use link::parse_desktop_entry;

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;

use dirq_config::{log_fetch_debug, log_sched_trace};
use tokio_util::sync::CancellationToken;

use crate::directory::{InFlight, MimeSet};
use crate::error::IoFailure;
use crate::ids::{DirectoryId, FileId};
use crate::io::{ListingEvent, Outcome, Ticket};
use crate::provider::{ProviderHandle, ProviderId};
use crate::request::{RequestKind, RequestMask};
use crate::state::Core;

/// One kind of fetch that can be in flight for a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchKind {
    FileList,
    FileInfo,
    LinkInfo,
    DirectoryCount,
    DeepCount,
    MimeList,
    TopLeftText,
    Thumbnail,
    Mount,
    FilesystemInfo,
    ExtensionInfo,
}

impl FetchKind {
    pub const COUNT: usize = 11;

    pub const ALL: [FetchKind; FetchKind::COUNT] = [
        FetchKind::FileList,
        FetchKind::FileInfo,
        FetchKind::LinkInfo,
        FetchKind::DirectoryCount,
        FetchKind::DeepCount,
        FetchKind::MimeList,
        FetchKind::TopLeftText,
        FetchKind::Thumbnail,
        FetchKind::Mount,
        FetchKind::FilesystemInfo,
        FetchKind::ExtensionInfo,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Name used when claiming and releasing admission slots.
    pub fn job_name(self) -> &'static str {
        match self {
            FetchKind::FileList => "file list",
            FetchKind::FileInfo => "file info",
            FetchKind::LinkInfo => "link info",
            FetchKind::DirectoryCount => "directory count",
            FetchKind::DeepCount => "deep count",
            FetchKind::MimeList => "MIME list",
            FetchKind::TopLeftText => "top left",
            FetchKind::Thumbnail => "thumbnail",
            FetchKind::Mount => "mount",
            FetchKind::FilesystemInfo => "filesystem info",
            FetchKind::ExtensionInfo => "extension info",
        }
    }

    /// Whether this fetch produces something `request` asks for.
    pub fn serves(self, request: RequestMask) -> bool {
        match self {
            FetchKind::FileList => request.wants(RequestKind::FileList),
            FetchKind::FileInfo => request.wants(RequestKind::FileInfo),
            FetchKind::LinkInfo => request.wants(RequestKind::LinkInfo),
            FetchKind::DirectoryCount => request.wants(RequestKind::DirectoryCount),
            FetchKind::DeepCount => request.wants(RequestKind::DeepCount),
            FetchKind::MimeList => request.wants(RequestKind::MimeList),
            FetchKind::TopLeftText => {
                request.wants(RequestKind::TopLeftText) || request.wants(RequestKind::LargeTopLeftText)
            }
            FetchKind::Thumbnail => request.wants(RequestKind::Thumbnail),
            FetchKind::Mount => request.wants(RequestKind::Mount),
            FetchKind::FilesystemInfo => request.wants(RequestKind::FilesystemInfo),
            FetchKind::ExtensionInfo => request.wants(RequestKind::ExtensionInfo),
        }
    }
}

/// Order in which fetches are reconsidered for cancellation.
pub(crate) const STOP_ORDER: [FetchKind; 10] = [
    FetchKind::FileInfo,
    FetchKind::DirectoryCount,
    FetchKind::DeepCount,
    FetchKind::MimeList,
    FetchKind::TopLeftText,
    FetchKind::LinkInfo,
    FetchKind::ExtensionInfo,
    FetchKind::Mount,
    FetchKind::Thumbnail,
    FetchKind::FilesystemInfo,
];

pub(crate) const HIGH_TIER: [FetchKind; 2] = [FetchKind::FileInfo, FetchKind::LinkInfo];

pub(crate) const LOW_TIER: [FetchKind; 7] = [
    FetchKind::Mount,
    FetchKind::DirectoryCount,
    FetchKind::DeepCount,
    FetchKind::MimeList,
    FetchKind::TopLeftText,
    FetchKind::Thumbnail,
    FetchKind::FilesystemInfo,
];

pub(crate) const EXTENSION_TIER: [FetchKind; 1] = [FetchKind::ExtensionInfo];

/// Kind-specific progress carried by an in-flight fetch.
#[derive(Debug)]
pub(crate) enum FetchState {
    Simple,
    FileList,
    DirectoryCount { count: u32, hidden: HashSet<String> },
    DeepCount(DeepWalk),
    MimeList(MimeSet),
    TopLeft { large: bool },
    Thumbnail { tried_original: bool },
    Extension { provider: ProviderId, handle: ProviderHandle },
}

/// Traversal state of a recursive count.
#[derive(Debug, Default)]
pub(crate) struct DeepWalk {
    /// Subdirectories still to visit; the next one is at the front.
    pub pending: VecDeque<PathBuf>,
    pub seen_inodes: HashSet<u64>,
    pub current: PathBuf,
}

/// What a fetch needs to talk to the backend.
#[derive(Debug, Clone)]
pub(crate) struct Job {
    pub ticket: Ticket,
    pub file: FileId,
    pub token: CancellationToken,
}

pub(crate) enum Issued {
    /// Work is outstanding; keep the slot.
    Pending(FetchState),
    /// Resolved synchronously.
    Finished,
}

pub(crate) enum Progress {
    /// More deliveries are expected for this fetch.
    Continue,
    Done,
}

pub(crate) trait Fetcher: Sync {
    /// The attribute is stale and some subscription wants it.
    fn is_needy(&self, core: &mut Core, file: FileId) -> bool;

    /// Resolve without I/O when the attribute does not apply to `file`.
    fn settle_without_io(&self, _core: &mut Core, _file: FileId) -> bool {
        false
    }

    fn issue(&self, core: &mut Core, job: &Job) -> Issued;

    /// Apply one delivery. Must not re-dispatch the directory.
    fn complete(&self, core: &mut Core, job: &Job, state: &mut FetchState, outcome: Outcome) -> Progress;

    fn cancelled(&self, _core: &mut Core, _file: Option<FileId>, _state: &FetchState) {}
}

fn fetcher(kind: FetchKind) -> Option<&'static dyn Fetcher> {
    Some(match kind {
        FetchKind::FileList => return None,
        FetchKind::FileInfo => &info::FileInfoFetcher,
        FetchKind::LinkInfo => &link::LinkInfoFetcher,
        FetchKind::DirectoryCount => &count::DirectoryCountFetcher,
        FetchKind::DeepCount => &deep::DeepCountFetcher,
        FetchKind::MimeList => &mime::MimeListFetcher,
        FetchKind::TopLeftText => &top_left::TopLeftFetcher,
        FetchKind::Thumbnail => &thumbnail::ThumbnailFetcher,
        FetchKind::Mount => &mount::MountFetcher,
        FetchKind::FilesystemInfo => &filesystem::FilesystemInfoFetcher,
        FetchKind::ExtensionInfo => &extension::ExtensionFetcher,
    })
}

/// Common needy test: the attribute is missing and someone wants it.
pub(crate) fn wanted_and_lacking(core: &Core, file: FileId, kind: RequestKind, lacks: fn(&crate::file::File) -> bool) -> bool {
    match core.files.get(&file) {
        Some(f) if lacks(f) => core.is_wanted(file, kind),
        _ => false,
    }
}

/// Start a fetch of `kind` for `file` if it is needed and a slot is free.
///
/// `doing_io` is set whenever the directory has, or tried to get, work of
/// this kind outstanding, which keeps the file at the head of its tier.
pub(crate) fn start(core: &mut Core, dir: DirectoryId, file: FileId, kind: FetchKind, doing_io: &mut bool) {
    let Some(fetcher) = fetcher(kind) else {
        return;
    };
    if core.dirs.get(&dir).map(|d| d.slot(kind).is_some()).unwrap_or(true) {
        *doing_io = true;
        return;
    }
    if !fetcher.is_needy(core, file) {
        return;
    }
    *doing_io = true;

    if fetcher.settle_without_io(core, file) {
        core.file_changed(file);
        core.state_changed(dir);
        return;
    }

    if !core.admission.try_start(dir, kind.job_name()) {
        return;
    }

    let job = core.new_job(dir, kind, file);
    match fetcher.issue(core, &job) {
        Issued::Pending(state) => {
            log_fetch_debug!("Fetch started", dir = dir.0, file = file.0, job = kind.job_name());
            if let Some(d) = core.dirs.get_mut(&dir) {
                *d.slot_mut(kind) = Some(InFlight {
                    generation: job.ticket.generation,
                    token: job.token,
                    file: Some(file),
                    state,
                });
            }
        }
        Issued::Finished => {
            core.admission.end(dir, kind.job_name());
            core.state_changed(dir);
        }
    }
}

/// Cancel the fetch of `kind` unless its file still needs it.
pub(crate) fn stop(core: &mut Core, dir: DirectoryId, kind: FetchKind) {
    let Some(fetcher) = fetcher(kind) else {
        return;
    };
    let target = match core.dirs.get(&dir).and_then(|d| d.slot(kind)) {
        Some(in_flight) => in_flight.file,
        None => return,
    };
    if let Some(file) = target {
        if fetcher.is_needy(core, file) {
            return;
        }
    }
    cancel(core, dir, kind);
}

/// Cancel the fetch of `kind` unconditionally and release its slot.
pub(crate) fn cancel(core: &mut Core, dir: DirectoryId, kind: FetchKind) {
    if kind == FetchKind::FileList {
        file_list::load_cancel(core, dir);
        return;
    }
    let Some(in_flight) = core.dirs.get_mut(&dir).and_then(|d| d.slot_mut(kind).take()) else {
        return;
    };
    in_flight.token.cancel();
    if let Some(fetcher) = fetcher(kind) {
        fetcher.cancelled(core, in_flight.file, &in_flight.state);
    }
    log_fetch_debug!("Fetch cancelled", dir = dir.0, job = kind.job_name());
    core.admission.end(dir, kind.job_name());
}

/// Apply a delivery for `ticket`. Deliveries for fetches that are no longer
/// in flight are dropped.
pub(crate) fn complete(core: &mut Core, ticket: Ticket, outcome: Outcome) {
    let kind = ticket.kind;
    let dir = ticket.dir;
    let current = core
        .dirs
        .get(&dir)
        .and_then(|d| d.slot(kind))
        .map(|in_flight| in_flight.generation == ticket.generation)
        .unwrap_or(false);
    if !current {
        log_sched_trace!("Stale delivery dropped", dir = dir.0, job = kind.job_name());
        return;
    }

    core.hold_dispatch(dir, |core| {
        let Some(mut in_flight) = core.dirs.get_mut(&dir).and_then(|d| d.slot_mut(kind).take()) else {
            return;
        };

        let progress = if kind == FetchKind::FileList {
            file_list::complete(core, dir, outcome)
        } else {
            match (fetcher(kind), in_flight.file) {
                (Some(fetcher), Some(file)) if !is_cancelled(&outcome) => {
                    let job = Job {
                        ticket,
                        file,
                        token: in_flight.token.clone(),
                    };
                    fetcher.complete(core, &job, &mut in_flight.state, outcome)
                }
                // Target destroyed mid-flight, or the backend gave up: finish
                // without touching any file.
                _ => Progress::Done,
            }
        };

        match progress {
            Progress::Continue => {
                if let Some(d) = core.dirs.get_mut(&dir) {
                    *d.slot_mut(kind) = Some(in_flight);
                }
            }
            Progress::Done => {
                in_flight.token.cancel();
                if kind == FetchKind::FileList {
                    file_list::finish_load(core, dir);
                }
                core.admission.end(dir, kind.job_name());
            }
        }
    });
}

fn is_cancelled(outcome: &Outcome) -> bool {
    let failure = match outcome {
        Outcome::Listing(ListingEvent::Opened(Err(e))) => Some(e),
        Outcome::Listing(ListingEvent::Finished(Some(e))) => Some(e),
        Outcome::Info(Err(e))
        | Outcome::Contents(Err(e))
        | Outcome::Mount(Err(e))
        | Outcome::Filesystem(Err(e))
        | Outcome::Thumbnail(Err(e)) => Some(e),
        _ => None,
    };
    matches!(failure, Some(IoFailure::Cancelled))
}

/// Apply a provider's deferred answer.
pub(crate) fn provider_response(
    core: &mut Core,
    dir: DirectoryId,
    provider: ProviderId,
    handle: ProviderHandle,
    attributes: Option<Vec<(String, String)>>,
) {
    extension::response(core, dir, provider, handle, attributes);
}
