//! Recursive counts over a directory subtree.
//!
//! Subdirectories are visited one at a time; each newly found directory is
//! pushed to the front of the pending list. Hard-linked files are sized once.

use crate::events::DirectoryEvent;
use crate::fetch::{DeepWalk, FetchState, Fetcher, Issued, Job, Progress};
use crate::file::{DeepCountStatus, File};
use crate::ids::FileId;
use crate::io::{EntryInfo, ListingEvent, Outcome};
use crate::request::RequestKind;
use crate::state::Core;

pub(crate) struct DeepCountFetcher;

impl Fetcher for DeepCountFetcher {
    fn is_needy(&self, core: &mut Core, file: FileId) -> bool {
        super::wanted_and_lacking(core, file, RequestKind::DeepCount, File::lacks_deep_count)
    }

    fn settle_without_io(&self, core: &mut Core, file: FileId) -> bool {
        match core.files.get_mut(&file) {
            Some(f) if !f.is_directory() => {
                f.deep_counts.status = DeepCountStatus::Done;
                true
            }
            _ => false,
        }
    }

    fn issue(&self, core: &mut Core, job: &Job) -> Issued {
        let Some(f) = core.files.get_mut(&job.file) else {
            return Issued::Finished;
        };
        f.deep_counts.restart();
        let location = f.location.clone();
        enumerate(core, job, &location);
        Issued::Pending(FetchState::DeepCount(DeepWalk {
            current: location,
            ..Default::default()
        }))
    }

    fn complete(&self, core: &mut Core, job: &Job, state: &mut FetchState, outcome: Outcome) -> Progress {
        let (Outcome::Listing(event), FetchState::DeepCount(walk)) = (outcome, state) else {
            return Progress::Done;
        };
        match event {
            ListingEvent::Opened(Ok(())) => Progress::Continue,
            ListingEvent::Opened(Err(_)) => {
                if let Some(f) = core.files.get_mut(&job.file) {
                    f.deep_counts.unreadable += 1;
                }
                next_dir(core, job, walk)
            }
            ListingEvent::Batch(entries) => {
                for entry in &entries {
                    count_one(core, job.file, walk, entry);
                }
                Progress::Continue
            }
            ListingEvent::Finished(_) => next_dir(core, job, walk),
        }
    }

    fn cancelled(&self, core: &mut Core, file: Option<FileId>, _state: &FetchState) {
        if let Some(f) = file.and_then(|file| core.files.get_mut(&file)) {
            f.deep_counts.status = DeepCountStatus::NotStarted;
        }
    }
}

fn enumerate(core: &Core, job: &Job, location: &std::path::Path) {
    core.backend.enumerate(
        job.ticket,
        location,
        core.config.load_batch_size,
        job.token.clone(),
        core.sink.clone(),
    );
}

fn count_one(core: &mut Core, file: FileId, walk: &mut DeepWalk, entry: &EntryInfo) {
    let first_sighting = match entry.inode {
        Some(inode) if inode != 0 => walk.seen_inodes.insert(inode),
        _ => true,
    };
    let hidden = core.should_skip(None, entry);
    let Some(f) = core.files.get_mut(&file) else {
        return;
    };

    let counts = &mut f.deep_counts;
    if hidden {
        counts.hidden += 1;
    } else if entry.is_directory() {
        counts.directories += 1;
    } else {
        counts.files += 1;
    }
    if entry.is_directory() {
        walk.pending.push_front(walk.current.join(&entry.name));
    }
    if first_sighting {
        counts.size += entry.size;
    }
}

/// Move on to the next pending subdirectory, or finish.
fn next_dir(core: &mut Core, job: &Job, walk: &mut DeepWalk) -> Progress {
    let Some(counts) = core.files.get(&job.file).map(|f| f.deep_counts) else {
        return Progress::Done;
    };

    match walk.pending.pop_front() {
        Some(next) => {
            core.emit(DirectoryEvent::DeepCountProgress {
                dir: job.ticket.dir,
                file: job.file,
                counts,
            });
            enumerate(core, job, &next);
            walk.current = next;
            Progress::Continue
        }
        None => {
            if let Some(f) = core.files.get_mut(&job.file) {
                f.deep_counts.status = DeepCountStatus::Done;
            }
            let counts = core.files.get(&job.file).map(|f| f.deep_counts).unwrap_or(counts);
            core.emit(DirectoryEvent::DeepCountProgress {
                dir: job.ticket.dir,
                file: job.file,
                counts,
            });
            core.file_changed(job.file);
            Progress::Done
        }
    }
}
