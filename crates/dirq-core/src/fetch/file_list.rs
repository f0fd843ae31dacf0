//! Loading and tracking the file list of a directory.
//!
//! While anything wants the file list the directory is *monitored*: it holds
//! a reference on each of its files and keeps one listing of itself loaded.
//! Enumerated entries are buffered and folded into the file set from the
//! main loop, a batch at a time.

use std::collections::HashSet;
use std::path::Path;

use dirq_config::{log_fetch_debug, log_fetch_warn};

use crate::directory::{InFlight, LoadState, MimeSet};
use crate::error::IoFailure;
use crate::events::DirectoryEvent;
use crate::fetch::{FetchKind, FetchState, Progress};
use crate::ids::{DirectoryId, FileId};
use crate::io::{EntryInfo, ListingEvent, Outcome, WatchChange};
use crate::request::FileAttributes;
use crate::state::{Core, IdleTask};

/// Attributes dropped when a watch reports a file as modified.
const CHANGE_INVALIDATES: FileAttributes = FileAttributes::INFO
    .union(FileAttributes::LINK_INFO)
    .union(FileAttributes::DIRECTORY_ITEM_COUNT)
    .union(FileAttributes::DIRECTORY_ITEM_MIME_TYPES)
    .union(FileAttributes::TOP_LEFT_TEXT)
    .union(FileAttributes::LARGE_TOP_LEFT_TEXT)
    .union(FileAttributes::THUMBNAIL)
    .union(FileAttributes::FILESYSTEM_INFO)
    .union(FileAttributes::EXTENSION_INFO);

pub(crate) fn start_or_stop(core: &mut Core, dir: DirectoryId) {
    let Some(d) = core.dirs.get(&dir) else {
        return;
    };
    if d.is_file_list_wanted() {
        start_monitoring(core, dir);
    } else {
        stop_monitoring(core, dir);
    }
}

fn start_monitoring(core: &mut Core, dir: DirectoryId) {
    let Some(d) = core.dirs.get_mut(&dir) else {
        return;
    };
    if !d.file_list_monitored {
        d.file_list_monitored = true;
        for file in d.file_list.clone() {
            core.take_listing_hold(file);
        }
    }

    let Some(d) = core.dirs.get(&dir) else {
        return;
    };
    if d.directory_loaded || d.slot(FetchKind::FileList).is_some() {
        return;
    }
    if !core.admission.try_start(dir, FetchKind::FileList.job_name()) {
        return;
    }

    mark_all_files_unconfirmed(core, dir);

    let directory_file = core.corresponding_file(dir);
    if let Some(f) = directory_file.and_then(|file| core.files.get_mut(&file)) {
        f.loading_directory = true;
    }

    let Some(location) = core.dirs.get(&dir).map(|d| d.location.clone()) else {
        return;
    };
    let hidden_names = read_hidden_names(core, &location);

    let ticket = core.next_ticket(dir, FetchKind::FileList);
    let token = tokio_util::sync::CancellationToken::new();
    if let Some(d) = core.dirs.get_mut(&dir) {
        d.hidden_names = hidden_names;
        d.load_state = Some(LoadState {
            directory_file,
            count: 0,
            mime: MimeSet::default(),
        });
        *d.slot_mut(FetchKind::FileList) = Some(InFlight {
            generation: ticket.generation,
            token: token.clone(),
            file: directory_file,
            state: FetchState::FileList,
        });
    }

    log_fetch_debug!(
        "Listing started",
        dir = dir.0,
        location = tracing::field::display(location.display())
    );
    core.backend
        .enumerate(ticket, &location, core.config.load_batch_size, token, core.sink.clone());
}

/// Names listed in `location`'s `.hidden`, plus the KDE trash on the desktop.
pub(crate) fn read_hidden_names(core: &Core, location: &Path) -> HashSet<String> {
    let mut names: HashSet<String> = core.backend.read_hidden_names(location).into_iter().collect();
    if let Some(trash) = &core.config.kde_trash_dir {
        if core.config.desktop_dir.as_deref() == Some(location) {
            names.insert(trash.clone());
        }
    }
    names
}

fn mark_all_files_unconfirmed(core: &mut Core, dir: DirectoryId) {
    let Some(files) = core.dirs.get(&dir).map(|d| d.file_list.clone()) else {
        return;
    };
    for file in files {
        if let Some(f) = core.files.get_mut(&file) {
            f.unconfirmed = true;
        }
    }
}

fn stop_monitoring(core: &mut Core, dir: DirectoryId) {
    let Some(d) = core.dirs.get_mut(&dir) else {
        return;
    };
    if !d.file_list_monitored {
        return;
    }
    d.file_list_monitored = false;
    let files = d.file_list.clone();

    cancel(core, dir);
    for file in files {
        core.release_listing_hold(file);
    }
    if let Some(d) = core.dirs.get_mut(&dir) {
        d.directory_loaded = false;
    }
}

/// Abandon the listing and anything it buffered.
pub(crate) fn cancel(core: &mut Core, dir: DirectoryId) {
    load_cancel(core, dir);
    drop_pending(core, dir);
}

pub(crate) fn drop_pending(core: &mut Core, dir: DirectoryId) {
    if let Some(d) = core.dirs.get_mut(&dir) {
        d.dequeue_pending_scheduled = false;
        d.pending_entries.clear();
        d.hidden_names.clear();
    }
}

/// Cancel an in-flight listing and release its admission slot.
pub(crate) fn load_cancel(core: &mut Core, dir: DirectoryId) {
    let Some(in_flight) = core
        .dirs
        .get_mut(&dir)
        .and_then(|d| d.slot_mut(FetchKind::FileList).take())
    else {
        return;
    };
    in_flight.token.cancel();
    finish_load(core, dir);
    core.admission.end(dir, FetchKind::FileList.job_name());
}

/// Release what a listing held on to, once it is over for any reason.
pub(crate) fn finish_load(core: &mut Core, dir: DirectoryId) {
    let Some(load) = core.dirs.get_mut(&dir).and_then(|d| d.load_state.take()) else {
        return;
    };
    let Some(file) = load.directory_file else {
        return;
    };
    let owner = core.files.get_mut(&file).map(|f| {
        f.loading_directory = false;
        f.directory
    });
    if let Some(owner) = owner {
        if owner != dir {
            core.state_changed(owner);
        }
    }
    core.file_unref(file);
}

pub(crate) fn complete(core: &mut Core, dir: DirectoryId, outcome: Outcome) -> Progress {
    match outcome {
        Outcome::Listing(ListingEvent::Opened(Ok(()))) => Progress::Continue,
        Outcome::Listing(ListingEvent::Opened(Err(error))) => {
            load_done(core, dir, Some(error));
            Progress::Done
        }
        Outcome::Listing(ListingEvent::Batch(entries)) => {
            for info in entries {
                load_one(core, dir, info);
            }
            Progress::Continue
        }
        Outcome::Listing(ListingEvent::Finished(error)) => {
            load_done(core, dir, error);
            Progress::Done
        }
        other => {
            log_fetch_warn!("Unexpected delivery for a listing", dir = dir.0, outcome = tracing::field::debug(&other));
            Progress::Continue
        }
    }
}

/// Buffer one entry and schedule it to be folded in.
fn load_one(core: &mut Core, dir: DirectoryId, info: EntryInfo) {
    let Some(d) = core.dirs.get_mut(&dir) else {
        return;
    };
    d.pending_entries.push(info);
    if !d.dequeue_pending_scheduled {
        d.dequeue_pending_scheduled = true;
        core.schedule(IdleTask::DequeuePending(dir));
    }
}

fn load_done(core: &mut Core, dir: DirectoryId, error: Option<IoFailure>) {
    let Some(d) = core.dirs.get_mut(&dir) else {
        return;
    };
    d.directory_loaded = true;
    d.directory_loaded_sent_notification = false;
    d.dequeue_pending_scheduled = false;
    let files = d.file_list.clone();

    if let Some(error) = error {
        log_fetch_warn!("Listing failed", dir = dir.0, error = tracing::field::display(&error));
        // Nothing can be marked gone on the strength of a partial listing.
        for file in files {
            if let Some(f) = core.files.get_mut(&file) {
                f.unconfirmed = false;
            }
        }
        core.emit(DirectoryEvent::LoadError { dir, error });
    }

    dequeue_pending(core, dir);
}

/// Fold buffered entries into the file set and publish what changed.
pub(crate) fn dequeue_pending(core: &mut Core, dir: DirectoryId) {
    let Some(d) = core.dirs.get_mut(&dir) else {
        return;
    };
    let entries = std::mem::take(&mut d.pending_entries);
    if !d.file_list_monitored {
        return;
    }

    let mut added = Vec::new();
    let mut changed = Vec::new();

    for info in entries {
        if !core.should_skip(Some(dir), &info) {
            if let Some(load) = core.dirs.get_mut(&dir).and_then(|d| d.load_state.as_mut()) {
                load.count += 1;
                if let Some(mime) = &info.content_type {
                    load.mime.insert(mime);
                }
            }
        }

        let existing = core
            .dirs
            .get(&dir)
            .and_then(|d| d.files_by_name.get(&info.name).copied());
        match existing {
            Some(file) => {
                let Some(f) = core.files.get_mut(&file) else {
                    continue;
                };
                f.unconfirmed = false;
                let updated = f.update_info(info);
                if !f.is_added {
                    f.is_added = true;
                    added.push(file);
                } else if updated {
                    changed.push(file);
                }
            }
            None => {
                if let Some(file) = core.new_file_from_info(dir, info) {
                    if let Some(f) = core.files.get_mut(&file) {
                        f.is_added = true;
                    }
                    added.push(file);
                }
            }
        }
    }

    let mut gone = Vec::new();
    let Some(d) = core.dirs.get(&dir) else {
        return;
    };
    let loaded = d.directory_loaded;
    if loaded {
        let unconfirmed: Vec<FileId> = d
            .file_list
            .iter()
            .copied()
            .filter(|f| core.files.get(f).map(|f| f.unconfirmed).unwrap_or(false))
            .collect();
        for file in unconfirmed {
            core.mark_gone(file);
            changed.push(file);
            gone.push(file);
        }
    }

    if !changed.is_empty() {
        core.emit(DirectoryEvent::FilesChanged { dir, files: changed });
    }
    if !added.is_empty() {
        core.emit(DirectoryEvent::FilesAdded { dir, files: added });
    }

    let notify = core
        .dirs
        .get(&dir)
        .map(|d| loaded && !d.directory_loaded_sent_notification)
        .unwrap_or(false);
    if notify {
        core.emit(DirectoryEvent::DoneLoading { dir });
        publish_load_totals(core, dir);
        if let Some(d) = core.dirs.get_mut(&dir) {
            d.directory_loaded_sent_notification = true;
        }
    }

    for file in gone {
        core.release_listing_hold(file);
    }
}

/// A full listing yields the item count and MIME list of the directory for
/// free; store them on the file representing it.
fn publish_load_totals(core: &mut Core, dir: DirectoryId) {
    let Some((file, count, mime)) = core
        .dirs
        .get(&dir)
        .and_then(|d| d.load_state.as_ref())
        .and_then(|load| Some((load.directory_file?, load.count, load.mime.clone())))
    else {
        return;
    };
    if let Some(f) = core.files.get_mut(&file) {
        f.directory_count.set(count);
        f.mime_list.set(mime.into_list());
    }
    core.file_changed(file);
}

/// Apply a change reported by the directory watch.
pub(crate) fn watch_event(core: &mut Core, dir: DirectoryId, change: WatchChange) {
    let name_of = |path: &Path| path.file_name().map(|n| n.to_string_lossy().into_owned());
    let lookup = |core: &Core, name: &str| core.dirs.get(&dir).and_then(|d| d.files_by_name.get(name).copied());

    match change {
        WatchChange::Created(info) => match lookup(core, &info.name) {
            Some(file) => core.invalidate_file_attributes(file, CHANGE_INVALIDATES),
            None => {
                if core.dirs.get(&dir).map(|d| d.file_list_monitored).unwrap_or(false) {
                    load_one(core, dir, info);
                }
            }
        },
        WatchChange::Changed(path) => {
            if let Some(file) = name_of(&path).and_then(|name| lookup(core, &name)) {
                core.invalidate_file_attributes(file, CHANGE_INVALIDATES);
                core.file_changed(file);
            }
        }
        WatchChange::Removed(path) => {
            if let Some(file) = name_of(&path).and_then(|name| lookup(core, &name)) {
                core.mark_gone(file);
                core.emit(DirectoryEvent::FilesChanged {
                    dir,
                    files: vec![file],
                });
                core.release_listing_hold(file);
                core.state_changed(dir);
            }
        }
    }
}
