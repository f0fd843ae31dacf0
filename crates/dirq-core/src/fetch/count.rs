//! Shallow item count of a directory.

use crate::fetch::{file_list, FetchState, Fetcher, Issued, Job, Progress};
use crate::ids::FileId;
use crate::io::{ListingEvent, Outcome};
use crate::request::RequestKind;
use crate::state::Core;

pub(crate) struct DirectoryCountFetcher;

impl Fetcher for DirectoryCountFetcher {
    fn is_needy(&self, core: &mut Core, file: FileId) -> bool {
        match core.files.get(&file) {
            // A listing of the directory itself will produce the count.
            Some(f) if f.lacks_directory_count() && !f.loading_directory => {
                core.is_wanted(file, RequestKind::DirectoryCount)
            }
            _ => false,
        }
    }

    fn settle_without_io(&self, core: &mut Core, file: FileId) -> bool {
        match core.files.get_mut(&file) {
            // With the type unknown, only the enumeration can tell.
            Some(f) if f.info.is_up_to_date() && !f.is_directory() => {
                f.directory_count.not_applicable();
                true
            }
            _ => false,
        }
    }

    fn issue(&self, core: &mut Core, job: &Job) -> Issued {
        let Some(location) = core.files.get(&job.file).map(|f| f.location.clone()) else {
            return Issued::Finished;
        };
        let hidden = file_list::read_hidden_names(core, &location);
        core.backend.enumerate(
            job.ticket,
            &location,
            core.config.load_batch_size,
            job.token.clone(),
            core.sink.clone(),
        );
        Issued::Pending(FetchState::DirectoryCount { count: 0, hidden })
    }

    fn complete(&self, core: &mut Core, job: &Job, state: &mut FetchState, outcome: Outcome) -> Progress {
        let (Outcome::Listing(event), FetchState::DirectoryCount { count, hidden }) = (outcome, state) else {
            return Progress::Done;
        };
        let result = match event {
            ListingEvent::Opened(Ok(())) => return Progress::Continue,
            ListingEvent::Batch(entries) => {
                let visible = entries.iter().filter(|e| !core.should_skip_listed(&*hidden, e)).count();
                *count += visible as u32;
                return Progress::Continue;
            }
            ListingEvent::Finished(None) => Some(*count),
            ListingEvent::Opened(Err(_)) | ListingEvent::Finished(Some(_)) => None,
        };

        if let Some(f) = core.files.get_mut(&job.file) {
            match result {
                Some(count) => f.directory_count.set(count),
                None => f.directory_count.fail(),
            }
        }
        core.file_changed(job.file);
        Progress::Done
    }
}
