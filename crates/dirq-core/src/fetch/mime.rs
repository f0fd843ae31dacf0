//! Distinct content types among a directory's children.

use crate::directory::MimeSet;
use crate::fetch::{FetchState, Fetcher, Issued, Job, Progress};
use crate::ids::FileId;
use crate::io::{ListingEvent, Outcome};
use crate::request::RequestKind;
use crate::state::Core;

pub(crate) struct MimeListFetcher;

impl Fetcher for MimeListFetcher {
    fn is_needy(&self, core: &mut Core, file: FileId) -> bool {
        match core.files.get(&file) {
            Some(f) if f.lacks_mime_list() && !f.loading_directory => core.is_wanted(file, RequestKind::MimeList),
            _ => false,
        }
    }

    fn settle_without_io(&self, core: &mut Core, file: FileId) -> bool {
        match core.files.get_mut(&file) {
            Some(f) if !f.is_directory() => {
                f.mime_list.not_applicable();
                true
            }
            _ => false,
        }
    }

    fn issue(&self, core: &mut Core, job: &Job) -> Issued {
        let Some(location) = core.files.get(&job.file).map(|f| f.location.clone()) else {
            return Issued::Finished;
        };
        core.backend.enumerate(
            job.ticket,
            &location,
            core.config.load_batch_size,
            job.token.clone(),
            core.sink.clone(),
        );
        Issued::Pending(FetchState::MimeList(MimeSet::default()))
    }

    fn complete(&self, core: &mut Core, job: &Job, state: &mut FetchState, outcome: Outcome) -> Progress {
        let (Outcome::Listing(event), FetchState::MimeList(types)) = (outcome, state) else {
            return Progress::Done;
        };
        let succeeded = match event {
            ListingEvent::Opened(Ok(())) => return Progress::Continue,
            ListingEvent::Batch(entries) => {
                for entry in entries.iter().filter(|e| !core.should_skip(None, e)) {
                    if let Some(mime) = &entry.content_type {
                        types.insert(mime);
                    }
                }
                return Progress::Continue;
            }
            ListingEvent::Finished(None) => true,
            // Any failure, even after partial results, leaves the list unknowable.
            ListingEvent::Opened(Err(_)) | ListingEvent::Finished(Some(_)) => false,
        };

        if let Some(f) = core.files.get_mut(&job.file) {
            if succeeded {
                f.mime_list.set(std::mem::take(types).into_list());
            } else {
                f.mime_list.fail();
            }
        }
        core.file_changed(job.file);
        Progress::Done
    }
}
