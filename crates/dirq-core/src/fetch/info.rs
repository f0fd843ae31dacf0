//! Basic file info.

use crate::error::IoFailure;
use crate::fetch::{wanted_and_lacking, FetchState, Fetcher, Issued, Job, Progress};
use crate::file::File;
use crate::ids::FileId;
use crate::io::Outcome;
use crate::request::RequestKind;
use crate::state::Core;

pub(crate) struct FileInfoFetcher;

impl Fetcher for FileInfoFetcher {
    fn is_needy(&self, core: &mut Core, file: FileId) -> bool {
        wanted_and_lacking(core, file, RequestKind::FileInfo, File::lacks_info)
    }

    fn issue(&self, core: &mut Core, job: &Job) -> Issued {
        let Some(f) = core.files.get_mut(&job.file) else {
            return Issued::Finished;
        };
        f.get_info_error = None;
        let location = f.location.clone();
        core.backend
            .query_info(job.ticket, &location, job.token.clone(), core.sink.clone());
        Issued::Pending(FetchState::Simple)
    }

    fn complete(&self, core: &mut Core, job: &Job, _state: &mut FetchState, outcome: Outcome) -> Progress {
        let Outcome::Info(result) = outcome else {
            return Progress::Done;
        };
        let Some(f) = core.files.get_mut(&job.file) else {
            return Progress::Done;
        };
        match result {
            Ok(info) => {
                f.update_info(info);
                core.file_changed(job.file);
            }
            Err(error) => {
                let gone = error == IoFailure::NotFound;
                f.mark_info_failed(error);
                core.file_changed(job.file);
                if gone {
                    core.mark_gone(job.file);
                    core.release_listing_hold(job.file);
                }
            }
        }
        Progress::Done
    }
}
