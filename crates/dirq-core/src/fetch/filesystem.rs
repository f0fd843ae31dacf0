//! Read-only and preview flags of the backing filesystem.

use crate::fetch::{FetchState, Fetcher, Issued, Job, Progress};
use crate::file::File;
use crate::ids::FileId;
use crate::io::Outcome;
use crate::request::RequestKind;
use crate::state::Core;

pub(crate) struct FilesystemInfoFetcher;

impl Fetcher for FilesystemInfoFetcher {
    fn is_needy(&self, core: &mut Core, file: FileId) -> bool {
        super::wanted_and_lacking(core, file, RequestKind::FilesystemInfo, File::lacks_filesystem_info)
    }

    fn issue(&self, core: &mut Core, job: &Job) -> Issued {
        let Some(location) = core.files.get(&job.file).map(|f| f.location.clone()) else {
            return Issued::Finished;
        };
        core.backend
            .query_filesystem_info(job.ticket, &location, job.token.clone(), core.sink.clone());
        Issued::Pending(FetchState::Simple)
    }

    fn complete(&self, core: &mut Core, job: &Job, _state: &mut FetchState, outcome: Outcome) -> Progress {
        let Outcome::Filesystem(result) = outcome else {
            return Progress::Done;
        };
        if let Some(f) = core.files.get_mut(&job.file) {
            match result {
                Ok(Some(info)) => f.filesystem_info.set(info),
                // No answer still counts as known.
                Ok(None) => f.filesystem_info.not_applicable(),
                Err(_) => f.filesystem_info.fail(),
            }
        }
        core.file_changed(job.file);
        Progress::Done
    }
}
