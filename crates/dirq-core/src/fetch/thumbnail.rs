//! Thumbnail loading.
//!
//! The cached thumbnail is tried first. If it cannot be loaded and the file
//! asked for it, the original image is decoded instead, size permitting.

use dirq_config::log_thumb_debug;

use crate::fetch::{FetchState, Fetcher, Issued, Job, Progress};
use crate::file::File;
use crate::ids::FileId;
use crate::io::Outcome;
use crate::request::RequestKind;
use crate::state::Core;

pub(crate) struct ThumbnailFetcher;

impl Fetcher for ThumbnailFetcher {
    fn is_needy(&self, core: &mut Core, file: FileId) -> bool {
        super::wanted_and_lacking(core, file, RequestKind::Thumbnail, File::lacks_thumbnail)
    }

    fn issue(&self, core: &mut Core, job: &Job) -> Issued {
        let Some(path) = core.files.get(&job.file).and_then(|f| f.thumbnail_path.clone()) else {
            return Issued::Finished;
        };
        core.backend
            .load_thumbnail(job.ticket, &path, job.token.clone(), core.sink.clone());
        Issued::Pending(FetchState::Thumbnail { tried_original: false })
    }

    fn complete(&self, core: &mut Core, job: &Job, state: &mut FetchState, outcome: Outcome) -> Progress {
        let (Outcome::Thumbnail(result), FetchState::Thumbnail { tried_original }) = (outcome, state) else {
            return Progress::Done;
        };
        let max_size = core.config.max_thumbnail_file_size;
        let Some(f) = core.files.get_mut(&job.file) else {
            return Progress::Done;
        };

        match result {
            Ok(thumbnail) => {
                let fresh = *tried_original
                    || match thumbnail.source_mtime {
                        Some(mtime) => mtime == 0 || mtime == f.mtime(),
                        None => true,
                    };
                if fresh {
                    f.thumbnail.set(thumbnail);
                } else {
                    log_thumb_debug!("Stale thumbnail discarded", file = job.file.0);
                    f.thumbnail.not_applicable();
                    f.thumbnail_path = None;
                }
            }
            Err(_) if !*tried_original && f.thumbnail_wants_original && f.size() <= max_size => {
                let location = f.location.clone();
                *tried_original = true;
                core.backend
                    .load_thumbnail(job.ticket, &location, job.token.clone(), core.sink.clone());
                return Progress::Continue;
            }
            Err(_) => f.thumbnail.fail(),
        }
        core.file_changed(job.file);
        Progress::Done
    }
}
