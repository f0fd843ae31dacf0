//! Preview text for text files.

use crate::fetch::{FetchState, Fetcher, Issued, Job, Progress};
use crate::ids::FileId;
use crate::io::{Outcome, ReadLimit};
use crate::request::RequestKind;
use crate::state::Core;
use crate::text::extract_top_left_text;

pub(crate) struct TopLeftFetcher;

impl TopLeftFetcher {
    fn needs_large(core: &Core, file: FileId) -> bool {
        match core.files.get(&file) {
            Some(f) if f.lacks_large_top_left() => core.is_wanted(file, RequestKind::LargeTopLeftText),
            _ => false,
        }
    }

    fn needs_normal(core: &Core, file: FileId) -> bool {
        match core.files.get(&file) {
            Some(f) if f.lacks_top_left() => core.is_wanted(file, RequestKind::TopLeftText),
            _ => false,
        }
    }
}

impl Fetcher for TopLeftFetcher {
    fn is_needy(&self, core: &mut Core, file: FileId) -> bool {
        Self::needs_normal(core, file) || Self::needs_large(core, file)
    }

    fn settle_without_io(&self, core: &mut Core, file: FileId) -> bool {
        match core.files.get_mut(&file) {
            Some(f) if !f.should_get_top_left_text() => {
                f.top_left_text.not_applicable();
                f.got_large_top_left_text = false;
                true
            }
            _ => false,
        }
    }

    fn issue(&self, core: &mut Core, job: &Job) -> Issued {
        let large = Self::needs_large(core, job.file);
        let Some(location) = core.files.get(&job.file).map(|f| f.location.clone()) else {
            return Issued::Finished;
        };
        let caps = core.config.preview_caps(large);
        let limit = ReadLimit {
            max_bytes: caps.max_bytes,
            max_lines: Some(caps.max_lines),
        };
        core.backend
            .load_contents(job.ticket, &location, limit, job.token.clone(), core.sink.clone());
        Issued::Pending(FetchState::TopLeft { large })
    }

    fn complete(&self, core: &mut Core, job: &Job, state: &mut FetchState, outcome: Outcome) -> Progress {
        let (Outcome::Contents(result), FetchState::TopLeft { large }) = (outcome, state) else {
            return Progress::Done;
        };
        let caps = core.config.preview_caps(*large);
        if let Some(f) = core.files.get_mut(&job.file) {
            match result {
                Ok(bytes) => {
                    f.top_left_text.set(extract_top_left_text(&bytes, caps));
                    f.got_large_top_left_text = *large;
                }
                Err(_) => {
                    f.top_left_text.fail();
                    f.got_large_top_left_text = false;
                }
            }
        }
        core.file_changed(job.file);
        Progress::Done
    }
}
