//! Mount lookup for mountpoints, volumes and top-level directories.

use std::path::PathBuf;

use crate::fetch::{FetchState, Fetcher, Issued, Job, Progress};
use crate::file::File;
use crate::ids::FileId;
use crate::io::{FileType, MountInfo, Outcome};
use crate::request::RequestKind;
use crate::state::Core;

pub(crate) struct MountFetcher;

impl Fetcher for MountFetcher {
    fn is_needy(&self, core: &mut Core, file: FileId) -> bool {
        super::wanted_and_lacking(core, file, RequestKind::Mount, File::lacks_mount)
    }

    fn issue(&self, core: &mut Core, job: &Job) -> Issued {
        let Some(f) = core.files.get(&job.file) else {
            return Issued::Finished;
        };
        let location = f.location.clone();

        if f.file_type() == FileType::Mountable {
            // Volumes resolve against the mount table directly.
            let target: PathBuf = f
                .info()
                .value()
                .and_then(|i| i.target.clone())
                .unwrap_or_else(|| location.clone());
            let found = core
                .backend
                .list_mounts()
                .into_iter()
                .find(|m| !m.is_shadowed && m.root == target);
            got_mount(core, job.file, found);
            return Issued::Finished;
        }

        core.backend
            .find_enclosing_mount(job.ticket, &location, job.token.clone(), core.sink.clone());
        Issued::Pending(FetchState::Simple)
    }

    fn complete(&self, core: &mut Core, job: &Job, _state: &mut FetchState, outcome: Outcome) -> Progress {
        let Outcome::Mount(result) = outcome else {
            return Progress::Done;
        };
        let Some(location) = core.files.get(&job.file).map(|f| f.location.clone()) else {
            return Progress::Done;
        };
        match result {
            // Only a mount rooted exactly here belongs to this file.
            Ok(mount) => got_mount(core, job.file, mount.filter(|m| m.root == location)),
            Err(_) => {
                if let Some(f) = core.files.get_mut(&job.file) {
                    f.mount.fail();
                }
                core.file_changed(job.file);
            }
        }
        Progress::Done
    }
}

fn got_mount(core: &mut Core, file: FileId, mount: Option<MountInfo>) {
    if let Some(f) = core.files.get_mut(&file) {
        match mount {
            Some(mount) => f.mount.set(mount),
            None => f.mount.not_applicable(),
        }
    }
    core.file_changed(file);
}
