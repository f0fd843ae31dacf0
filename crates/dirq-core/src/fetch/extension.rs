//! Extension info from loaded providers, one provider at a time.

use dirq_config::log_fetch_warn;

use crate::fetch::{FetchKind, FetchState, Fetcher, Issued, Job, Progress};
use crate::file::File;
use crate::ids::{DirectoryId, FileId};
use crate::io::Outcome;
use crate::provider::{ProviderFile, ProviderHandle, ProviderId, ProviderResponder, ProviderResult};
use crate::request::RequestKind;
use crate::state::Core;

pub(crate) struct ExtensionFetcher;

impl Fetcher for ExtensionFetcher {
    fn is_needy(&self, core: &mut Core, file: FileId) -> bool {
        super::wanted_and_lacking(core, file, RequestKind::ExtensionInfo, File::lacks_extension_info)
    }

    fn issue(&self, core: &mut Core, job: &Job) -> Issued {
        let Some(f) = core.files.get(&job.file) else {
            return Issued::Finished;
        };
        let Some(&provider_id) = f.pending_providers.first() else {
            return Issued::Finished;
        };
        let Some(provider) = core.providers.get(provider_id).cloned() else {
            finish_provider(core, job.file, provider_id);
            return Issued::Finished;
        };

        let responder = ProviderResponder {
            dir: job.ticket.dir,
            provider: provider_id,
            sink: core.sink.clone(),
        };
        let result = {
            let view = ProviderFile {
                location: &f.location,
                name: &f.name,
                mime_type: f.mime_type(),
            };
            provider.update_file_info(&view, responder)
        };

        match result {
            ProviderResult::Complete(attributes) => {
                apply(core, job.file, provider_id, Some(attributes));
                Issued::Finished
            }
            ProviderResult::Failed => {
                apply(core, job.file, provider_id, None);
                Issued::Finished
            }
            ProviderResult::InProgress(handle) => Issued::Pending(FetchState::Extension {
                provider: provider_id,
                handle,
            }),
        }
    }

    // Providers answer through `response`, never through a ticket.
    fn complete(&self, _core: &mut Core, _job: &Job, _state: &mut FetchState, _outcome: Outcome) -> Progress {
        Progress::Done
    }

    fn cancelled(&self, core: &mut Core, _file: Option<FileId>, state: &FetchState) {
        if let FetchState::Extension { provider, handle } = state {
            if let Some(p) = core.providers.get(*provider) {
                p.cancel_update(*handle);
            }
        }
    }
}

/// A provider answered an update it had deferred.
pub(crate) fn response(
    core: &mut Core,
    dir: DirectoryId,
    provider: ProviderId,
    handle: ProviderHandle,
    attributes: Option<Vec<(String, String)>>,
) {
    core.hold_dispatch(dir, |core| {
        let matches = core
            .dirs
            .get(&dir)
            .and_then(|d| d.slot(FetchKind::ExtensionInfo))
            .map(|in_flight| {
                matches!(in_flight.state,
                    FetchState::Extension { provider: p, handle: h } if p == provider && h == handle)
            })
            .unwrap_or(false);
        if !matches {
            log_fetch_warn!("Unexpected provider response", dir = dir.0, provider = provider);
            return;
        }

        let Some(in_flight) = core
            .dirs
            .get_mut(&dir)
            .and_then(|d| d.slot_mut(FetchKind::ExtensionInfo).take())
        else {
            return;
        };
        core.admission.end(dir, FetchKind::ExtensionInfo.job_name());
        if let Some(file) = in_flight.file {
            apply(core, file, provider, attributes);
        }
    });
}

fn apply(core: &mut Core, file: FileId, provider: ProviderId, attributes: Option<Vec<(String, String)>>) {
    if let (Some(attributes), Some(f)) = (attributes, core.files.get_mut(&file)) {
        for (key, value) in attributes {
            match f.extension_attributes.iter_mut().find(|(k, _)| *k == key) {
                Some(slot) => slot.1 = value,
                None => f.extension_attributes.push((key, value)),
            }
        }
    }
    finish_provider(core, file, provider);
}

/// Drop `provider` from the file's pending list; the file changes once the
/// last provider is done.
fn finish_provider(core: &mut Core, file: FileId, provider: ProviderId) {
    let Some(f) = core.files.get_mut(&file) else {
        return;
    };
    f.pending_providers.retain(|p| *p != provider);
    if f.pending_providers.is_empty() {
        core.file_changed(file);
    }
}
