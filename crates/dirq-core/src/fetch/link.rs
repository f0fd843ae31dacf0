//! Desktop link resolution.

use crate::fetch::{FetchState, Fetcher, Issued, Job, Progress};
use crate::file::{LinkInfo, LEGACY_LINK_MIME};
use crate::ids::FileId;
use crate::io::{Outcome, ReadLimit};
use crate::request::RequestKind;
use crate::state::Core;

/// Link files are tiny; anything past this is not a link.
const LINK_READ_LIMIT: usize = 64 * 1024;

const MAIN_GROUP: &str = "Desktop Entry";

pub(crate) struct LinkInfoFetcher;

impl Fetcher for LinkInfoFetcher {
    fn is_needy(&self, core: &mut Core, file: FileId) -> bool {
        core.lacks_link_info(file) && core.is_wanted(file, RequestKind::LinkInfo)
    }

    fn issue(&self, core: &mut Core, job: &Job) -> Issued {
        let Some(location) = core.files.get(&job.file).map(|f| f.location.clone()) else {
            return Issued::Finished;
        };
        core.backend.load_contents(
            job.ticket,
            &location,
            ReadLimit::bytes(LINK_READ_LIMIT),
            job.token.clone(),
            core.sink.clone(),
        );
        Issued::Pending(FetchState::Simple)
    }

    fn complete(&self, core: &mut Core, job: &Job, _state: &mut FetchState, outcome: Outcome) -> Progress {
        let Outcome::Contents(result) = outcome else {
            return Progress::Done;
        };
        let session = core.config.desktop_session.clone();
        let trusted_location = core
            .files
            .get(&job.file)
            .map(|f| core.config.is_trusted_location(&f.location))
            .unwrap_or(false);
        let Some(f) = core.files.get_mut(&job.file) else {
            return Progress::Done;
        };

        match result {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                let mut link = if f.mime_type() == Some(LEGACY_LINK_MIME) {
                    parse_legacy_link(&text)
                } else {
                    parse_desktop_entry(&text, session.as_deref())
                };
                // Untrusted launchers keep neither name nor icon.
                let trusted = !link.is_launcher || f.is_executable() || trusted_location;
                if !trusted {
                    link.display_name = None;
                    link.icon = None;
                }
                f.link_info.set(link);
            }
            Err(_) => f.link_info.fail(),
        }
        core.file_changed(job.file);
        Progress::Done
    }
}

/// Parse the `[Desktop Entry]` group of a `.desktop` file.
///
/// `session` is the running desktop; a link restricted away from it via
/// `OnlyShowIn` or `NotShowIn` is marked foreign.
pub fn parse_desktop_entry(contents: &str, session: Option<&str>) -> LinkInfo {
    let mut group = None;
    let mut entry_type = None;
    let mut url = None;
    let mut exec = None;
    let mut only_show_in = None;
    let mut not_show_in = None;
    let mut link = LinkInfo::default();

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            group = Some(name);
            continue;
        }
        if group != Some(MAIN_GROUP) {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().to_string();
        match key.trim() {
            "Type" => entry_type = Some(value),
            "Name" => link.display_name = Some(value),
            "Icon" => link.icon = Some(value),
            "URL" => url = Some(value),
            "Exec" => exec = Some(value),
            "OnlyShowIn" => only_show_in = Some(split_list(&value)),
            "NotShowIn" => not_show_in = Some(split_list(&value)),
            _ => {}
        }
    }

    match entry_type.as_deref() {
        Some("Application") if exec.is_some() => {
            link.is_launcher = true;
            link.target = exec;
        }
        Some("Link") => link.target = url,
        _ => {}
    }

    if let Some(session) = session {
        let listed = |list: &Option<Vec<String>>| list.as_ref().map(|l| l.iter().any(|s| s == session));
        if listed(&only_show_in) == Some(false) || listed(&not_show_in) == Some(true) {
            link.is_foreign = true;
        }
    }
    link
}

/// Legacy links carry only their target, on the first non-empty line.
fn parse_legacy_link(contents: &str) -> LinkInfo {
    LinkInfo {
        target: contents
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string),
        ..Default::default()
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_link_entry() {
        let link = parse_desktop_entry(
            "[Desktop Entry]\nType=Link\nName=Docs\nIcon=folder\nURL=file:///srv/docs\n",
            None,
        );
        assert_eq!(link.target.as_deref(), Some("file:///srv/docs"));
        assert_eq!(link.display_name.as_deref(), Some("Docs"));
        assert_eq!(link.icon.as_deref(), Some("folder"));
        assert!(!link.is_launcher);
    }

    #[test]
    fn test_parse_launcher_ignores_other_groups() {
        let text = "# comment\n[Desktop Entry]\nType=Application\nExec=editor %f\nName=Editor\n\
                    [Desktop Action New]\nName=Other\n";
        let link = parse_desktop_entry(text, None);
        assert!(link.is_launcher);
        assert_eq!(link.target.as_deref(), Some("editor %f"));
        assert_eq!(link.display_name.as_deref(), Some("Editor"));
    }

    #[test]
    fn test_application_without_exec_is_not_launcher() {
        let link = parse_desktop_entry("[Desktop Entry]\nType=Application\n", None);
        assert!(!link.is_launcher);
        assert!(link.target.is_none());
    }

    #[test]
    fn test_foreign_by_session() {
        let text = "[Desktop Entry]\nType=Link\nURL=x\nOnlyShowIn=KDE;\n";
        assert!(parse_desktop_entry(text, Some("X-Cinnamon")).is_foreign);
        assert!(!parse_desktop_entry(text, Some("KDE")).is_foreign);
        assert!(!parse_desktop_entry(text, None).is_foreign);

        let text = "[Desktop Entry]\nType=Link\nURL=x\nNotShowIn=GNOME;KDE\n";
        assert!(parse_desktop_entry(text, Some("KDE")).is_foreign);
    }

    #[test]
    fn test_legacy_link_target() {
        let link = parse_legacy_link("\n  /home/u/target  \nignored\n");
        assert_eq!(link.target.as_deref(), Some("/home/u/target"));
    }
}
