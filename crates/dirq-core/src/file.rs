//! Per-file cached attributes.
//!
//! Every attribute is tri-state: not yet known, known, or known to be
//! unknowable (the fetch failed or does not apply). [`Cached`] carries the
//! "up to date" and "failed" bits next to the value.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::IoFailure;
use crate::ids::{DirectoryId, FileId};
use crate::io::{EntryInfo, FileType, FilesystemInfo, MountInfo, Thumbnail};
use crate::provider::ProviderId;

/// Content type of desktop launchers.
pub const DESKTOP_LINK_MIME: &str = "application/x-desktop";
/// Content type of legacy link files.
pub const LEGACY_LINK_MIME: &str = "application/x-dirq-link";
/// Network share roots never show an item count.
pub const SMB_SHARE_MIME: &str = "x-directory/smb-share";

// ---------------------------------------------------------------------------
// Cached<T>
// ---------------------------------------------------------------------------

/// Observable state of one cached attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrState {
    NotYetKnown,
    Known,
    Unknowable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    up_to_date: bool,
    failed: bool,
    value: Option<T>,
}

impl<T> Default for Cached<T> {
    fn default() -> Self {
        Self {
            up_to_date: false,
            failed: false,
            value: None,
        }
    }
}

impl<T> Cached<T> {
    #[inline]
    pub fn is_up_to_date(&self) -> bool {
        self.up_to_date
    }

    #[inline]
    pub fn failed(&self) -> bool {
        self.failed
    }

    #[inline]
    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn state(&self) -> AttrState {
        match (self.up_to_date, &self.value) {
            (false, _) => AttrState::NotYetKnown,
            (true, Some(_)) => AttrState::Known,
            (true, None) => AttrState::Unknowable,
        }
    }

    pub(crate) fn set(&mut self, value: T) {
        self.up_to_date = true;
        self.failed = false;
        self.value = Some(value);
    }

    pub(crate) fn fail(&mut self) {
        self.up_to_date = true;
        self.failed = true;
        self.value = None;
    }

    /// Up to date with no value and no failure.
    pub(crate) fn not_applicable(&mut self) {
        self.up_to_date = true;
        self.failed = false;
        self.value = None;
    }

    /// Mark stale. The old value stays readable until replaced.
    pub(crate) fn invalidate(&mut self) {
        self.up_to_date = false;
    }

    pub(crate) fn clear(&mut self) {
        *self = Self::default();
    }
}

// ---------------------------------------------------------------------------
// Attribute payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeepCountStatus {
    #[default]
    NotStarted,
    InProgress,
    Done,
}

/// Recursive statistics for a directory subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeepCounts {
    pub status: DeepCountStatus,
    pub directories: u32,
    pub files: u32,
    pub hidden: u32,
    pub unreadable: u32,
    pub size: u64,
}

impl DeepCounts {
    pub(crate) fn restart(&mut self) {
        *self = DeepCounts {
            status: DeepCountStatus::InProgress,
            ..Default::default()
        };
    }
}

/// Resolved desktop link.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LinkInfo {
    pub target: Option<String>,
    pub display_name: Option<String>,
    pub icon: Option<String>,
    pub is_launcher: bool,
    pub is_foreign: bool,
}

// ---------------------------------------------------------------------------
// File
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct File {
    pub(crate) id: FileId,
    /// Owning directory. For a self-owned file this is the directory the
    /// file represents.
    pub(crate) directory: DirectoryId,
    pub(crate) name: String,
    pub(crate) location: PathBuf,
    pub(crate) self_owned: bool,

    pub(crate) ref_count: usize,
    /// The owning directory's listing holds one of `ref_count`.
    pub(crate) held_by_listing: bool,

    pub(crate) info: Cached<EntryInfo>,
    pub(crate) get_info_error: Option<IoFailure>,
    pub(crate) is_gone: bool,
    pub(crate) unconfirmed: bool,
    pub(crate) is_added: bool,
    /// A listing of this file's own directory is in flight.
    pub(crate) loading_directory: bool,

    pub(crate) directory_count: Cached<u32>,
    pub(crate) deep_counts: DeepCounts,
    pub(crate) mime_list: Cached<Vec<String>>,
    pub(crate) top_left_text: Cached<String>,
    pub(crate) got_large_top_left_text: bool,
    pub(crate) link_info: Cached<LinkInfo>,
    pub(crate) thumbnail: Cached<Thumbnail>,
    pub(crate) thumbnail_path: Option<PathBuf>,
    pub(crate) thumbnail_wants_original: bool,
    pub(crate) mount: Cached<MountInfo>,
    pub(crate) filesystem_info: Cached<FilesystemInfo>,
    pub(crate) pending_providers: Vec<ProviderId>,
    pub(crate) extension_attributes: Vec<(String, String)>,
}

impl File {
    pub(crate) fn new(id: FileId, directory: DirectoryId, location: PathBuf, self_owned: bool) -> Self {
        let name = location
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| location.to_string_lossy().into_owned());
        Self {
            id,
            directory,
            name,
            location,
            self_owned,
            ref_count: 0,
            held_by_listing: false,
            info: Cached::default(),
            get_info_error: None,
            is_gone: false,
            unconfirmed: false,
            is_added: false,
            loading_directory: false,
            directory_count: Cached::default(),
            deep_counts: DeepCounts::default(),
            mime_list: Cached::default(),
            top_left_text: Cached::default(),
            got_large_top_left_text: false,
            link_info: Cached::default(),
            thumbnail: Cached::default(),
            thumbnail_path: None,
            thumbnail_wants_original: false,
            mount: Cached::default(),
            filesystem_info: Cached::default(),
            pending_providers: Vec::new(),
            extension_attributes: Vec::new(),
        }
    }

    // --- accessors -----------------------------------------------------

    pub fn id(&self) -> FileId {
        self.id
    }

    pub fn directory(&self) -> DirectoryId {
        self.directory
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn is_self_owned(&self) -> bool {
        self.self_owned
    }

    pub fn info(&self) -> &Cached<EntryInfo> {
        &self.info
    }

    pub fn get_info_error(&self) -> Option<&IoFailure> {
        self.get_info_error.as_ref()
    }

    pub fn is_gone(&self) -> bool {
        self.is_gone
    }

    pub fn directory_count(&self) -> &Cached<u32> {
        &self.directory_count
    }

    pub fn deep_counts(&self) -> &DeepCounts {
        &self.deep_counts
    }

    pub fn mime_list(&self) -> &Cached<Vec<String>> {
        &self.mime_list
    }

    pub fn top_left_text(&self) -> &Cached<String> {
        &self.top_left_text
    }

    pub fn got_large_top_left_text(&self) -> bool {
        self.got_large_top_left_text
    }

    pub fn link_info(&self) -> &Cached<LinkInfo> {
        &self.link_info
    }

    pub fn thumbnail(&self) -> &Cached<Thumbnail> {
        &self.thumbnail
    }

    pub fn thumbnail_path(&self) -> Option<&Path> {
        self.thumbnail_path.as_deref()
    }

    pub fn mount(&self) -> &Cached<MountInfo> {
        &self.mount
    }

    pub fn filesystem_info(&self) -> &Cached<FilesystemInfo> {
        &self.filesystem_info
    }

    pub fn extension_attributes(&self) -> &[(String, String)] {
        &self.extension_attributes
    }

    pub fn pending_provider_count(&self) -> usize {
        self.pending_providers.len()
    }

    // --- derived predicates --------------------------------------------

    pub fn file_type(&self) -> FileType {
        self.info.value().map(|i| i.file_type).unwrap_or_default()
    }

    pub fn is_directory(&self) -> bool {
        self.file_type() == FileType::Directory
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.info.value().and_then(|i| i.content_type.as_deref())
    }

    pub fn mtime(&self) -> u64 {
        self.info.value().map(|i| i.mtime).unwrap_or(0)
    }

    pub fn size(&self) -> u64 {
        self.info.value().map(|i| i.size).unwrap_or(0)
    }

    pub fn is_executable(&self) -> bool {
        self.info.value().map(|i| i.is_executable).unwrap_or(false)
    }

    /// Desktop launcher or legacy link file.
    pub fn is_link_file(&self) -> bool {
        matches!(self.mime_type(), Some(DESKTOP_LINK_MIME) | Some(LEGACY_LINK_MIME))
    }

    /// Non-directories still count as wanting one; the count fetch settles
    /// them as not applicable.
    pub(crate) fn should_show_directory_item_count(&self) -> bool {
        self.mime_type() != Some(SMB_SHARE_MIME)
    }

    pub(crate) fn should_get_top_left_text(&self) -> bool {
        self.mime_type().map(|m| m.starts_with("text/")).unwrap_or(false)
    }

    pub(crate) fn should_show_thumbnail(&self) -> bool {
        self.info.value().is_some()
    }

    /// Hidden, backup, or listed in the directory's `.hidden`.
    pub(crate) fn is_hidden_file(&self, hidden_names: &HashSet<String>) -> bool {
        match self.info.value() {
            Some(info) => info.is_hidden || info.is_backup || hidden_names.contains(&self.name),
            None => self.name.starts_with('.') || hidden_names.contains(&self.name),
        }
    }

    // --- staleness checks used for request satisfaction ------------------

    pub(crate) fn lacks_info(&self) -> bool {
        !self.info.is_up_to_date() && !self.is_gone
    }

    pub(crate) fn lacks_directory_count(&self) -> bool {
        !self.directory_count.is_up_to_date() && self.should_show_directory_item_count()
    }

    pub(crate) fn lacks_deep_count(&self) -> bool {
        self.deep_counts.status != DeepCountStatus::Done
    }

    pub(crate) fn lacks_mime_list(&self) -> bool {
        !self.mime_list.is_up_to_date()
    }

    pub(crate) fn lacks_top_left(&self) -> bool {
        self.info.is_up_to_date()
            && !self.top_left_text.is_up_to_date()
            && self.should_get_top_left_text()
    }

    pub(crate) fn lacks_large_top_left(&self) -> bool {
        self.info.is_up_to_date()
            && (!self.top_left_text.is_up_to_date()
                || self.got_large_top_left_text != self.top_left_text.value().is_some())
            && self.should_get_top_left_text()
    }

    pub(crate) fn lacks_thumbnail(&self) -> bool {
        self.should_show_thumbnail()
            && self.thumbnail_path.is_some()
            && !self.thumbnail.is_up_to_date()
    }

    pub(crate) fn lacks_mount(&self) -> bool {
        let file_type = self.file_type();
        !self.mount.is_up_to_date()
            && (self.info.value().map(|i| i.is_mountpoint).unwrap_or(false)
                || (file_type == FileType::Directory && self.self_owned)
                || file_type == FileType::Mountable)
    }

    pub(crate) fn lacks_filesystem_info(&self) -> bool {
        !self.filesystem_info.is_up_to_date()
    }

    pub(crate) fn lacks_extension_info(&self) -> bool {
        !self.pending_providers.is_empty()
    }

    // --- mutation ------------------------------------------------------

    /// Apply a fresh metadata record. Returns true if anything visible
    /// changed.
    pub(crate) fn update_info(&mut self, info: EntryInfo) -> bool {
        if self.info.is_up_to_date() && self.info.value() == Some(&info) && !self.is_gone {
            return false;
        }

        let mtime_changed = self.info.value().map(|old| old.mtime != info.mtime).unwrap_or(true);
        if mtime_changed {
            self.top_left_text.invalidate();
            self.thumbnail.invalidate();
        }
        if self.thumbnail_path != info.thumbnail_path {
            self.thumbnail_path = info.thumbnail_path.clone();
            self.thumbnail.invalidate();
        }

        self.get_info_error = None;
        self.info.set(info);
        true
    }

    pub(crate) fn mark_info_failed(&mut self, error: IoFailure) {
        self.info.fail();
        self.get_info_error = Some(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_with(info: EntryInfo) -> File {
        let mut f = File::new(FileId(1), DirectoryId(1), PathBuf::from("/tmp/x"), false);
        f.update_info(info);
        f
    }

    #[test]
    fn test_cached_tri_state() {
        let mut c: Cached<u32> = Cached::default();
        assert_eq!(c.state(), AttrState::NotYetKnown);
        c.set(4);
        assert_eq!(c.state(), AttrState::Known);
        c.invalidate();
        assert_eq!(c.state(), AttrState::NotYetKnown);
        assert_eq!(c.value(), Some(&4));
        c.fail();
        assert_eq!(c.state(), AttrState::Unknowable);
        assert!(c.failed());
        c.not_applicable();
        assert_eq!(c.state(), AttrState::Unknowable);
        assert!(!c.failed());
    }

    #[test]
    fn test_update_info_reports_changes() {
        let mut info = EntryInfo::named("x", FileType::Regular);
        info.mtime = 10;
        let mut f = file_with(info.clone());
        f.top_left_text.set("hi".into());

        assert!(!f.update_info(info.clone()));
        assert!(f.top_left_text.is_up_to_date());

        info.mtime = 11;
        assert!(f.update_info(info));
        assert!(!f.top_left_text.is_up_to_date());
    }

    #[test]
    fn test_lacks_mount_only_for_candidates() {
        let f = file_with(EntryInfo::named("x", FileType::Regular));
        assert!(!f.lacks_mount());

        let mut info = EntryInfo::named("mnt", FileType::Directory);
        info.is_mountpoint = true;
        let f = file_with(info);
        assert!(f.lacks_mount());

        let f = file_with(EntryInfo::named("vol", FileType::Mountable));
        assert!(f.lacks_mount());
    }

    #[test]
    fn test_lacks_large_top_left_tracks_tier() {
        let mut info = EntryInfo::named("a.txt", FileType::Regular);
        info.content_type = Some("text/plain".into());
        let mut f = file_with(info);
        assert!(f.lacks_top_left());
        assert!(f.lacks_large_top_left());

        f.top_left_text.set("abc".into());
        f.got_large_top_left_text = false;
        assert!(!f.lacks_top_left());
        assert!(f.lacks_large_top_left());

        f.got_large_top_left_text = true;
        assert!(!f.lacks_large_top_left());
    }

    #[test]
    fn test_hidden_file_sources() {
        let f = file_with(EntryInfo::named("notes", FileType::Regular));
        let mut names = HashSet::new();
        assert!(!f.is_hidden_file(&names));
        names.insert("notes".to_string());
        assert!(f.is_hidden_file(&names));

        let f = file_with(EntryInfo::named("draft~", FileType::Regular));
        assert!(f.is_hidden_file(&HashSet::new()));
    }
}
