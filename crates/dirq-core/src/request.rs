//! Request model: semantic attribute flags, per-kind request masks and the
//! reference counts each directory keeps over its subscriptions.
//!
//! Callers speak in [`FileAttributes`]; the scheduler works in
//! [`RequestMask`]s. [`set_up_request`] is the only translation between the
//! two, and several attributes imply more than one request kind.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

// ---------------------------------------------------------------------------
// Request kinds
// ---------------------------------------------------------------------------

/// One category of fetchable state tracked per subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum RequestKind {
    FileList = 0,
    FileInfo,
    LinkInfo,
    DirectoryCount,
    DeepCount,
    MimeList,
    TopLeftText,
    LargeTopLeftText,
    ExtensionInfo,
    Thumbnail,
    Mount,
    FilesystemInfo,
}

impl RequestKind {
    pub const COUNT: usize = 12;

    pub const ALL: [RequestKind; RequestKind::COUNT] = [
        RequestKind::FileList,
        RequestKind::FileInfo,
        RequestKind::LinkInfo,
        RequestKind::DirectoryCount,
        RequestKind::DeepCount,
        RequestKind::MimeList,
        RequestKind::TopLeftText,
        RequestKind::LargeTopLeftText,
        RequestKind::ExtensionInfo,
        RequestKind::Thumbnail,
        RequestKind::Mount,
        RequestKind::FilesystemInfo,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    #[inline]
    fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

// ---------------------------------------------------------------------------
// RequestMask
// ---------------------------------------------------------------------------

/// Fixed-size bit set over [`RequestKind`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RequestMask(u16);

impl RequestMask {
    pub const EMPTY: RequestMask = RequestMask(0);

    #[inline]
    pub fn wants(self, kind: RequestKind) -> bool {
        self.0 & kind.bit() != 0
    }

    #[inline]
    pub fn set(&mut self, kind: RequestKind) {
        self.0 |= kind.bit();
    }

    #[inline]
    pub fn with(mut self, kind: RequestKind) -> Self {
        self.set(kind);
        self
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Kinds present in this mask, in declaration order.
    pub fn kinds(self) -> impl Iterator<Item = RequestKind> {
        RequestKind::ALL.into_iter().filter(move |k| self.wants(*k))
    }
}

impl fmt::Debug for RequestMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.kinds()).finish()
    }
}

impl From<RequestKind> for RequestMask {
    fn from(kind: RequestKind) -> Self {
        RequestMask(kind.bit())
    }
}

// ---------------------------------------------------------------------------
// RequestCounter
// ---------------------------------------------------------------------------

/// Number of registered subscriptions wanting each request kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestCounter([u32; RequestKind::COUNT]);

impl RequestCounter {
    pub fn add(&mut self, mask: RequestMask) {
        for kind in mask.kinds() {
            self.0[kind.index()] += 1;
        }
    }

    pub fn remove(&mut self, mask: RequestMask) {
        for kind in mask.kinds() {
            let slot = &mut self.0[kind.index()];
            assert!(*slot > 0, "request counter underflow for {:?}", kind);
            *slot -= 1;
        }
    }

    #[inline]
    pub fn get(&self, kind: RequestKind) -> u32 {
        self.0[kind.index()]
    }
}

// ---------------------------------------------------------------------------
// FileAttributes
// ---------------------------------------------------------------------------

/// Semantic attribute flags requested by callers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FileAttributes(u32);

impl FileAttributes {
    pub const NONE: FileAttributes = FileAttributes(0);
    /// Stat-like info: type, size, times, content type.
    pub const INFO: FileAttributes = FileAttributes(1 << 0);
    pub const LINK_INFO: FileAttributes = FileAttributes(1 << 1);
    pub const DIRECTORY_ITEM_COUNT: FileAttributes = FileAttributes(1 << 2);
    pub const DEEP_COUNTS: FileAttributes = FileAttributes(1 << 3);
    pub const DIRECTORY_ITEM_MIME_TYPES: FileAttributes = FileAttributes(1 << 4);
    pub const TOP_LEFT_TEXT: FileAttributes = FileAttributes(1 << 5);
    pub const LARGE_TOP_LEFT_TEXT: FileAttributes = FileAttributes(1 << 6);
    pub const EXTENSION_INFO: FileAttributes = FileAttributes(1 << 7);
    pub const THUMBNAIL: FileAttributes = FileAttributes(1 << 8);
    pub const MOUNT: FileAttributes = FileAttributes(1 << 9);
    pub const FILESYSTEM_INFO: FileAttributes = FileAttributes(1 << 10);

    #[inline]
    pub fn contains(self, other: FileAttributes) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    #[inline]
    pub fn bits(self) -> u32 {
        self.0
    }

    pub const fn union(self, other: FileAttributes) -> FileAttributes {
        FileAttributes(self.0 | other.0)
    }

    /// Parse a comma separated list such as `info,count,deep`.
    pub fn parse_list(list: &str) -> Option<FileAttributes> {
        let mut attrs = FileAttributes::NONE;
        for word in list.split(',').map(str::trim).filter(|w| !w.is_empty()) {
            attrs |= match word {
                "info" => Self::INFO,
                "link" => Self::LINK_INFO,
                "count" => Self::DIRECTORY_ITEM_COUNT,
                "deep" => Self::DEEP_COUNTS,
                "mime" => Self::DIRECTORY_ITEM_MIME_TYPES,
                "text" => Self::TOP_LEFT_TEXT,
                "large-text" => Self::LARGE_TOP_LEFT_TEXT,
                "extension" => Self::EXTENSION_INFO,
                "thumbnail" => Self::THUMBNAIL,
                "mount" => Self::MOUNT,
                "fs" => Self::FILESYSTEM_INFO,
                _ => return None,
            };
        }
        Some(attrs)
    }
}

impl BitOr for FileAttributes {
    type Output = FileAttributes;

    fn bitor(self, rhs: FileAttributes) -> FileAttributes {
        FileAttributes(self.0 | rhs.0)
    }
}

impl BitOrAssign for FileAttributes {
    fn bitor_assign(&mut self, rhs: FileAttributes) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for FileAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileAttributes({:#x})", self.0)
    }
}

/// Translate semantic attributes into the request kinds that satisfy them.
pub fn set_up_request(attrs: FileAttributes) -> RequestMask {
    use RequestKind::*;

    let mut request = RequestMask::EMPTY;

    if attrs.contains(FileAttributes::DIRECTORY_ITEM_COUNT) {
        request.set(DirectoryCount);
    }
    if attrs.contains(FileAttributes::DEEP_COUNTS) {
        request.set(DeepCount);
    }
    if attrs.contains(FileAttributes::DIRECTORY_ITEM_MIME_TYPES) {
        request.set(MimeList);
    }
    if attrs.contains(FileAttributes::INFO) {
        request.set(FileInfo);
    }
    if attrs.contains(FileAttributes::LINK_INFO) {
        request.set(FileInfo);
        request.set(LinkInfo);
    }
    if attrs.contains(FileAttributes::TOP_LEFT_TEXT) {
        request.set(TopLeftText);
        request.set(FileInfo);
    }
    if attrs.contains(FileAttributes::LARGE_TOP_LEFT_TEXT) {
        request.set(LargeTopLeftText);
        request.set(FileInfo);
    }
    if attrs.contains(FileAttributes::EXTENSION_INFO) {
        request.set(ExtensionInfo);
    }
    if attrs.contains(FileAttributes::THUMBNAIL) {
        request.set(Thumbnail);
        request.set(FileInfo);
    }
    if attrs.contains(FileAttributes::MOUNT) {
        request.set(Mount);
        request.set(FileInfo);
    }
    if attrs.contains(FileAttributes::FILESYSTEM_INFO) {
        request.set(FilesystemInfo);
    }

    request
}
