//! Content type guessing from file names.

use std::path::Path;

use crate::file::DESKTOP_LINK_MIME;
use crate::io::FileType;

pub const DIRECTORY_MIME: &str = "inode/directory";
const UNKNOWN_MIME: &str = "application/octet-stream";

const BY_EXTENSION: &[(&str, &str)] = &[
    ("txt", "text/plain"),
    ("md", "text/markdown"),
    ("rs", "text/rust"),
    ("c", "text/x-csrc"),
    ("h", "text/x-chdr"),
    ("py", "text/x-python"),
    ("sh", "application/x-shellscript"),
    ("toml", "text/x-toml"),
    ("json", "application/json"),
    ("xml", "application/xml"),
    ("html", "text/html"),
    ("htm", "text/html"),
    ("css", "text/css"),
    ("csv", "text/csv"),
    ("log", "text/x-log"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("svg", "image/svg+xml"),
    ("webp", "image/webp"),
    ("pdf", "application/pdf"),
    ("zip", "application/zip"),
    ("gz", "application/gzip"),
    ("tar", "application/x-tar"),
    ("mp3", "audio/mpeg"),
    ("ogg", "audio/ogg"),
    ("mp4", "video/mp4"),
    ("mkv", "video/x-matroska"),
    ("desktop", DESKTOP_LINK_MIME),
];

pub fn guess(path: &Path, file_type: FileType, size: u64) -> String {
    let mime = match file_type {
        FileType::Directory => DIRECTORY_MIME,
        FileType::Special => "inode/special",
        FileType::Mountable => "inode/mount-point",
        FileType::Regular if size == 0 => "application/x-zerosize",
        _ => path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .and_then(|e| BY_EXTENSION.iter().find(|(ext, _)| *ext == e).map(|(_, m)| *m))
            .unwrap_or(UNKNOWN_MIME),
    };
    mime.to_string()
}
