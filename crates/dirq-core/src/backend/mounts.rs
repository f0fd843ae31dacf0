//! Mount table parsing (`/proc/self/mountinfo`).

use std::path::{Path, PathBuf};

use crate::io::MountInfo;

pub const MOUNTINFO_PATH: &str = "/proc/self/mountinfo";

/// Filesystems whose contents are too slow to preview.
const REMOTE_FS_TYPES: &[&str] = &["nfs", "nfs4", "cifs", "smb3", "smbfs", "fuse.sshfs", "9p", "afs"];

pub fn read_mount_table() -> Vec<MountInfo> {
    match std::fs::read_to_string(MOUNTINFO_PATH) {
        Ok(text) => parse_mountinfo(&text),
        Err(_) => Vec::new(),
    }
}

/// Parse mountinfo text. Later mounts on the same point shadow earlier ones.
pub fn parse_mountinfo(text: &str) -> Vec<MountInfo> {
    let mut mounts: Vec<MountInfo> = Vec::new();

    for line in text.lines() {
        let Some((left, right)) = line.split_once(" - ") else {
            continue;
        };
        let Some(mount_point) = left.split_whitespace().nth(4) else {
            continue;
        };
        let mut right = right.split_whitespace();
        let fs_type = right.next().unwrap_or_default().to_string();
        let source = right.next().map(unescape).unwrap_or_default();

        let root = PathBuf::from(unescape(mount_point));
        for earlier in mounts.iter_mut().filter(|m| m.root == root) {
            earlier.is_shadowed = true;
        }
        let name = match root.file_name() {
            Some(n) => n.to_string_lossy().into_owned(),
            None if !source.is_empty() => source,
            None => "/".to_string(),
        };
        mounts.push(MountInfo {
            name,
            root,
            fs_type,
            is_shadowed: false,
        });
    }
    mounts
}

/// Innermost visible mount containing `location`.
pub fn enclosing_mount<'a>(mounts: &'a [MountInfo], location: &Path) -> Option<&'a MountInfo> {
    mounts
        .iter()
        .filter(|m| !m.is_shadowed && location.starts_with(&m.root))
        .max_by_key(|m| m.root.components().count())
}

pub fn is_remote(fs_type: &str) -> bool {
    REMOTE_FS_TYPES.contains(&fs_type)
}

/// Undo the octal escapes mountinfo uses for whitespace and backslashes.
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let octal = i + 3 < bytes.len() && bytes[i + 1..i + 4].iter().all(|b| (b'0'..=b'7').contains(b));
        if bytes[i] == b'\\' && octal {
            let digit = |b: u8| u32::from(b - b'0');
            let value = digit(bytes[i + 1]) * 64 + digit(bytes[i + 2]) * 8 + digit(bytes[i + 3]);
            out.push((value & 0xff) as u8);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
