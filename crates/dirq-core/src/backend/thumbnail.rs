//! PNG header decoding for thumbnails.
//!
//! Only the image size and the `Thumb::MTime` text chunk are needed, so the
//! pixel data is never read.

use std::io::Read;
use std::path::Path;

use crate::error::IoFailure;
use crate::io::Thumbnail;

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

/// Metadata chunks precede the image data; nothing past this is looked at.
const HEADER_READ_LIMIT: u64 = 256 * 1024;

const MTIME_KEY: &[u8] = b"Thumb::MTime";

pub fn load_thumbnail(path: &Path) -> Result<Thumbnail, IoFailure> {
    let file = std::fs::File::open(path)?;
    let mut bytes = Vec::new();
    file.take(HEADER_READ_LIMIT).read_to_end(&mut bytes)?;
    let (width, height, source_mtime) = parse_png_header(&bytes)?;
    Ok(Thumbnail {
        path: path.to_path_buf(),
        width,
        height,
        source_mtime,
    })
}

/// Width, height and recorded source mtime of a PNG image.
pub fn parse_png_header(bytes: &[u8]) -> Result<(u32, u32, Option<u64>), IoFailure> {
    let invalid = |what: &str| IoFailure::Other(format!("not a PNG image: {what}"));

    if bytes.len() < 8 || bytes[..8] != PNG_SIGNATURE {
        return Err(invalid("bad signature"));
    }

    let mut pos = 8;
    let mut size = None;
    let mut mtime = None;
    while pos + 8 <= bytes.len() {
        let len = u32::from_be_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]]) as usize;
        let kind = &bytes[pos + 4..pos + 8];
        let body_start = pos + 8;
        let Some(body) = bytes.get(body_start..body_start + len) else {
            break;
        };

        match kind {
            b"IHDR" if len >= 8 => {
                let width = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
                let height = u32::from_be_bytes([body[4], body[5], body[6], body[7]]);
                size = Some((width, height));
            }
            b"tEXt" => {
                if let Some(value) = text_value(body, MTIME_KEY) {
                    mtime = std::str::from_utf8(value).ok().and_then(|v| v.trim().parse().ok());
                }
            }
            b"IDAT" | b"IEND" => break,
            _ => {}
        }
        // Chunk body plus trailing CRC.
        pos = body_start + len + 4;
    }

    let (width, height) = size.ok_or_else(|| invalid("missing IHDR"))?;
    Ok((width, height, mtime))
}

fn text_value<'a>(body: &'a [u8], key: &[u8]) -> Option<&'a [u8]> {
    let nul = body.iter().position(|b| *b == 0)?;
    (&body[..nul] == key).then(|| &body[nul + 1..])
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn chunk(kind: &[u8], body: &[u8]) -> Vec<u8> {
        let mut out = (body.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(kind);
        out.extend_from_slice(body);
        out.extend_from_slice(&[0, 0, 0, 0]);
        out
    }

    /// Minimal PNG header with an optional `Thumb::MTime`.
    pub(crate) fn png(width: u32, height: u32, mtime: Option<u64>) -> Vec<u8> {
        let mut out = PNG_SIGNATURE.to_vec();
        let mut ihdr = width.to_be_bytes().to_vec();
        ihdr.extend_from_slice(&height.to_be_bytes());
        ihdr.extend_from_slice(&[8, 6, 0, 0, 0]);
        out.extend(chunk(b"IHDR", &ihdr));
        if let Some(mtime) = mtime {
            let mut text = MTIME_KEY.to_vec();
            text.push(0);
            text.extend_from_slice(mtime.to_string().as_bytes());
            out.extend(chunk(b"tEXt", &text));
        }
        out.extend(chunk(b"IDAT", &[0; 4]));
        out.extend(chunk(b"IEND", &[]));
        out
    }

    #[test]
    fn test_parse_size_and_mtime() {
        let (w, h, mtime) = parse_png_header(&png(128, 96, Some(1_700_000_000))).unwrap();
        assert_eq!((w, h), (128, 96));
        assert_eq!(mtime, Some(1_700_000_000));
    }

    #[test]
    fn test_parse_without_mtime() {
        let (_, _, mtime) = parse_png_header(&png(1, 1, None)).unwrap();
        assert_eq!(mtime, None);
    }

    #[test]
    fn test_rejects_non_png() {
        assert!(parse_png_header(b"GIF89a....").is_err());
        assert!(parse_png_header(&PNG_SIGNATURE).is_err());
    }
}
