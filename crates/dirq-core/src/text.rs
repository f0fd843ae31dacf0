//! Preview text extraction.

use dirq_config::TextCaps;

/// Pull a small preview out of the start of a text file.
///
/// At most `max_lines` lines are kept, each cut to `max_columns` printable
/// characters. Non-printable characters are dropped, a line stops at the
/// first invalid UTF-8 sequence, and trailing newlines are trimmed.
pub fn extract_top_left_text(contents: &[u8], caps: TextCaps) -> String {
    let contents = &contents[..contents.len().min(caps.max_bytes)];
    let mut out = String::new();

    for (index, line) in contents.split(|b| *b == b'\n').enumerate() {
        if index >= caps.max_lines {
            break;
        }
        if index > 0 {
            out.push('\n');
        }
        let valid = match std::str::from_utf8(line) {
            Ok(s) => s,
            Err(e) => std::str::from_utf8(&line[..e.valid_up_to()]).unwrap_or_default(),
        };
        out.extend(
            valid
                .chars()
                .filter(|c| !c.is_control())
                .take(caps.max_columns),
        );
    }

    let trimmed = out.trim_end_matches('\n').len();
    out.truncate(trimmed);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAPS: TextCaps = TextCaps {
        max_bytes: 1024,
        max_lines: 3,
        max_columns: 5,
    };

    #[test]
    fn test_lines_and_columns_capped() {
        let text = extract_top_left_text(b"hello world\nsecond\nthird\nfourth\n", CAPS);
        assert_eq!(text, "hello\nsecon\nthird");
    }

    #[test]
    fn test_control_characters_dropped() {
        assert_eq!(extract_top_left_text(b"a\tb\x07c", CAPS), "abc");
    }

    #[test]
    fn test_trailing_newlines_trimmed() {
        assert_eq!(extract_top_left_text(b"x\n\n", CAPS), "x");
        assert_eq!(extract_top_left_text(b"", CAPS), "");
    }

    #[test]
    fn test_invalid_utf8_ends_line() {
        assert_eq!(extract_top_left_text(b"ab\xffcd\nok", CAPS), "ab\nok");
    }

    #[test]
    fn test_byte_cap_applies_first() {
        let caps = TextCaps {
            max_bytes: 4,
            ..CAPS
        };
        assert_eq!(extract_top_left_text(b"abcdefgh", caps), "abcd");
    }
}
