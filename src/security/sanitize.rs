//! Payload escaping.
//!
//! Every caller-supplied string passes through [`sanitize_payload`] before it
//! becomes part of a line. The escaping is reversible with
//! [`unescape_payload`]; truncation and control-character stripping are not.

use crate::constants::DEFAULT_MAX_PAYLOAD_CHARS;

/// Record delimiter between a line number and its payload.
pub const DELIMITER: char = '|';

/// Prefix that opens a section marker payload.
pub const MARKER_PREFIX: char = '@';

const ESCAPE: char = '\\';

/// Sanitize with the default 10,000 character cap.
pub fn sanitize_payload(text: &str) -> String {
    sanitize_payload_with(text, DEFAULT_MAX_PAYLOAD_CHARS)
}

/// Truncate to `max_chars` characters, drop control characters other than
/// tab, and escape the delimiter, line terminators, the escape character
/// itself and a leading marker prefix.
pub fn sanitize_payload_with(text: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(text.len().min(max_chars) + 8);

    for (i, c) in text.chars().take(max_chars).enumerate() {
        match c {
            ESCAPE => out.push_str("\\\\"),
            DELIMITER => out.push_str("\\|"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            MARKER_PREFIX if i == 0 => out.push_str("\\@"),
            '\t' => out.push('\t'),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }

    out
}

/// Reverse [`sanitize_payload`] escaping. Unknown escapes (`\,` inside list
/// values, for example) resolve to the escaped character; a trailing lone
/// backslash is kept.
pub fn unescape_payload(text: &str) -> String {
    if !text.contains(ESCAPE) {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != ESCAPE {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push(ESCAPE),
        }
    }
    out
}

/// Byte offset of the first `|` not preceded by an escape, if any.
pub fn find_unescaped_delimiter(payload: &str) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in payload.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            ESCAPE => escaped = true,
            DELIMITER => return Some(i),
            _ => {}
        }
    }
    None
}
