//! Bounded-memory line scanning.
//!
//! Memory use is one read buffer (`chunk_bytes`) plus at most one capped
//! line (`max_line_bytes`), regardless of file size. Overlong lines are
//! truncated and flagged, never fatal.

use crate::constants::{DEFAULT_CHUNK_BYTES, DEFAULT_MAX_LINE_BYTES};
use crate::types::Config;
use std::borrow::Cow;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOptions {
    pub chunk_bytes: usize,
    pub max_line_bytes: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            chunk_bytes: DEFAULT_CHUNK_BYTES,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

impl From<&Config> for StreamOptions {
    fn from(config: &Config) -> Self {
        Self {
            chunk_bytes: config.chunk_bytes.max(1),
            max_line_bytes: config.max_line_bytes.max(1),
        }
    }
}

/// Returned by line callbacks to continue or end a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineControl {
    Continue,
    Stop,
}

#[derive(Debug, Clone, Copy)]
pub struct StreamedLine<'a> {
    /// Zero-based physical line index.
    pub index: u64,
    pub text: &'a str,
    pub truncated: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub lines: u64,
    pub truncated_lines: u64,
    pub stopped_early: bool,
}

/// Decode one raw line (without its `\n`) the way every reader path does:
/// keep the first `max_line_bytes`, drop a trailing `\r`, decode lossily.
pub(crate) fn decode_line(raw: &[u8], max_line_bytes: usize) -> (Cow<'_, str>, bool) {
    let truncated = raw.len() > max_line_bytes;
    let mut bytes = if truncated {
        &raw[..max_line_bytes]
    } else {
        raw
    };
    if let [head @ .., b'\r'] = bytes {
        bytes = head;
    }
    (String::from_utf8_lossy(bytes), truncated)
}

/// Split an in-memory buffer into decoded lines with the same semantics as
/// [`stream_lines`]: a trailing newline does not produce an empty last line.
pub(crate) fn split_lines(
    buffer: &[u8],
    max_line_bytes: usize,
) -> impl Iterator<Item = (Cow<'_, str>, bool)> {
    let body = buffer.strip_suffix(b"\n").unwrap_or(buffer);
    let empty = buffer.is_empty();
    body.split(|b| *b == b'\n')
        .filter(move |_| !empty)
        .map(move |raw| decode_line(raw, max_line_bytes))
}

/// Forward scan calling `on_line` for every physical line until the file
/// ends or the callback returns [`LineControl::Stop`].
pub fn stream_lines<F>(path: &Path, options: StreamOptions, mut on_line: F) -> crate::Result<StreamSummary>
where
    F: FnMut(StreamedLine<'_>) -> LineControl,
{
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(options.chunk_bytes.max(1), file);
    let mut summary = StreamSummary::default();
    let mut line: Vec<u8> = Vec::new();
    let mut overflow = false;

    let mut emit = |line: &[u8], overflow: bool, summary: &mut StreamSummary| {
        let (text, _) = decode_line(line, options.max_line_bytes);
        let control = on_line(StreamedLine {
            index: summary.lines,
            text: &text,
            truncated: overflow,
        });
        summary.lines += 1;
        if overflow {
            summary.truncated_lines += 1;
        }
        control
    };

    loop {
        let (consumed, complete) = {
            let available = reader.fill_buf()?;
            if available.is_empty() {
                break;
            }
            let (segment, consumed, complete) = match available.iter().position(|b| *b == b'\n') {
                Some(pos) => (&available[..pos], pos + 1, true),
                None => (available, available.len(), false),
            };

            let room = options.max_line_bytes.saturating_sub(line.len());
            if segment.len() > room {
                line.extend_from_slice(&segment[..room]);
                overflow = true;
            } else {
                line.extend_from_slice(segment);
            }
            (consumed, complete)
        };
        reader.consume(consumed);

        if complete {
            let control = emit(&line, overflow, &mut summary);
            line.clear();
            overflow = false;
            if control == LineControl::Stop {
                summary.stopped_early = true;
                return Ok(summary);
            }
        }
    }

    if !line.is_empty() || overflow {
        if emit(&line, overflow, &mut summary) == LineControl::Stop {
            summary.stopped_early = true;
        }
    }

    Ok(summary)
}

/// Scan lines from the end of the file towards the start, returning the
/// first value `matcher` produces. Reads `chunk_bytes` at a time and keeps
/// at most the first `max_line_bytes` of the line being assembled.
pub fn scan_lines_backward<T, F>(
    path: &Path,
    options: StreamOptions,
    mut matcher: F,
) -> crate::Result<Option<T>>
where
    F: FnMut(&str) -> Option<T>,
{
    let mut file = File::open(path)?;
    let mut position = file.metadata()?.len();
    let chunk = options.chunk_bytes.max(1) as u64;
    let mut buffer = vec![0u8; chunk as usize];
    // Tail of the line currently being assembled, i.e. the bytes that
    // follow the most recent newline seen while moving backwards.
    let mut tail: Vec<u8> = Vec::new();
    let mut at_file_end = true;

    while position > 0 {
        let read_len = chunk.min(position);
        position -= read_len;
        file.seek(SeekFrom::Start(position))?;
        let window = &mut buffer[..read_len as usize];
        file.read_exact(window)?;

        let mut end = window.len();
        while let Some(newline) = window[..end].iter().rposition(|b| *b == b'\n') {
            let mut line = Vec::with_capacity(end - newline - 1 + tail.len());
            line.extend_from_slice(&window[newline + 1..end]);
            line.extend_from_slice(&tail);
            tail.clear();

            // The empty segment after a final newline is not a line.
            let skip = at_file_end && line.is_empty();
            at_file_end = false;
            if !skip {
                let (text, _) = decode_line(&line, options.max_line_bytes);
                if let Some(found) = matcher(&text) {
                    return Ok(Some(found));
                }
            }
            end = newline;
        }

        if end > 0 {
            at_file_end = false;
        }
        let mut joined = Vec::with_capacity(end + tail.len());
        joined.extend_from_slice(&window[..end]);
        joined.extend_from_slice(&tail);
        joined.truncate(options.max_line_bytes.saturating_add(1));
        tail = joined;
    }

    if !tail.is_empty() {
        let (text, _) = decode_line(&tail, options.max_line_bytes);
        return Ok(matcher(&text));
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn collect(path: &Path, options: StreamOptions) -> Vec<(String, bool)> {
        let mut lines = Vec::new();
        stream_lines(path, options, |line| {
            lines.push((line.text.to_string(), line.truncated));
            LineControl::Continue
        })
        .unwrap();
        lines
    }

    #[test]
    fn test_streams_lines_across_small_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "a.aicf", b"1|@A\nkey=value\r\n2|@B\nlast");
        let options = StreamOptions {
            chunk_bytes: 3,
            max_line_bytes: 1024,
        };
        let lines: Vec<String> = collect(&path, options).into_iter().map(|l| l.0).collect();
        assert_eq!(lines, vec!["1|@A", "key=value", "2|@B", "last"]);
    }

    #[test]
    fn test_overlong_lines_are_truncated_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut content = b"x".repeat(100);
        content.extend_from_slice(b"\nshort\n");
        let path = write(&dir, "long.aicf", &content);
        let options = StreamOptions {
            chunk_bytes: 16,
            max_line_bytes: 10,
        };
        let lines = collect(&path, options);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], ("x".repeat(10), true));
        assert_eq!(lines[1], ("short".to_string(), false));
    }

    #[test]
    fn test_callback_can_stop_early() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "stop.aicf", b"a\nb\nc\n");
        let mut seen = 0;
        let summary = stream_lines(&path, StreamOptions::default(), |_| {
            seen += 1;
            if seen == 2 {
                LineControl::Stop
            } else {
                LineControl::Continue
            }
        })
        .unwrap();
        assert_eq!(seen, 2);
        assert!(summary.stopped_early);
    }

    #[test]
    fn test_split_lines_matches_streaming() {
        let dir = tempfile::tempdir().unwrap();
        let content = b"1|@A\n\nkey=v\r\n\xff bad utf8\nxxxxxxxxxxxxxxxxxxxx\n";
        let path = write(&dir, "same.aicf", content);
        let options = StreamOptions {
            chunk_bytes: 4,
            max_line_bytes: 8,
        };
        let streamed = collect(&path, options);
        let split: Vec<(String, bool)> = split_lines(content, 8)
            .map(|(text, truncated)| (text.into_owned(), truncated))
            .collect();
        assert_eq!(streamed, split);
    }

    #[test]
    fn test_backward_scan_finds_last_match() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "back.aicf", b"1|@A\nk=v\n2|@B\nk=w\ncontinued\n");
        let options = StreamOptions {
            chunk_bytes: 5,
            max_line_bytes: 64,
        };
        let found = scan_lines_backward(&path, options, |line| {
            line.split_once('|').map(|(n, _)| n.to_string())
        })
        .unwrap();
        assert_eq!(found.as_deref(), Some("2"));
    }

    #[test]
    fn test_backward_scan_without_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "nonl.aicf", b"first\nsecond");
        let mut seen = Vec::new();
        let found: Option<()> = scan_lines_backward(&path, StreamOptions::default(), |line| {
            seen.push(line.to_string());
            None
        })
        .unwrap();
        assert!(found.is_none());
        assert_eq!(seen, vec!["second", "first"]);
    }
}
