use super::{PhysicalLine, parse_line};
use crate::storage::line_stream::{StreamOptions, scan_lines_backward, split_lines};
use std::io;
use std::path::Path;

/// Render a record: `n|` on the first payload only, every line `\n`
/// terminated.
pub fn number_record(n: u64, payloads: &[String]) -> String {
    let mut out = String::with_capacity(payloads.iter().map(|p| p.len() + 1).sum::<usize>() + 21);
    for (i, payload) in payloads.iter().enumerate() {
        if i == 0 {
            out.push_str(&n.to_string());
            out.push('|');
        }
        out.push_str(payload);
        out.push('\n');
    }
    out
}

/// The number to assign to the next record appended to `path`: the last
/// numbered line's number plus one, or 1 for a missing or unnumbered file.
///
/// Files smaller than `threshold` are read whole; larger files are scanned
/// backwards in `options.chunk_bytes` reads.
pub fn next_line_number(path: &Path, threshold: u64, options: StreamOptions) -> crate::Result<u64> {
    let size = match std::fs::metadata(path) {
        Ok(metadata) => metadata.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(1),
        Err(e) => return Err(e.into()),
    };

    let last = if size < threshold {
        let buffer = std::fs::read(path)?;
        split_lines(&buffer, options.max_line_bytes)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .find_map(|(text, _)| parse_line(&text).number())
    } else {
        scan_lines_backward(path, options, |line| match parse_line(line) {
            PhysicalLine::Numbered { number, .. } => Some(number),
            PhysicalLine::Continuation { .. } => None,
        })?
    };

    Ok(last.map_or(1, |n| n.saturating_add(1)))
}
