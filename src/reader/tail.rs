//! Strategies for reading the last records of a file.
//!
//! Small files are read whole; large files are streamed through a ring
//! buffer holding at most `count` sections. Both group lines with the same
//! [`SectionAssembler`] and return sections oldest first. Only sections the
//! caller's filter accepts count toward `count`, so rejected sections never
//! shorten the result while older accepted ones exist.

use crate::format::{SectionAssembler, classify_payload, parse_line, Payload};
use crate::storage::line_stream::{LineControl, StreamOptions, split_lines, stream_lines};
use std::collections::VecDeque;
use std::path::Path;

/// Raw physical lines of one record section.
pub type Section = Vec<String>;

pub(crate) fn section_tag(section: &Section) -> Option<&str> {
    let first = section.first()?;
    match classify_payload(parse_line(first).payload()) {
        Payload::Marker { tag, .. } => Some(tag),
        _ => None,
    }
}

pub trait TailStrategy: Send + Sync {
    /// The last `count` sections accepted by `keep`, oldest first.
    fn last_matching(
        &self,
        path: &Path,
        count: usize,
        keep: &dyn Fn(&Section) -> bool,
    ) -> crate::Result<Vec<Section>>;

    /// The last `count` sections tagged `tag`, oldest first.
    fn last_sections(&self, path: &Path, tag: &str, count: usize) -> crate::Result<Vec<Section>> {
        self.last_matching(path, count, &|section: &Section| section_tag(section) == Some(tag))
    }

    fn name(&self) -> &'static str;
}

/// Reads the whole file into memory and groups it front to back. The
/// newest sections are then taken from the end, so the result equals a
/// backward scan without re-deriving section boundaries in reverse.
#[derive(Debug, Clone, Copy)]
pub struct InMemoryTail {
    pub max_line_bytes: usize,
}

impl TailStrategy for InMemoryTail {
    fn last_matching(
        &self,
        path: &Path,
        count: usize,
        keep: &dyn Fn(&Section) -> bool,
    ) -> crate::Result<Vec<Section>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let buffer = std::fs::read(path)?;
        let mut assembler = SectionAssembler::new();
        let mut sections: Vec<Section> = split_lines(&buffer, self.max_line_bytes)
            .filter_map(|(text, _)| assembler.push(&text))
            .collect();
        sections.extend(assembler.finish());

        sections.retain(|s| keep(s));
        let skip = sections.len().saturating_sub(count);
        Ok(sections.split_off(skip))
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

/// Streams the file, keeping only the newest `count` matching sections.
#[derive(Debug, Clone, Copy)]
pub struct StreamingTail {
    pub options: StreamOptions,
}

impl TailStrategy for StreamingTail {
    fn last_matching(
        &self,
        path: &Path,
        count: usize,
        keep: &dyn Fn(&Section) -> bool,
    ) -> crate::Result<Vec<Section>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut assembler = SectionAssembler::new();
        let mut ring: VecDeque<Section> = VecDeque::with_capacity(count.min(1024));

        let push = |section: Section, ring: &mut VecDeque<Section>| {
            if keep(&section) {
                if ring.len() == count {
                    ring.pop_front();
                }
                ring.push_back(section);
            }
        };

        stream_lines(path, self.options, |line| {
            if let Some(section) = assembler.push(line.text) {
                push(section, &mut ring);
            }
            LineControl::Continue
        })?;
        if let Some(section) = assembler.finish() {
            push(section, &mut ring);
        }

        Ok(ring.into())
    }

    fn name(&self) -> &'static str {
        "streaming"
    }
}

/// Pick the in-memory strategy below `threshold` bytes, streaming at or
/// above it.
pub fn select_tail_strategy(size: u64, threshold: u64, options: StreamOptions) -> Box<dyn TailStrategy> {
    if size < threshold {
        Box::new(InMemoryTail {
            max_line_bytes: options.max_line_bytes,
        })
    } else {
        Box::new(StreamingTail { options })
    }
}
