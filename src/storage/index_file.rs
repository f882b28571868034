//! The derived summary index (`index.aicf`).
//!
//! The index is advisory: it is rewritten after every append and can be
//! rebuilt from the record files at any time. It uses the same line
//! grammar as record files:
//!
//! ```text
//! 1|@METADATA
//! format_version=3.0
//! created_at=2025-01-01T00:00:00.000Z
//! 2|@CONVERSATIONS
//! count=12
//! file=conversations.aicf
//! last_updated=2025-01-02T10:00:00.000Z
//! 3|@STATE
//! last_file=conversations.aicf
//! last_section=CONVERSATIONS
//! last_updated=2025-01-02T10:00:00.000Z
//! ```

use crate::constants::{
    DEFAULT_MAX_PAYLOAD_CHARS, FORMAT_VERSION, INDEX_METADATA_SECTION, INDEX_STATE_SECTION,
};
use crate::format::{FieldValue, SectionAssembler, compile_record, number_record, parse_section};
use crate::storage::atomic::atomic_write;
use crate::storage::line_stream::{LineControl, StreamOptions, stream_lines};
use crate::types::{DurabilityMode, now_rfc3339};
use std::collections::BTreeMap;
use std::io;
use std::path::Path;

const COUNT_KEY: &str = "count";
const FILE_KEY: &str = "file";
const LAST_UPDATED_KEY: &str = "last_updated";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDocument {
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl Default for IndexDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexDocument {
    pub fn new() -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("format_version".to_string(), FORMAT_VERSION.to_string());
        metadata.insert("created_at".to_string(), now_rfc3339());

        let mut sections = BTreeMap::new();
        sections.insert(INDEX_METADATA_SECTION.to_string(), metadata);
        Self { sections }
    }

    /// Load from disk; a missing file yields a fresh document.
    pub fn load(path: &Path, options: StreamOptions) -> crate::Result<Self> {
        let mut assembler = SectionAssembler::new();
        let mut sections = Vec::new();

        let streamed = stream_lines(path, options, |line| {
            sections.extend(assembler.push(line.text));
            LineControl::Continue
        });
        match streamed {
            Ok(_) => {}
            Err(crate::Error::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Self::new());
            }
            Err(e) => return Err(e),
        }
        sections.extend(assembler.finish());

        Ok(Self::from_sections(sections))
    }

    pub fn parse(text: &str) -> Self {
        let mut assembler = SectionAssembler::new();
        let mut sections: Vec<Vec<String>> = text.lines().filter_map(|l| assembler.push(l)).collect();
        sections.extend(assembler.finish());
        Self::from_sections(sections)
    }

    fn from_sections(raw_sections: Vec<Vec<String>>) -> Self {
        let mut sections = BTreeMap::new();
        for lines in raw_sections {
            let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
            let parsed = parse_section(&refs);
            if parsed.tag.is_empty() {
                continue;
            }
            if !parsed.anomalies.is_empty() {
                tracing::warn!(
                    section = %parsed.tag,
                    anomalies = parsed.anomalies.len(),
                    "index section has anomalies"
                );
            }
            let entry: &mut BTreeMap<String, String> = sections.entry(parsed.tag.clone()).or_default();
            for key in parsed.keys() {
                if let Some(value) = parsed.text(key) {
                    entry.insert(key.to_string(), value);
                }
            }
        }

        if !sections.contains_key(INDEX_METADATA_SECTION) {
            return Self {
                sections: Self::new().sections.into_iter().chain(sections).collect(),
            };
        }
        Self { sections }
    }

    /// Section names in render order: `METADATA`, kinds sorted, `STATE`.
    fn ordered_sections(&self) -> Vec<(&String, &BTreeMap<String, String>)> {
        let mut ordered: Vec<_> = self.sections.iter().collect();
        ordered.sort_by_key(|(name, _)| match name.as_str() {
            INDEX_METADATA_SECTION => 0,
            INDEX_STATE_SECTION => 2,
            _ => 1,
        });
        ordered
    }

    pub fn render(&self) -> crate::Result<String> {
        let mut out = String::new();
        for (n, (name, values)) in self.ordered_sections().into_iter().enumerate() {
            let fields: Vec<(String, FieldValue)> = values
                .iter()
                .map(|(k, v)| (k.clone(), FieldValue::Text(v.clone())))
                .collect();
            let payloads = compile_record(name, None, &fields, DEFAULT_MAX_PAYLOAD_CHARS)?;
            out.push_str(&number_record(n as u64 + 1, &payloads));
        }
        Ok(out)
    }

    pub fn save(&self, path: &Path, durability: DurabilityMode) -> crate::Result<()> {
        let rendered = self.render()?;
        atomic_write(path, rendered.as_bytes(), durability)
    }

    pub fn section(&self, name: &str) -> Option<&BTreeMap<String, String>> {
        self.sections.get(name)
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|values| values.get(key))
            .map(String::as_str)
    }

    pub fn count(&self, section: &str) -> u64 {
        self.get(section, COUNT_KEY)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    pub fn last_updated(&self, section: &str) -> Option<&str> {
        self.get(section, LAST_UPDATED_KEY)
    }

    /// Account for one record appended to `file_name` at `at`.
    pub fn record_append(&mut self, section: &str, file_name: &str, at: &str) {
        let count = self.count(section) + 1;
        self.set_count(section, file_name, count, Some(at));
        self.set_state(section, file_name, at);
    }

    pub fn set_count(&mut self, section: &str, file_name: &str, count: u64, last_updated: Option<&str>) {
        let values = self.sections.entry(section.to_string()).or_default();
        values.insert(COUNT_KEY.to_string(), count.to_string());
        values.insert(FILE_KEY.to_string(), file_name.to_string());
        match last_updated {
            Some(at) => {
                values.insert(LAST_UPDATED_KEY.to_string(), at.to_string());
            }
            None => {
                values.remove(LAST_UPDATED_KEY);
            }
        }
    }

    pub fn set_state(&mut self, section: &str, file_name: &str, at: &str) {
        let state = self.sections.entry(INDEX_STATE_SECTION.to_string()).or_default();
        state.insert("last_file".to_string(), file_name.to_string());
        state.insert("last_section".to_string(), section.to_string());
        state.insert(LAST_UPDATED_KEY.to_string(), at.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_orders_metadata_first_and_state_last() {
        let mut index = IndexDocument::new();
        index.record_append("MEMORIES", "memories.aicf", "t1");
        index.record_append("CONVERSATIONS", "conversations.aicf", "t2");

        let rendered = index.render().unwrap();
        let markers: Vec<&str> = rendered.lines().filter(|l| l.contains("|@")).collect();
        assert_eq!(
            markers,
            vec!["1|@METADATA", "2|@CONVERSATIONS", "3|@MEMORIES", "4|@STATE"]
        );
        assert!(rendered.contains("last_file=conversations.aicf"));
    }

    #[test]
    fn test_counts_survive_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.aicf");

        let mut index = IndexDocument::new();
        index.record_append("DECISIONS", "decisions.aicf", "2025-01-01T00:00:00.000Z");
        index.record_append("DECISIONS", "decisions.aicf", "2025-01-02T00:00:00.000Z");
        index.save(&path, DurabilityMode::None).unwrap();

        let loaded = IndexDocument::load(&path, StreamOptions::default()).unwrap();
        assert_eq!(loaded, index);
        assert_eq!(loaded.count("DECISIONS"), 2);
        assert_eq!(
            loaded.last_updated("DECISIONS"),
            Some("2025-01-02T00:00:00.000Z")
        );
        assert_eq!(loaded.count("MEMORIES"), 0);
    }

    #[test]
    fn test_missing_file_is_fresh_document() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = IndexDocument::load(&dir.path().join("index.aicf"), StreamOptions::default()).unwrap();
        assert_eq!(loaded.get(INDEX_METADATA_SECTION, "format_version"), Some(FORMAT_VERSION));
    }

    #[test]
    fn test_parse_tolerates_hand_edits() {
        let index = IndexDocument::parse("junk\n1|@INSIGHTS\nnot a field\ncount=4\n");
        assert_eq!(index.count("INSIGHTS"), 4);
        assert!(index.section(INDEX_METADATA_SECTION).is_some());
    }
}
