//! Append path for record files.
//!
//! Every write follows the same sequence: validate the target path, compile
//! and escape the record, take the file's lock, assign the next line
//! number, append atomically, release, then update the summary index under
//! the index file's own lock. The index update is best-effort: a failure
//! there is logged and reported in the receipt, never turned into an error
//! for an append that is already durable.

use crate::constants::{GENERIC_SECTION_PREFIX, INDEX_FILENAME, RECORD_EXTENSION};
use crate::error::PathViolationKind;
use crate::format::{
    FieldValue, SectionAssembler, compile_record, next_line_number, number_record, parse_section,
};
use crate::security::path::normalize_root;
use crate::security::validate_path;
use crate::storage::atomic::atomic_append;
use crate::storage::file_lock::LockManager;
use crate::storage::index_file::IndexDocument;
use crate::storage::line_stream::{LineControl, StreamOptions, stream_lines};
use crate::types::{
    Config, Consolidation, Conversation, Decision, Embedding, Insight, Memory, Record, RecordKind,
    Session, WorkState, now_rfc3339,
};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Outcome of a successful append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteReceipt {
    pub file: PathBuf,
    pub tag: String,
    /// Number assigned to the record's first line.
    pub line_number: u64,
    pub record_id: Option<String>,
    /// False when the append succeeded but the index could not be updated.
    pub index_updated: bool,
}

/// Index section for a record file, given its `/`-separated path relative
/// to the store root.
///
/// The standard files map to their kind's section. Any other file gets a
/// `FILE_` section: plain lowercase names keep a readable form
/// (`scratch.aicf` is `FILE_SCRATCH`); everything else also carries a CRC32
/// of the full relative path, so nested or punctuated names never share a
/// section with each other, with a kind, or with `METADATA`/`STATE`.
pub(crate) fn index_section_for(file: &str) -> String {
    if let Some(kind) = RecordKind::ALL.into_iter().find(|k| k.file_name() == file) {
        return kind.index_section().to_string();
    }

    let extension = format!(".{RECORD_EXTENSION}");
    let stem = file.strip_suffix(extension.as_str());
    let readable = |text: &str| -> String {
        text.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect()
    };

    match stem {
        Some(stem)
            if !stem.is_empty()
                && stem.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()) =>
        {
            format!("{GENERIC_SECTION_PREFIX}{}", readable(stem))
        }
        _ => format!(
            "{GENERIC_SECTION_PREFIX}{}_{:08X}",
            readable(stem.unwrap_or(file)),
            crc32fast::hash(file.as_bytes())
        ),
    }
}

/// Count the records in `path` and return the last record's timestamp.
pub(crate) fn survey_file(path: &Path, options: StreamOptions) -> crate::Result<(u64, Option<String>)> {
    let mut assembler = SectionAssembler::new();
    let mut count = 0u64;
    let mut last: Option<Vec<String>> = None;

    stream_lines(path, options, |line| {
        if let Some(section) = assembler.push(line.text) {
            count += 1;
            last = Some(section);
        }
        LineControl::Continue
    })?;
    if let Some(section) = assembler.finish() {
        count += 1;
        last = Some(section);
    }

    let timestamp = last.and_then(|lines| {
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        parse_section(&refs).text("timestamp")
    });
    Ok((count, timestamp))
}

pub struct Writer {
    root: PathBuf,
    config: Config,
    locks: Arc<dyn LockManager>,
}

impl Writer {
    /// `root` is made absolute and lexically normalized once, here, so
    /// validated targets, the index path and lock keys all compare equal.
    pub fn new(
        root: impl AsRef<Path>,
        config: Config,
        locks: Arc<dyn LockManager>,
    ) -> crate::Result<Self> {
        Ok(Self {
            root: normalize_root(root.as_ref())?,
            config,
            locks,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILENAME)
    }

    fn stream_options(&self) -> StreamOptions {
        StreamOptions::from(&self.config)
    }

    pub fn write_conversation(&self, conversation: Conversation) -> crate::Result<WriteReceipt> {
        self.write_record(&Record::Conversation(conversation))
    }

    pub fn write_decision(&self, decision: Decision) -> crate::Result<WriteReceipt> {
        self.write_record(&Record::Decision(decision))
    }

    pub fn write_memory(&self, memory: Memory) -> crate::Result<WriteReceipt> {
        self.write_record(&Record::Memory(memory))
    }

    pub fn write_work_state(&self, work_state: WorkState) -> crate::Result<WriteReceipt> {
        self.write_record(&Record::WorkState(work_state))
    }

    pub fn write_session(&self, session: Session) -> crate::Result<WriteReceipt> {
        self.write_record(&Record::Session(session))
    }

    pub fn write_embedding(&self, embedding: Embedding) -> crate::Result<WriteReceipt> {
        self.write_record(&Record::Embedding(embedding))
    }

    pub fn write_consolidation(&self, consolidation: Consolidation) -> crate::Result<WriteReceipt> {
        self.write_record(&Record::Consolidation(consolidation))
    }

    pub fn write_insight(&self, insight: Insight) -> crate::Result<WriteReceipt> {
        self.write_record(&Record::Insight(insight))
    }

    /// Append a typed record to its kind's file.
    pub fn write_record(&self, record: &Record) -> crate::Result<WriteReceipt> {
        let kind = record.kind();
        self.append_record(
            &kind.file_name(),
            kind.tag(),
            Some(record.id()),
            &record.to_fields(),
        )
    }

    /// Append an arbitrary section to `file`, a path relative to the store
    /// root.
    pub fn append_record(
        &self,
        file: &str,
        tag: &str,
        id: Option<&str>,
        fields: &[(String, FieldValue)],
    ) -> crate::Result<WriteReceipt> {
        let path = validate_path(file, &self.root)?;
        if path == self.index_path() {
            return Err(crate::Error::InvalidField {
                name: file.to_string(),
                reason: "the index is maintained by the store".to_string(),
            });
        }
        let name = self.relative_name(file, &path)?;

        let payloads = compile_record(tag, id, fields, self.config.max_payload_chars)?;

        let line_number = {
            let _guard = self.locks.acquire(&path)?;
            let number = next_line_number(
                &path,
                self.config.streaming_threshold_bytes,
                self.stream_options(),
            )?;
            let text = number_record(number, &payloads);
            atomic_append(&path, text.as_bytes(), self.config.durability)?;
            tracing::debug!(file = %path.display(), tag, line_number = number, "record appended");
            number
        };

        let section = index_section_for(&name);
        let index_updated = match self.update_index(&section, &name) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(file = %name, section = %section, error = %e, "index update failed; run rebuild_index");
                false
            }
        };

        Ok(WriteReceipt {
            file: path,
            tag: tag.to_string(),
            line_number,
            record_id: id.map(str::to_string),
            index_updated,
        })
    }

    /// `/`-separated path of a validated target relative to the root, the
    /// form the index records.
    fn relative_name(&self, input: &str, path: &Path) -> crate::Result<String> {
        let relative = path
            .strip_prefix(&self.root)
            .map_err(|_| crate::Error::PathViolation {
                input: input.to_string(),
                kind: PathViolationKind::EscapesRoot,
            })?;
        Ok(relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/"))
    }

    fn update_index(&self, section: &str, file: &str) -> crate::Result<()> {
        let index_path = self.index_path();
        let _guard = self.locks.acquire(&index_path)?;
        let mut index = IndexDocument::load(&index_path, self.stream_options())?;
        index.record_append(section, file, &now_rfc3339());
        index.save(&index_path, self.config.durability)
    }

    /// Rewrite the index from the record files on disk.
    pub fn rebuild_index(&self) -> crate::Result<IndexDocument> {
        let index_path = self.index_path();
        let _guard = self.locks.acquire(&index_path)?;
        let options = self.stream_options();

        let mut index = IndexDocument::new();
        let mut files: Vec<String> = RecordKind::ALL.iter().map(|k| k.file_name()).collect();
        files.extend(self.extra_record_files()?);

        let mut last_write: Option<(String, String, String)> = None;
        for file in &files {
            let path = self.root.join(file);
            let (count, timestamp) = match survey_file(&path, options) {
                Ok(survey) => survey,
                Err(crate::Error::Io(e)) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };

            let section = index_section_for(file);
            index.set_count(&section, file, count, timestamp.as_deref());
            if let Some(ts) = timestamp {
                if last_write.as_ref().is_none_or(|(_, _, latest)| ts > *latest) {
                    last_write = Some((section, file.clone(), ts));
                }
            }
        }

        if let Some((section, file, ts)) = last_write {
            index.set_state(&section, &file, &ts);
        }
        index.save(&index_path, self.config.durability)?;
        tracing::info!(root = %self.root.display(), files = files.len(), "index rebuilt");
        Ok(index)
    }

    /// Record files anywhere under the root that are not one of the
    /// standard kinds, as `/`-separated relative names. Dot-prefixed entries
    /// (temp files, hidden directories) and symlinks are skipped.
    fn extra_record_files(&self) -> crate::Result<Vec<String>> {
        let mut extra = Vec::new();
        let mut pending: Vec<(PathBuf, String)> = vec![(self.root.clone(), String::new())];

        while let Some((dir, prefix)) = pending.pop() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            for entry in entries {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with('.') {
                    continue;
                }
                let relative = format!("{prefix}{name}");
                let file_type = entry.file_type()?;
                if file_type.is_dir() {
                    pending.push((entry.path(), format!("{relative}/")));
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }

                let is_record_file = Path::new(&name)
                    .extension()
                    .is_some_and(|ext| ext == RECORD_EXTENSION);
                let known = relative == INDEX_FILENAME
                    || RecordKind::ALL.iter().any(|k| k.file_name() == relative);
                if is_record_file && !known {
                    extra.push(relative);
                }
            }
        }

        extra.sort();
        Ok(extra)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::parse_line;
    use crate::storage::file_lock::InProcessLockManager;
    use crate::types::DurabilityMode;

    fn writer_in(dir: &Path) -> Writer {
        let config = Config {
            durability: DurabilityMode::None,
            ..Config::default()
        };
        Writer::new(dir, config, Arc::new(InProcessLockManager::default())).unwrap()
    }

    fn numbers_in(path: &Path) -> Vec<u64> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .filter_map(|l| parse_line(l).number())
            .collect()
    }

    #[test]
    fn test_first_write_creates_store_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join(".aicf");
        let writer = writer_in(&root);

        let receipt = writer
            .write_conversation(Conversation::new("user", "hello"))
            .unwrap();
        assert_eq!(receipt.line_number, 1);
        assert_eq!(receipt.tag, "CONVERSATION");
        assert!(receipt.index_updated);
        assert_eq!(receipt.file, root.join("conversations.aicf"));

        let index = IndexDocument::load(&writer.index_path(), StreamOptions::default()).unwrap();
        assert_eq!(index.count("CONVERSATIONS"), 1);
        assert_eq!(index.get("STATE", "last_file"), Some("conversations.aicf"));
    }

    #[test]
    fn test_numbers_increase_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer_in(dir.path());

        for i in 0..3 {
            let receipt = writer
                .write_decision(Decision::new(format!("d{i}"), "why", "low"))
                .unwrap();
            assert_eq!(receipt.line_number, i + 1);
        }
        let receipt = writer.write_memory(Memory::new("episodic", "m")).unwrap();
        assert_eq!(receipt.line_number, 1);

        assert_eq!(numbers_in(&dir.path().join("decisions.aicf")), vec![1, 2, 3]);
    }

    #[test]
    fn test_concurrent_appends_get_unique_monotonic_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let writer = Arc::new(writer_in(dir.path()));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let writer = Arc::clone(&writer);
                std::thread::spawn(move || {
                    (0..25)
                        .map(|i| {
                            writer
                                .write_memory(Memory::new("semantic", format!("{t}-{i}")))
                                .unwrap()
                                .line_number
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut assigned: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assigned.sort_unstable();
        assert_eq!(assigned, (1..=200).collect::<Vec<_>>());

        assert_eq!(
            numbers_in(&dir.path().join("memories.aicf")),
            (1..=200).collect::<Vec<_>>()
        );
        let index = IndexDocument::load(&writer.index_path(), StreamOptions::default()).unwrap();
        assert_eq!(index.count("MEMORIES"), 200);
    }

    #[test]
    fn test_rejected_path_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("store");
        let writer = writer_in(&root);

        let err = writer
            .append_record("../escape.aicf", "NOTE", None, &[])
            .unwrap_err();
        assert!(matches!(err, crate::Error::PathViolation { .. }));
        assert!(!root.exists());
        assert!(!dir.path().join("escape.aicf").exists());
    }

    #[test]
    fn test_index_file_cannot_be_appended_to() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer_in(dir.path());
        assert!(matches!(
            writer.append_record(INDEX_FILENAME, "NOTE", None, &[]),
            Err(crate::Error::InvalidField { .. })
        ));
    }

    #[test]
    fn test_generic_append_gets_file_section() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer_in(dir.path());
        let fields = vec![("text".to_string(), FieldValue::from("free form"))];

        let receipt = writer
            .append_record("scratch.aicf", "NOTE", Some("n1"), &fields)
            .unwrap();
        assert_eq!(receipt.record_id.as_deref(), Some("n1"));

        let index = IndexDocument::load(&writer.index_path(), StreamOptions::default()).unwrap();
        assert_eq!(index.count("FILE_SCRATCH"), 1);
        assert_eq!(index.get("FILE_SCRATCH", "file"), Some("scratch.aicf"));
        assert_eq!(index_section_for("2024.aicf"), "FILE_2024");
        assert!(index_section_for("team-notes.aicf").starts_with("FILE_TEAM_NOTES_"));
    }

    #[test]
    fn test_generic_sections_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer_in(dir.path());
        writer
            .write_conversation(Conversation::new("user", "hello"))
            .unwrap();
        for file in [
            "archive/conversations.aicf",
            "metadata.aicf",
            "state.aicf",
            "team-notes.aicf",
            "team_notes.aicf",
            "./archive//nested.aicf",
        ] {
            writer.append_record(file, "NOTE", None, &[]).unwrap();
        }

        let index = IndexDocument::load(&writer.index_path(), StreamOptions::default()).unwrap();
        assert_eq!(index.count("CONVERSATIONS"), 1);
        assert_eq!(index.get("CONVERSATIONS", "file"), Some("conversations.aicf"));
        assert_eq!(index.get("METADATA", "count"), None);
        assert!(index.get("METADATA", "format_version").is_some());
        assert_eq!(index.get("STATE", "count"), None);
        assert_eq!(index.get("FILE_METADATA", "file"), Some("metadata.aicf"));
        assert_eq!(index.get("FILE_STATE", "file"), Some("state.aicf"));

        let archived = index_section_for("archive/conversations.aicf");
        assert!(archived.starts_with("FILE_ARCHIVE_CONVERSATIONS_"));
        assert_eq!(index.count(&archived), 1);
        assert_eq!(index.get(&archived, "file"), Some("archive/conversations.aicf"));

        let dashed = index_section_for("team-notes.aicf");
        let underscored = index_section_for("team_notes.aicf");
        assert_ne!(dashed, underscored);
        assert_eq!(index.count(&dashed), 1);
        assert_eq!(index.count(&underscored), 1);
        assert_eq!(index.count(&index_section_for("archive/nested.aicf")), 1);

        let rebuilt = writer.rebuild_index().unwrap();
        let names = |doc: &IndexDocument| -> Vec<String> {
            doc.section_names().map(str::to_string).collect()
        };
        assert_eq!(names(&rebuilt), names(&index));
        for section in names(&index) {
            assert_eq!(rebuilt.count(&section), index.count(&section), "{section}");
            assert_eq!(rebuilt.get(&section, "file"), index.get(&section, "file"), "{section}");
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_relative_root_guards_the_index() {
        let dir = tempfile::tempdir().unwrap();
        let cwd = std::env::current_dir().unwrap();
        let mut relative = PathBuf::new();
        for _ in cwd.components().skip(1) {
            relative.push("..");
        }
        let relative = relative.join(dir.path().strip_prefix("/").unwrap());
        assert!(relative.is_relative());

        let writer = writer_in(&relative);
        assert!(writer.root().is_absolute());
        assert_eq!(writer.root(), dir.path());

        writer.write_memory(Memory::new("semantic", "m")).unwrap();
        for target in [INDEX_FILENAME, "./index.aicf"] {
            assert!(matches!(
                writer.append_record(target, "NOTE", None, &[]),
                Err(crate::Error::InvalidField { .. })
            ));
        }

        let raw = std::fs::read_to_string(writer.index_path()).unwrap();
        assert!(!raw.contains("@NOTE"));
        let index = IndexDocument::load(&writer.index_path(), StreamOptions::default()).unwrap();
        assert_eq!(index.count("MEMORIES"), 1);
        assert_eq!(index.get("STATE", "last_file"), Some("memories.aicf"));
    }

    #[test]
    fn test_rebuild_index_recovers_from_lost_index() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer_in(dir.path());
        writer.write_insight(Insight::new("perf", "fast", 0.9)).unwrap();
        writer.write_insight(Insight::new("perf", "faster", 0.8)).unwrap();
        let session = Session::new("open", "pairing");
        let session_ts = session.timestamp.clone();
        writer.write_session(session).unwrap();
        writer
            .append_record("scratch.aicf", "NOTE", None, &[])
            .unwrap();

        std::fs::write(writer.index_path(), "garbage\n").unwrap();
        let rebuilt = writer.rebuild_index().unwrap();
        assert_eq!(rebuilt.count("INSIGHTS"), 2);
        assert_eq!(rebuilt.count("SESSIONS"), 1);
        assert_eq!(rebuilt.count("FILE_SCRATCH"), 1);
        assert_eq!(rebuilt.last_updated("SESSIONS"), Some(session_ts.as_str()));
        assert_eq!(rebuilt.get("STATE", "last_file"), Some("sessions.aicf"));

        let loaded = IndexDocument::load(&writer.index_path(), StreamOptions::default()).unwrap();
        assert_eq!(loaded, rebuilt);
    }
}
