//! Read path for record files.
//!
//! All scans go through the bounded line streaming primitives, so memory
//! use does not grow with file size. A file that fails to read is reported
//! and skipped; it never hides the other files.

pub mod tail;

pub use tail::{InMemoryTail, Section, StreamingTail, TailStrategy, select_tail_strategy};
use tail::section_tag;

use crate::constants::{INDEX_FILENAME, INDEX_STATE_SECTION, SEARCH_CONTEXT_LINES};
use crate::error::lock_mutex;
use crate::format::assembler::is_record_start;
use crate::format::{Anomaly, SectionAssembler, parse_line, parse_section};
use crate::security::path::normalize_root;
use crate::security::{unescape_payload, validate_path};
use crate::storage::index_file::IndexDocument;
use crate::storage::line_stream::{LineControl, StreamOptions, stream_lines};
use crate::types::{Config, Record, RecordKind, WorkState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

/// One line matching a search term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub kind: RecordKind,
    /// Line number of the record containing the match, 0 before any record.
    pub line_number: u64,
    /// One-based physical line of the match.
    pub physical_line: u64,
    /// Unescaped payload of the matching line.
    pub payload: String,
    /// Up to three preceding physical lines, oldest first.
    pub context: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchReport {
    pub hits: Vec<SearchHit>,
    /// Files that could not be read, with the reason.
    pub failures: Vec<(RecordKind, String)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileStats {
    pub kind: RecordKind,
    pub file: String,
    pub exists: bool,
    pub size_bytes: u64,
    pub indexed_records: u64,
    pub last_updated: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub root: PathBuf,
    pub files: Vec<FileStats>,
    pub total_records: u64,
    pub total_bytes: u64,
    pub last_updated: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    /// One-based physical line.
    pub line: u64,
    pub record_line: Option<u64>,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub file: PathBuf,
    pub lines: u64,
    pub records: u64,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Identity of an index file version. The index is replaced by rename, so
/// the inode changes on every rewrite where the platform exposes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IndexStamp {
    modified: Option<SystemTime>,
    len: u64,
    file_id: u64,
}

impl IndexStamp {
    fn of(metadata: &std::fs::Metadata) -> Self {
        #[cfg(unix)]
        let file_id = std::os::unix::fs::MetadataExt::ino(metadata);
        #[cfg(not(unix))]
        let file_id = 0;

        Self {
            modified: metadata.modified().ok(),
            len: metadata.len(),
            file_id,
        }
    }
}

pub struct Reader {
    root: PathBuf,
    config: Config,
    index_cache: Mutex<Option<(IndexStamp, Arc<IndexDocument>)>>,
}

impl Reader {
    /// `root` is made absolute and lexically normalized once, here.
    pub fn new(root: impl AsRef<Path>, config: Config) -> crate::Result<Self> {
        Ok(Self {
            root: normalize_root(root.as_ref())?,
            config,
            index_cache: Mutex::new(None),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn stream_options(&self) -> StreamOptions {
        StreamOptions::from(&self.config)
    }

    fn kind_path(&self, kind: RecordKind) -> PathBuf {
        self.root.join(kind.file_name())
    }

    /// The summary index, reloaded only when the file changed.
    pub fn get_index(&self) -> crate::Result<Arc<IndexDocument>> {
        let path = self.root.join(INDEX_FILENAME);
        let metadata = match std::fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Arc::new(IndexDocument::new()));
            }
            Err(e) => return Err(e.into()),
        };
        let stamp = IndexStamp::of(&metadata);

        let mut cache = lock_mutex(&self.index_cache)?;
        if let Some((cached_stamp, index)) = cache.as_ref() {
            if *cached_stamp == stamp {
                return Ok(Arc::clone(index));
            }
        }

        let index = Arc::new(IndexDocument::load(&path, self.stream_options())?);
        tracing::debug!(path = %path.display(), "index reloaded");
        *cache = Some((stamp, Arc::clone(&index)));
        Ok(index)
    }

    fn parse_records(&self, path: &Path, sections: Vec<Section>) -> Vec<Record> {
        sections
            .into_iter()
            .filter_map(|lines| {
                let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
                let parsed = parse_section(&refs);
                match Record::from_parsed(&parsed, path) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping malformed record");
                        None
                    }
                }
            })
            .collect()
    }

    /// The newest `count` well-formed records of `kind`, oldest first.
    /// Malformed records are logged and skipped; older records fill their
    /// place.
    pub fn get_last_records(&self, kind: RecordKind, count: usize) -> crate::Result<Vec<Record>> {
        let path = self.kind_path(kind);
        let size = match std::fs::metadata(&path) {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let strategy = select_tail_strategy(
            size,
            self.config.streaming_threshold_bytes,
            self.stream_options(),
        );
        tracing::debug!(kind = %kind, size, strategy = strategy.name(), count, "reading tail");
        let tag = kind.tag();
        let well_formed = |lines: &Section| -> bool {
            if section_tag(lines) != Some(tag) {
                return false;
            }
            let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
            match Record::from_parsed(&parse_section(&refs), &path) {
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed record");
                    false
                }
            }
        };
        let sections = strategy.last_matching(&path, count, &well_formed)?;
        Ok(self.parse_records(&path, sections))
    }

    /// The most recent work-state record, if any.
    pub fn get_current_work_state(&self) -> crate::Result<Option<WorkState>> {
        let mut records = self.get_last_records(RecordKind::WorkState, 1)?;
        Ok(match records.pop() {
            Some(Record::WorkState(state)) => Some(state),
            _ => None,
        })
    }

    /// Records of `kind` whose timestamp falls in `[since, until)`. Records
    /// with unparsable timestamps are skipped.
    pub fn get_records_between(
        &self,
        kind: RecordKind,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> crate::Result<Vec<Record>> {
        let path = self.kind_path(kind);
        let mut assembler = SectionAssembler::new();
        let mut sections = Vec::new();

        let streamed = stream_lines(&path, self.stream_options(), |line| {
            sections.extend(assembler.push(line.text));
            LineControl::Continue
        });
        match streamed {
            Ok(_) => {}
            Err(crate::Error::Io(e)) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        }
        sections.extend(assembler.finish());

        let in_range = |record: &Record| {
            let Ok(ts) = DateTime::parse_from_rfc3339(record.timestamp()) else {
                return false;
            };
            let ts = ts.with_timezone(&Utc);
            since.is_none_or(|s| ts >= s) && until.is_none_or(|u| ts < u)
        };

        Ok(self
            .parse_records(&path, sections)
            .into_iter()
            .filter(|r| r.kind() == kind && in_range(r))
            .collect())
    }

    /// Case-insensitive substring search over unescaped payloads. An empty
    /// `kinds` slice searches every kind. Stops after `max_results` hits.
    pub fn search(&self, term: &str, kinds: &[RecordKind], max_results: usize) -> SearchReport {
        let mut report = SearchReport::default();
        let needle = term.to_lowercase();
        if needle.is_empty() || max_results == 0 {
            return report;
        }

        let kinds: &[RecordKind] = if kinds.is_empty() { &RecordKind::ALL } else { kinds };
        for &kind in kinds {
            if report.hits.len() >= max_results {
                break;
            }
            let path = self.kind_path(kind);
            if !path.exists() {
                continue;
            }

            let mut context: VecDeque<String> = VecDeque::with_capacity(SEARCH_CONTEXT_LINES);
            let mut record_line = 0u64;
            let hits = &mut report.hits;

            let result = stream_lines(&path, self.stream_options(), |line| {
                let physical = parse_line(line.text);
                if is_record_start(line.text) {
                    record_line = physical.number().unwrap_or(record_line);
                }

                let payload = unescape_payload(physical.payload());
                if payload.to_lowercase().contains(&needle) {
                    hits.push(SearchHit {
                        kind,
                        line_number: record_line,
                        physical_line: line.index + 1,
                        payload,
                        context: context.iter().cloned().collect(),
                    });
                    if hits.len() >= max_results {
                        return LineControl::Stop;
                    }
                }

                if context.len() == SEARCH_CONTEXT_LINES {
                    context.pop_front();
                }
                context.push_back(line.text.to_string());
                LineControl::Continue
            });

            if let Err(e) = result {
                tracing::warn!(kind = %kind, error = %e, "search skipped unreadable file");
                report.failures.push((kind, e.to_string()));
            }
        }

        report
    }

    /// Per-kind sizes and indexed counts.
    pub fn get_stats(&self) -> crate::Result<StoreStats> {
        let index = self.get_index()?;
        let mut files = Vec::with_capacity(RecordKind::ALL.len());
        let mut total_records = 0;
        let mut total_bytes = 0;

        for kind in RecordKind::ALL {
            let path = self.kind_path(kind);
            let (exists, size_bytes) = match std::fs::metadata(&path) {
                Ok(metadata) => (true, metadata.len()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => (false, 0),
                Err(e) => return Err(e.into()),
            };
            let section = kind.index_section();
            let indexed_records = index.count(section);
            total_records += indexed_records;
            total_bytes += size_bytes;

            files.push(FileStats {
                kind,
                file: kind.file_name(),
                exists,
                size_bytes,
                indexed_records,
                last_updated: index.last_updated(section).map(str::to_string),
            });
        }

        Ok(StoreStats {
            root: self.root.clone(),
            files,
            total_records,
            total_bytes,
            last_updated: index.last_updated(INDEX_STATE_SECTION).map(str::to_string),
        })
    }

    /// Check a record file for structural problems, reporting every one.
    pub fn validate_file(&self, file: &str) -> crate::Result<ValidationReport> {
        let path = validate_path(file, &self.root)?;
        let mut report = ValidationReport {
            file: path.clone(),
            ..ValidationReport::default()
        };

        let mut assembler = SectionAssembler::new();
        let mut section_start = 0u64;
        let mut last_number: Option<u64> = None;
        let mut issues: Vec<ValidationIssue> = Vec::new();
        let mut sections: Vec<(u64, Section)> = Vec::new();

        let summary = stream_lines(&path, self.stream_options(), |line| {
            let physical = line.index + 1;
            if line.truncated {
                issues.push(ValidationIssue {
                    line: physical,
                    record_line: None,
                    message: format!(
                        "line exceeds {} bytes and was truncated",
                        self.config.max_line_bytes
                    ),
                });
            }

            if let Some(number) = parse_line(line.text).number() {
                if let Some(previous) = last_number {
                    if number <= previous {
                        let what = if number == previous { "duplicate" } else { "non-monotonic" };
                        issues.push(ValidationIssue {
                            line: physical,
                            record_line: Some(number),
                            message: format!("{what} line number {number} after {previous}"),
                        });
                    }
                }
                last_number = Some(number);
            }

            let starts = is_record_start(line.text);
            if !starts && assembler.orphan_lines() == line.index && !line.text.trim().is_empty() {
                // Every line so far has been an orphan, this one included.
                issues.push(ValidationIssue {
                    line: physical,
                    record_line: None,
                    message: "line appears before the first record".to_string(),
                });
            }
            if let Some(done) = assembler.push(line.text) {
                sections.push((section_start, done));
            }
            if starts {
                section_start = line.index;
            }
            LineControl::Continue
        })?;
        if let Some(done) = assembler.finish() {
            sections.push((section_start, done));
        }

        report.lines = summary.lines;
        report.records = sections.len() as u64;

        for (start, lines) in &sections {
            let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
            let parsed = parse_section(&refs);
            for Anomaly {
                record_line,
                offset,
                message,
            } in &parsed.anomalies
            {
                issues.push(ValidationIssue {
                    line: start + *offset as u64 + 1,
                    record_line: *record_line,
                    message: message.clone(),
                });
            }
            if RecordKind::from_tag(&parsed.tag).is_some() {
                if let Err(e) = Record::from_parsed(&parsed, &path) {
                    issues.push(ValidationIssue {
                        line: start + 1,
                        record_line: Some(parsed.line_number),
                        message: e.to_string(),
                    });
                }
            }
        }

        issues.sort_by_key(|issue| issue.line);
        report.issues = issues;
        if !report.is_valid() {
            tracing::warn!(file = %path.display(), issues = report.issues.len(), "validation found issues");
        }
        Ok(report)
    }
}
