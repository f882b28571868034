use crate::constants::{
    DEFAULT_AUDIT_CAPACITY, DEFAULT_CHUNK_BYTES, DEFAULT_LOCK_TIMEOUT_MS, DEFAULT_MAX_LINE_BYTES,
    DEFAULT_MAX_PAYLOAD_CHARS, DEFAULT_STALE_LOCK_MS, DEFAULT_STREAMING_THRESHOLD_BYTES,
    RECORD_EXTENSION,
};
use crate::format::{FieldValue, ParsedRecord};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Current UTC time in the RFC 3339 form written to every record.
pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn new_record_id(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4().simple())
}

/// The record families a store keeps, one file per kind.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
#[clap(rename_all = "snake_case")]
pub enum RecordKind {
    Conversation,
    Decision,
    Memory,
    WorkState,
    Session,
    Embedding,
    Consolidation,
    Insight,
}

impl RecordKind {
    pub const ALL: [RecordKind; 8] = [
        RecordKind::Conversation,
        RecordKind::Decision,
        RecordKind::Memory,
        RecordKind::WorkState,
        RecordKind::Session,
        RecordKind::Embedding,
        RecordKind::Consolidation,
        RecordKind::Insight,
    ];

    /// Section-marker tag written at the start of each record.
    pub fn tag(self) -> &'static str {
        match self {
            RecordKind::Conversation => "CONVERSATION",
            RecordKind::Decision => "DECISION",
            RecordKind::Memory => "MEMORY",
            RecordKind::WorkState => "WORK_STATE",
            RecordKind::Session => "SESSION",
            RecordKind::Embedding => "EMBEDDING",
            RecordKind::Consolidation => "CONSOLIDATION",
            RecordKind::Insight => "INSIGHT",
        }
    }

    pub fn file_stem(self) -> &'static str {
        match self {
            RecordKind::Conversation => "conversations",
            RecordKind::Decision => "decisions",
            RecordKind::Memory => "memories",
            RecordKind::WorkState => "work-state",
            RecordKind::Session => "sessions",
            RecordKind::Embedding => "embeddings",
            RecordKind::Consolidation => "consolidations",
            RecordKind::Insight => "insights",
        }
    }

    pub fn file_name(self) -> String {
        format!("{}.{RECORD_EXTENSION}", self.file_stem())
    }

    /// Name of the index section summarising this kind.
    pub fn index_section(self) -> &'static str {
        match self {
            RecordKind::Conversation => "CONVERSATIONS",
            RecordKind::Decision => "DECISIONS",
            RecordKind::Memory => "MEMORIES",
            RecordKind::WorkState => "WORK_STATES",
            RecordKind::Session => "SESSIONS",
            RecordKind::Embedding => "EMBEDDINGS",
            RecordKind::Consolidation => "CONSOLIDATIONS",
            RecordKind::Insight => "INSIGHTS",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    fn required_keys(self) -> &'static [&'static str] {
        match self {
            RecordKind::Conversation => &["id", "timestamp", "role", "content"],
            RecordKind::Decision => &["id", "timestamp", "decision", "rationale", "impact"],
            RecordKind::Memory => &["id", "timestamp", "memory_type", "content"],
            RecordKind::WorkState => &["id", "timestamp", "status", "current_task", "next_steps"],
            RecordKind::Session => &["id", "timestamp", "status", "summary", "files"],
            RecordKind::Embedding => &[
                "id",
                "timestamp",
                "source_id",
                "model",
                "dimensions",
                "vector",
            ],
            RecordKind::Consolidation => &["id", "timestamp", "source_ids", "summary"],
            RecordKind::Insight => &["id", "timestamp", "category", "insight", "confidence"],
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKind::Conversation => write!(f, "conversation"),
            RecordKind::Decision => write!(f, "decision"),
            RecordKind::Memory => write!(f, "memory"),
            RecordKind::WorkState => write!(f, "work_state"),
            RecordKind::Session => write!(f, "session"),
            RecordKind::Embedding => write!(f, "embedding"),
            RecordKind::Consolidation => write!(f, "consolidation"),
            RecordKind::Insight => write!(f, "insight"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub timestamp: String,
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub additional: BTreeMap<String, String>,
}

impl Conversation {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: new_record_id("conv"),
            timestamp: now_rfc3339(),
            role: role.into(),
            content: content.into(),
            additional: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub timestamp: String,
    pub decision: String,
    pub rationale: String,
    pub impact: String,
    #[serde(default)]
    pub additional: BTreeMap<String, String>,
}

impl Decision {
    pub fn new(
        decision: impl Into<String>,
        rationale: impl Into<String>,
        impact: impl Into<String>,
    ) -> Self {
        Self {
            id: new_record_id("dec"),
            timestamp: now_rfc3339(),
            decision: decision.into(),
            rationale: rationale.into(),
            impact: impact.into(),
            additional: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub timestamp: String,
    pub memory_type: String,
    pub content: String,
    #[serde(default)]
    pub additional: BTreeMap<String, String>,
}

impl Memory {
    pub fn new(memory_type: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: new_record_id("mem"),
            timestamp: now_rfc3339(),
            memory_type: memory_type.into(),
            content: content.into(),
            additional: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkState {
    pub id: String,
    pub timestamp: String,
    pub status: String,
    pub current_task: String,
    #[serde(default)]
    pub next_steps: Vec<String>,
    #[serde(default)]
    pub additional: BTreeMap<String, String>,
}

impl WorkState {
    pub fn new(status: impl Into<String>, current_task: impl Into<String>) -> Self {
        Self {
            id: new_record_id("work"),
            timestamp: now_rfc3339(),
            status: status.into(),
            current_task: current_task.into(),
            next_steps: Vec::new(),
            additional: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub timestamp: String,
    pub status: String,
    pub summary: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub additional: BTreeMap<String, String>,
}

impl Session {
    pub fn new(status: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            id: new_record_id("sess"),
            timestamp: now_rfc3339(),
            status: status.into(),
            summary: summary.into(),
            files: Vec::new(),
            additional: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub id: String,
    pub timestamp: String,
    pub source_id: String,
    pub model: String,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub additional: BTreeMap<String, String>,
}

impl Embedding {
    pub fn new(source_id: impl Into<String>, model: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            id: new_record_id("emb"),
            timestamp: now_rfc3339(),
            source_id: source_id.into(),
            model: model.into(),
            vector,
            additional: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consolidation {
    pub id: String,
    pub timestamp: String,
    pub source_ids: Vec<String>,
    pub summary: String,
    #[serde(default)]
    pub additional: BTreeMap<String, String>,
}

impl Consolidation {
    pub fn new(source_ids: Vec<String>, summary: impl Into<String>) -> Self {
        Self {
            id: new_record_id("cons"),
            timestamp: now_rfc3339(),
            source_ids,
            summary: summary.into(),
            additional: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub id: String,
    pub timestamp: String,
    pub category: String,
    pub insight: String,
    pub confidence: f32,
    #[serde(default)]
    pub additional: BTreeMap<String, String>,
}

impl Insight {
    pub fn new(category: impl Into<String>, insight: impl Into<String>, confidence: f32) -> Self {
        Self {
            id: new_record_id("ins"),
            timestamp: now_rfc3339(),
            category: category.into(),
            insight: insight.into(),
            confidence,
            additional: BTreeMap::new(),
        }
    }
}

/// A typed record: fixed required fields per kind plus an open
/// `additional` bucket for extension keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    Conversation(Conversation),
    Decision(Decision),
    Memory(Memory),
    WorkState(WorkState),
    Session(Session),
    Embedding(Embedding),
    Consolidation(Consolidation),
    Insight(Insight),
}

fn text(value: &str) -> FieldValue {
    FieldValue::Text(value.to_string())
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Conversation(_) => RecordKind::Conversation,
            Record::Decision(_) => RecordKind::Decision,
            Record::Memory(_) => RecordKind::Memory,
            Record::WorkState(_) => RecordKind::WorkState,
            Record::Session(_) => RecordKind::Session,
            Record::Embedding(_) => RecordKind::Embedding,
            Record::Consolidation(_) => RecordKind::Consolidation,
            Record::Insight(_) => RecordKind::Insight,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Record::Conversation(r) => &r.id,
            Record::Decision(r) => &r.id,
            Record::Memory(r) => &r.id,
            Record::WorkState(r) => &r.id,
            Record::Session(r) => &r.id,
            Record::Embedding(r) => &r.id,
            Record::Consolidation(r) => &r.id,
            Record::Insight(r) => &r.id,
        }
    }

    pub fn timestamp(&self) -> &str {
        match self {
            Record::Conversation(r) => &r.timestamp,
            Record::Decision(r) => &r.timestamp,
            Record::Memory(r) => &r.timestamp,
            Record::WorkState(r) => &r.timestamp,
            Record::Session(r) => &r.timestamp,
            Record::Embedding(r) => &r.timestamp,
            Record::Consolidation(r) => &r.timestamp,
            Record::Insight(r) => &r.timestamp,
        }
    }

    pub fn additional(&self) -> &BTreeMap<String, String> {
        match self {
            Record::Conversation(r) => &r.additional,
            Record::Decision(r) => &r.additional,
            Record::Memory(r) => &r.additional,
            Record::WorkState(r) => &r.additional,
            Record::Session(r) => &r.additional,
            Record::Embedding(r) => &r.additional,
            Record::Consolidation(r) => &r.additional,
            Record::Insight(r) => &r.additional,
        }
    }

    pub fn additional_mut(&mut self) -> &mut BTreeMap<String, String> {
        match self {
            Record::Conversation(r) => &mut r.additional,
            Record::Decision(r) => &mut r.additional,
            Record::Memory(r) => &mut r.additional,
            Record::WorkState(r) => &mut r.additional,
            Record::Session(r) => &mut r.additional,
            Record::Embedding(r) => &mut r.additional,
            Record::Consolidation(r) => &mut r.additional,
            Record::Insight(r) => &mut r.additional,
        }
    }

    /// Free text the PII policy may rewrite. `id` and `timestamp` are
    /// identity fields: they are screened separately and never rewritten.
    pub fn user_text_mut(&mut self) -> Vec<&mut String> {
        let mut fields: Vec<&mut String> = Vec::new();
        let additional = match self {
            Record::Conversation(r) => {
                fields.extend([&mut r.role, &mut r.content]);
                &mut r.additional
            }
            Record::Decision(r) => {
                fields.extend([&mut r.decision, &mut r.rationale, &mut r.impact]);
                &mut r.additional
            }
            Record::Memory(r) => {
                fields.extend([&mut r.memory_type, &mut r.content]);
                &mut r.additional
            }
            Record::WorkState(r) => {
                fields.extend([&mut r.status, &mut r.current_task]);
                fields.extend(r.next_steps.iter_mut());
                &mut r.additional
            }
            Record::Session(r) => {
                fields.extend([&mut r.status, &mut r.summary]);
                fields.extend(r.files.iter_mut());
                &mut r.additional
            }
            Record::Embedding(r) => {
                fields.extend([&mut r.source_id, &mut r.model]);
                &mut r.additional
            }
            Record::Consolidation(r) => {
                fields.push(&mut r.summary);
                fields.extend(r.source_ids.iter_mut());
                &mut r.additional
            }
            Record::Insight(r) => {
                fields.extend([&mut r.category, &mut r.insight]);
                &mut r.additional
            }
        };
        fields.extend(additional.values_mut());
        fields
    }

    /// Ordered key/value fields: required keys first, then `additional`
    /// in key order.
    pub fn to_fields(&self) -> Vec<(String, FieldValue)> {
        let mut fields: Vec<(&str, FieldValue)> = match self {
            Record::Conversation(r) => vec![
                ("id", text(&r.id)),
                ("timestamp", text(&r.timestamp)),
                ("role", text(&r.role)),
                ("content", text(&r.content)),
            ],
            Record::Decision(r) => vec![
                ("id", text(&r.id)),
                ("timestamp", text(&r.timestamp)),
                ("decision", text(&r.decision)),
                ("rationale", text(&r.rationale)),
                ("impact", text(&r.impact)),
            ],
            Record::Memory(r) => vec![
                ("id", text(&r.id)),
                ("timestamp", text(&r.timestamp)),
                ("memory_type", text(&r.memory_type)),
                ("content", text(&r.content)),
            ],
            Record::WorkState(r) => vec![
                ("id", text(&r.id)),
                ("timestamp", text(&r.timestamp)),
                ("status", text(&r.status)),
                ("current_task", text(&r.current_task)),
                ("next_steps", FieldValue::List(r.next_steps.clone())),
            ],
            Record::Session(r) => vec![
                ("id", text(&r.id)),
                ("timestamp", text(&r.timestamp)),
                ("status", text(&r.status)),
                ("summary", text(&r.summary)),
                ("files", FieldValue::List(r.files.clone())),
            ],
            Record::Embedding(r) => vec![
                ("id", text(&r.id)),
                ("timestamp", text(&r.timestamp)),
                ("source_id", text(&r.source_id)),
                ("model", text(&r.model)),
                ("dimensions", FieldValue::Text(r.vector.len().to_string())),
                (
                    "vector",
                    FieldValue::List(r.vector.iter().map(|v| v.to_string()).collect()),
                ),
            ],
            Record::Consolidation(r) => vec![
                ("id", text(&r.id)),
                ("timestamp", text(&r.timestamp)),
                ("source_ids", FieldValue::List(r.source_ids.clone())),
                ("summary", text(&r.summary)),
            ],
            Record::Insight(r) => vec![
                ("id", text(&r.id)),
                ("timestamp", text(&r.timestamp)),
                ("category", text(&r.category)),
                ("insight", text(&r.insight)),
                ("confidence", FieldValue::Text(r.confidence.to_string())),
            ],
        };

        let required = self.kind().required_keys();
        for (key, value) in self.additional() {
            if !required.contains(&key.as_str()) {
                fields.push((key.as_str(), text(value)));
            }
        }

        fields
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect()
    }

    /// Rebuild a typed record from a parsed section. Missing required keys
    /// or unparsable numbers yield [`crate::Error::MalformedRecord`].
    pub fn from_parsed(parsed: &ParsedRecord, file: &Path) -> crate::Result<Self> {
        let kind = RecordKind::from_tag(&parsed.tag).ok_or_else(|| crate::Error::MalformedRecord {
            file: file.to_path_buf(),
            line: parsed.line_number,
            reason: format!("unknown record tag '{}'", parsed.tag),
        })?;
        let fields = RequiredFields { parsed, file };

        let record = match kind {
            RecordKind::Conversation => Record::Conversation(Conversation {
                id: fields.text("id")?,
                timestamp: fields.text("timestamp")?,
                role: fields.text("role")?,
                content: fields.text("content")?,
                additional: fields.additional(kind),
            }),
            RecordKind::Decision => Record::Decision(Decision {
                id: fields.text("id")?,
                timestamp: fields.text("timestamp")?,
                decision: fields.text("decision")?,
                rationale: fields.text("rationale")?,
                impact: fields.text("impact")?,
                additional: fields.additional(kind),
            }),
            RecordKind::Memory => Record::Memory(Memory {
                id: fields.text("id")?,
                timestamp: fields.text("timestamp")?,
                memory_type: fields.text("memory_type")?,
                content: fields.text("content")?,
                additional: fields.additional(kind),
            }),
            RecordKind::WorkState => Record::WorkState(WorkState {
                id: fields.text("id")?,
                timestamp: fields.text("timestamp")?,
                status: fields.text("status")?,
                current_task: fields.text("current_task")?,
                next_steps: parsed.list("next_steps").unwrap_or_default(),
                additional: fields.additional(kind),
            }),
            RecordKind::Session => Record::Session(Session {
                id: fields.text("id")?,
                timestamp: fields.text("timestamp")?,
                status: fields.text("status")?,
                summary: fields.text("summary")?,
                files: parsed.list("files").unwrap_or_default(),
                additional: fields.additional(kind),
            }),
            RecordKind::Embedding => {
                let vector = fields
                    .list("vector")?
                    .iter()
                    .map(|v| v.parse::<f32>())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| fields.malformed(format!("invalid vector component: {e}")))?;
                let dimensions: usize = fields
                    .text("dimensions")?
                    .parse()
                    .map_err(|e| fields.malformed(format!("invalid dimensions: {e}")))?;
                if dimensions != vector.len() {
                    return Err(fields.malformed(format!(
                        "dimensions={dimensions} but vector has {} components",
                        vector.len()
                    )));
                }
                Record::Embedding(Embedding {
                    id: fields.text("id")?,
                    timestamp: fields.text("timestamp")?,
                    source_id: fields.text("source_id")?,
                    model: fields.text("model")?,
                    vector,
                    additional: fields.additional(kind),
                })
            }
            RecordKind::Consolidation => Record::Consolidation(Consolidation {
                id: fields.text("id")?,
                timestamp: fields.text("timestamp")?,
                source_ids: fields.list("source_ids")?,
                summary: fields.text("summary")?,
                additional: fields.additional(kind),
            }),
            RecordKind::Insight => Record::Insight(Insight {
                id: fields.text("id")?,
                timestamp: fields.text("timestamp")?,
                category: fields.text("category")?,
                insight: fields.text("insight")?,
                confidence: fields
                    .text("confidence")?
                    .parse()
                    .map_err(|e| fields.malformed(format!("invalid confidence: {e}")))?,
                additional: fields.additional(kind),
            }),
        };

        Ok(record)
    }
}

struct RequiredFields<'a> {
    parsed: &'a ParsedRecord,
    file: &'a Path,
}

impl RequiredFields<'_> {
    fn malformed(&self, reason: String) -> crate::Error {
        crate::Error::MalformedRecord {
            file: self.file.to_path_buf(),
            line: self.parsed.line_number,
            reason,
        }
    }

    fn text(&self, key: &str) -> crate::Result<String> {
        self.parsed
            .text(key)
            .ok_or_else(|| self.malformed(format!("missing key '{key}'")))
    }

    fn list(&self, key: &str) -> crate::Result<Vec<String>> {
        self.parsed
            .list(key)
            .ok_or_else(|| self.malformed(format!("missing key '{key}'")))
    }

    fn additional(&self, kind: RecordKind) -> BTreeMap<String, String> {
        let required = kind.required_keys();
        self.parsed
            .keys()
            .filter(|key| !required.contains(key))
            .filter_map(|key| self.parsed.text(key).map(|value| (key.to_string(), value)))
            .collect()
    }
}

/// What to do when PII is found in a record about to be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[clap(rename_all = "snake_case")]
pub enum PiiPolicy {
    /// Replace matches with typed placeholders before persisting.
    #[default]
    Redact,
    /// Persist unchanged but tag the record and audit the detection.
    Flag,
    /// Refuse the write with `SensitiveDataRejected`.
    Reject,
}

/// Which [`LockManager`](crate::storage::LockManager) backs the writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[clap(rename_all = "snake_case")]
pub enum LockStrategy {
    /// In-process lock table. Correct for a single binary with many threads.
    #[default]
    InProcess,
    /// Exclusive-create sidecar `.lock` files. Correct across processes.
    LockFile,
}

/// Controls how aggressively writes are flushed to durable storage.
///
/// Higher durability means lower risk of data loss on crash but reduced
/// write throughput (due to per-write `fsync`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DurabilityMode {
    /// `sync_all()` on the temp file and the directory before returning.
    #[default]
    Fsync,

    /// `flush()` only. Data reaches the OS page cache but may be lost on
    /// power failure. The rename is still atomic.
    FlushOnly,

    /// No explicit flush or sync. Suitable for bulk imports and tests.
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Files at or above this size are read with the streaming strategy.
    pub streaming_threshold_bytes: u64,
    /// Physical lines longer than this are truncated on read.
    pub max_line_bytes: usize,
    /// Read buffer size for streaming scans.
    pub chunk_bytes: usize,
    /// Maximum characters kept from any single field value.
    pub max_payload_chars: usize,
    pub lock_timeout_ms: u64,
    /// A lock older than this is presumed abandoned and may be taken over.
    pub stale_lock_ms: u64,
    pub lock_strategy: LockStrategy,
    pub pii_policy: PiiPolicy,
    pub audit_capacity: usize,
    /// Controls write durability. See [`DurabilityMode`] for details.
    pub durability: DurabilityMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            streaming_threshold_bytes: DEFAULT_STREAMING_THRESHOLD_BYTES,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            chunk_bytes: DEFAULT_CHUNK_BYTES,
            max_payload_chars: DEFAULT_MAX_PAYLOAD_CHARS,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            stale_lock_ms: DEFAULT_STALE_LOCK_MS,
            lock_strategy: LockStrategy::default(),
            pii_policy: PiiPolicy::default(),
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
            durability: DurabilityMode::default(),
        }
    }
}

impl Config {
    /// Load a JSON config file. Missing keys fall back to defaults.
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| crate::Error::ConfigParse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn stale_lock_after(&self) -> Duration {
        Duration::from_millis(self.stale_lock_ms)
    }
}
