use crate::audit::{AuditEntry, AuditEvent, AuditSink, MemoryAuditSink};
use crate::error::Error;
use crate::format::FieldValue;
use crate::reader::{Reader, SearchReport, StoreStats, ValidationReport};
use crate::security::path::normalize_root;
use crate::security::pii::{DetectionLogEntry, PiiScanner, PiiType};
use crate::storage::atomic::cleanup_stale_temp_files;
use crate::storage::file_lock::lock_manager_for;
use crate::storage::index_file::IndexDocument;
use crate::types::{
    Config, Consolidation, Conversation, Decision, Embedding, Insight, Memory, PiiPolicy, Record,
    RecordKind, Session, WorkState,
};
use crate::writer::{WriteReceipt, Writer};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Metadata key added to records whose text was redacted.
pub const PII_REDACTED_KEY: &str = "pii_redacted";

/// Metadata key added to records stored with detected PII under the flag policy.
pub const PII_FLAGGED_KEY: &str = "pii_flagged";

/// Records every event in the store's own buffer and forwards it to the
/// caller's sink, if any.
struct AuditFanout {
    memory: Arc<MemoryAuditSink>,
    forward: Option<Arc<dyn AuditSink>>,
}

impl AuditSink for AuditFanout {
    fn record(&self, event: AuditEvent) {
        if let Some(forward) = &self.forward {
            forward.record(event.clone());
        }
        self.memory.record(event);
    }
}

/// Summary of security activity since the store was opened.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityReport {
    pub pii_policy: PiiPolicy,
    /// Retained audit entries per event name.
    pub event_counts: BTreeMap<String, usize>,
    pub recent_events: Vec<AuditEntry>,
    pub recent_detections: Vec<DetectionLogEntry>,
}

/// The secure facade over a record store directory.
///
/// Every write passes through PII screening according to
/// [`Config::pii_policy`] before it reaches the [`Writer`]; every read goes
/// through the [`Reader`]. Security-relevant outcomes are reported to the
/// audit sink.
pub struct AicfStore {
    root: PathBuf,
    config: Config,
    reader: Reader,
    writer: Writer,
    scanner: PiiScanner,
    audit_log: Arc<MemoryAuditSink>,
    audit: Arc<dyn AuditSink>,
}

impl AicfStore {
    /// Open (or lazily create) a store with the default configuration.
    pub async fn open(path: &Path) -> Result<Self, Error> {
        Self::open_with_config(path, Config::default()).await
    }

    pub async fn open_with_config(path: &Path, config: Config) -> Result<Self, Error> {
        Self::build(path, config, None)
    }

    /// Open a store that also forwards audit events to `sink`.
    pub async fn open_with_audit(
        path: &Path,
        config: Config,
        sink: Arc<dyn AuditSink>,
    ) -> Result<Self, Error> {
        Self::build(path, config, Some(sink))
    }

    fn build(path: &Path, config: Config, forward: Option<Arc<dyn AuditSink>>) -> Result<Self, Error> {
        let root = normalize_root(path)?;

        let removed = cleanup_stale_temp_files(&root)?;
        if removed > 0 {
            tracing::info!(root = %root.display(), removed, "cleaned up temp files from interrupted writes");
        }

        let audit_log = Arc::new(MemoryAuditSink::new(config.audit_capacity));
        let audit: Arc<dyn AuditSink> = Arc::new(AuditFanout {
            memory: Arc::clone(&audit_log),
            forward,
        });
        let locks = lock_manager_for(&config, Some(Arc::clone(&audit)));

        tracing::debug!(
            root = %root.display(),
            lock_strategy = ?config.lock_strategy,
            pii_policy = ?config.pii_policy,
            "store opened"
        );

        Ok(Self {
            reader: Reader::new(&root, config.clone())?,
            writer: Writer::new(&root, config.clone(), locks)?,
            scanner: PiiScanner::new(config.audit_capacity),
            root,
            config,
            audit_log,
            audit,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Report failures that matter for security review.
    fn audit_error(&self, err: &Error) {
        match err {
            Error::PathViolation { input, kind } => self.audit.record(AuditEvent::PathViolation {
                input: input.clone(),
                reason: kind.to_string(),
            }),
            Error::LockTimeout { path, waited_ms } => self.audit.record(AuditEvent::LockTimeout {
                path: path.display().to_string(),
                waited_ms: *waited_ms,
            }),
            _ => {}
        }
    }

    fn audited<T>(&self, result: Result<T, Error>) -> Result<T, Error> {
        if let Err(e) = &result {
            self.audit_error(e);
        }
        result
    }

    /// Apply the PII policy to `texts` in place. Returns the metadata entry
    /// to attach to the record, if anything was found.
    ///
    /// `identity` values (record id and timestamp) are scanned but never
    /// rewritten: a redacted id would no longer identify the record, so any
    /// PII there refuses the write unless the policy only flags.
    fn screen(
        &self,
        file: &str,
        identity: &[&str],
        texts: Vec<&mut String>,
    ) -> Result<Option<(&'static str, String)>, Error> {
        let policy = self.config.pii_policy;
        let mut types: BTreeSet<PiiType> = BTreeSet::new();
        let mut count = 0;

        for value in identity {
            let detections = self.scanner.scan(value)?;
            count += detections.len();
            types.extend(detections.iter().map(|d| d.pii_type));
        }

        if count > 0 && policy != PiiPolicy::Flag {
            let names: Vec<String> = types.iter().map(|t| t.as_str().to_string()).collect();
            self.audit.record(AuditEvent::PiiDetected {
                file: file.to_string(),
                types: names.clone(),
                count,
                policy: format!("{policy:?}").to_lowercase(),
            });
            self.audit.record(AuditEvent::SensitiveDataRejected {
                file: file.to_string(),
                types: names.clone(),
            });
            tracing::warn!(file, types = %names.join(","), "record identifier contains PII");
            return Err(Error::SensitiveDataRejected { types: names });
        }

        for text in texts {
            match policy {
                PiiPolicy::Redact => {
                    let redaction = self.scanner.redact(text)?;
                    if !redaction.detections.is_empty() {
                        count += redaction.detections.len();
                        types.extend(redaction.types);
                        *text = redaction.text;
                    }
                }
                PiiPolicy::Flag | PiiPolicy::Reject => {
                    let detections = self.scanner.scan(text)?;
                    count += detections.len();
                    types.extend(detections.iter().map(|d| d.pii_type));
                }
            }
        }

        if count == 0 {
            return Ok(None);
        }

        let names: Vec<String> = types.iter().map(|t| t.as_str().to_string()).collect();
        self.audit.record(AuditEvent::PiiDetected {
            file: file.to_string(),
            types: names.clone(),
            count,
            policy: format!("{policy:?}").to_lowercase(),
        });

        match policy {
            PiiPolicy::Redact => {
                self.audit.record(AuditEvent::PiiRedacted {
                    file: file.to_string(),
                    types: names.clone(),
                    count,
                });
                Ok(Some((PII_REDACTED_KEY, names.join(","))))
            }
            PiiPolicy::Flag => {
                tracing::warn!(file, types = %names.join(","), count, "storing record with detected PII");
                Ok(Some((PII_FLAGGED_KEY, names.join(","))))
            }
            PiiPolicy::Reject => {
                self.audit.record(AuditEvent::SensitiveDataRejected {
                    file: file.to_string(),
                    types: names.clone(),
                });
                Err(Error::SensitiveDataRejected { types: names })
            }
        }
    }

    /// Screen and append a typed record to its kind's file.
    pub async fn write_record(&self, mut record: Record) -> Result<WriteReceipt, Error> {
        let file = record.kind().file_name();
        let (id, timestamp) = (record.id().to_string(), record.timestamp().to_string());
        if let Some((key, value)) =
            self.screen(&file, &[id.as_str(), timestamp.as_str()], record.user_text_mut())?
        {
            record.additional_mut().insert(key.to_string(), value);
        }
        self.audited(self.writer.write_record(&record))
    }

    pub async fn write_conversation(&self, conversation: Conversation) -> Result<WriteReceipt, Error> {
        self.write_record(Record::Conversation(conversation)).await
    }

    pub async fn write_decision(&self, decision: Decision) -> Result<WriteReceipt, Error> {
        self.write_record(Record::Decision(decision)).await
    }

    pub async fn write_memory(&self, memory: Memory) -> Result<WriteReceipt, Error> {
        self.write_record(Record::Memory(memory)).await
    }

    pub async fn write_work_state(&self, work_state: WorkState) -> Result<WriteReceipt, Error> {
        self.write_record(Record::WorkState(work_state)).await
    }

    pub async fn write_session(&self, session: Session) -> Result<WriteReceipt, Error> {
        self.write_record(Record::Session(session)).await
    }

    pub async fn write_embedding(&self, embedding: Embedding) -> Result<WriteReceipt, Error> {
        self.write_record(Record::Embedding(embedding)).await
    }

    pub async fn write_consolidation(&self, consolidation: Consolidation) -> Result<WriteReceipt, Error> {
        self.write_record(Record::Consolidation(consolidation)).await
    }

    pub async fn write_insight(&self, insight: Insight) -> Result<WriteReceipt, Error> {
        self.write_record(Record::Insight(insight)).await
    }

    /// Screen and append an arbitrary section. Every field value counts as
    /// caller-supplied text; `id` is screened as an identifier.
    pub async fn append_record(
        &self,
        file: &str,
        tag: &str,
        id: Option<&str>,
        mut fields: Vec<(String, FieldValue)>,
    ) -> Result<WriteReceipt, Error> {
        let texts: Vec<&mut String> = fields
            .iter_mut()
            .flat_map(|(_, value)| match value {
                FieldValue::Text(text) => vec![text],
                FieldValue::List(items) => items.iter_mut().collect(),
            })
            .collect();

        let identity: Vec<&str> = id.into_iter().collect();
        if let Some((key, value)) = self.screen(file, &identity, texts)? {
            fields.retain(|(k, _)| k != key);
            fields.push((key.to_string(), FieldValue::Text(value)));
        }
        self.audited(self.writer.append_record(file, tag, id, &fields))
    }

    /// Rewrite the summary index from the record files.
    pub async fn rebuild_index(&self) -> Result<IndexDocument, Error> {
        self.audited(self.writer.rebuild_index())
    }

    pub async fn get_index(&self) -> Result<Arc<IndexDocument>, Error> {
        self.reader.get_index()
    }

    pub async fn get_last_records(&self, kind: RecordKind, count: usize) -> Result<Vec<Record>, Error> {
        self.reader.get_last_records(kind, count)
    }

    pub async fn get_current_work_state(&self) -> Result<Option<WorkState>, Error> {
        self.reader.get_current_work_state()
    }

    pub async fn get_records_between(
        &self,
        kind: RecordKind,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<Record>, Error> {
        self.reader.get_records_between(kind, since, until)
    }

    pub async fn search(&self, term: &str, kinds: &[RecordKind], max_results: usize) -> SearchReport {
        self.reader.search(term, kinds, max_results)
    }

    pub async fn get_stats(&self) -> Result<StoreStats, Error> {
        self.reader.get_stats()
    }

    pub async fn validate_file(&self, file: &str) -> Result<ValidationReport, Error> {
        self.audited(self.reader.validate_file(file))
    }

    /// Retained audit entries, oldest first.
    pub async fn audit_entries(&self) -> Result<Vec<AuditEntry>, Error> {
        self.audit_log.entries()
    }

    pub async fn security_report(&self) -> Result<SecurityReport, Error> {
        Ok(SecurityReport {
            pii_policy: self.config.pii_policy,
            event_counts: self.audit_log.counts()?,
            recent_events: self.audit_log.entries()?,
            recent_detections: self.scanner.recent()?,
        })
    }
}
