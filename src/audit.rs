//! Security audit trail.
//!
//! The store reports security-relevant events to an injected [`AuditSink`].
//! [`MemoryAuditSink`] keeps the most recent entries in a bounded ring
//! buffer; [`TracingAuditSink`] forwards them to `tracing` under the
//! `aicf::audit` target.

use crate::constants::DEFAULT_AUDIT_CAPACITY;
use crate::error::lock_mutex;
use crate::types::now_rfc3339;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

/// Security-relevant events raised by the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    PiiDetected {
        file: String,
        types: Vec<String>,
        count: usize,
        policy: String,
    },
    PiiRedacted {
        file: String,
        types: Vec<String>,
        count: usize,
    },
    SensitiveDataRejected {
        file: String,
        types: Vec<String>,
    },
    PathViolation {
        input: String,
        reason: String,
    },
    StaleLockRecovered {
        path: String,
        previous_owner: String,
        age_ms: u64,
    },
    LockTimeout {
        path: String,
        waited_ms: u64,
    },
}

impl AuditEvent {
    /// Return the snake_case event name (matches the serde tag).
    pub fn event_name(&self) -> &'static str {
        match self {
            AuditEvent::PiiDetected { .. } => "pii_detected",
            AuditEvent::PiiRedacted { .. } => "pii_redacted",
            AuditEvent::SensitiveDataRejected { .. } => "sensitive_data_rejected",
            AuditEvent::PathViolation { .. } => "path_violation",
            AuditEvent::StaleLockRecovered { .. } => "stale_lock_recovered",
            AuditEvent::LockTimeout { .. } => "lock_timeout",
        }
    }
}

/// A single recorded audit event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    /// RFC 3339 timestamp.
    pub ts: String,
    /// Snake-case event name.
    pub event: String,
    /// Event-specific payload.
    pub data: Value,
}

impl AuditEntry {
    pub fn new(event: &AuditEvent) -> Self {
        Self {
            ts: now_rfc3339(),
            event: event.event_name().to_string(),
            data: serde_json::to_value(event).unwrap_or(Value::Null),
        }
    }
}

/// Destination for audit events. Implementations must not block for long;
/// events are raised from inside write paths.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Bounded in-memory audit log. When full, the oldest entry is evicted.
#[derive(Debug)]
pub struct MemoryAuditSink {
    entries: Mutex<VecDeque<AuditEntry>>,
    capacity: usize,
}

impl MemoryAuditSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_AUDIT_CAPACITY))),
            capacity: capacity.max(1),
        }
    }

    /// Snapshot of the retained entries, oldest first.
    pub fn entries(&self) -> crate::Result<Vec<AuditEntry>> {
        Ok(lock_mutex(&self.entries)?.iter().cloned().collect())
    }

    pub fn len(&self) -> usize {
        lock_mutex(&self.entries).map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of retained entries per event name.
    pub fn counts(&self) -> crate::Result<BTreeMap<String, usize>> {
        let entries = lock_mutex(&self.entries)?;
        let mut counts = BTreeMap::new();
        for entry in entries.iter() {
            *counts.entry(entry.event.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAPACITY)
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        let entry = AuditEntry::new(&event);
        match self.entries.lock() {
            Ok(mut entries) => {
                if entries.len() >= self.capacity {
                    entries.pop_front();
                }
                entries.push_back(entry);
            }
            Err(_) => tracing::warn!(event = entry.event, "audit buffer poisoned, dropping event"),
        }
    }
}

/// Forwards audit events to `tracing` as structured JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        let entry = AuditEntry::new(&event);
        tracing::info!(target: "aicf::audit", event = entry.event, data = %entry.data, "audit");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn violation(i: usize) -> AuditEvent {
        AuditEvent::PathViolation {
            input: format!("../{i}"),
            reason: "parent directory traversal".to_string(),
        }
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = AuditEvent::StaleLockRecovered {
            path: "conversations.aicf".to_string(),
            previous_owner: "42:ThreadId(1)".to_string(),
            age_ms: 31_000,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "stale_lock_recovered");
        assert_eq!(value["age_ms"], 31_000);

        let entry = AuditEntry::new(&event);
        assert_eq!(entry.event, event.event_name());
        assert_eq!(entry.data, value);
    }

    #[test]
    fn test_memory_sink_evicts_oldest() {
        let sink = MemoryAuditSink::new(3);
        for i in 0..5 {
            sink.record(violation(i));
        }

        let entries = sink.entries().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].data["input"], "../2");
        assert_eq!(entries[2].data["input"], "../4");
    }

    #[test]
    fn test_counts_group_by_event_name() {
        let sink = MemoryAuditSink::default();
        sink.record(violation(0));
        sink.record(violation(1));
        sink.record(AuditEvent::LockTimeout {
            path: "memories.aicf".to_string(),
            waited_ms: 5000,
        });

        let counts = sink.counts().unwrap();
        assert_eq!(counts.get("path_violation"), Some(&2));
        assert_eq!(counts.get("lock_timeout"), Some(&1));
    }
}
