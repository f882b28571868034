//! # aicf-store
//!
//! A file-based, append-only record store for AI context: conversations,
//! decisions, memories, work state, sessions, embeddings, consolidations
//! and insights, kept as human-diffable text that can be committed next to
//! the project it describes.
//!
//! ## Key features
//!
//! - **Diffable** — one UTF-8 text file per record kind; records are only
//!   ever appended, so history reads cleanly in version control.
//! - **Crash-safe** — every append is staged in a temp file and published
//!   with an atomic rename.
//! - **Concurrent** — per-file writer locks, either in-process or with
//!   cross-process `.lock` sidecar files, with stale-lock recovery.
//! - **Bounded memory** — large files are read with chunked streaming and
//!   a ring buffer instead of being loaded whole.
//! - **Defensive** — path validation, delimiter escaping and PII
//!   redaction run on every write, with an audit trail.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use aicf_store::{AicfStore, Conversation, RecordKind};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), aicf_store::Error> {
//! let store = AicfStore::open(Path::new(".aicf")).await?;
//!
//! let receipt = store
//!     .write_conversation(Conversation::new("user", "Switch the reader to streaming"))
//!     .await?;
//! println!("stored at line {}", receipt.line_number);
//!
//! for record in store.get_last_records(RecordKind::Conversation, 5).await? {
//!     println!("{} {}", record.timestamp(), record.id());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Storage format
//!
//! A store is a directory containing:
//!
//! | File                  | Purpose                                   |
//! |-----------------------|-------------------------------------------|
//! | `conversations.aicf`  | One file per record kind (8 in total)     |
//! | `index.aicf`          | Advisory summary index, rebuildable       |
//! | `*.aicf.lock`         | Writer lock sidecars (lock-file strategy) |
//!
//! Each record starts with a numbered section marker (`12|@MEMORY:id`)
//! followed by unnumbered `key=value` lines. See [`format`] for the grammar.

pub mod api;
pub mod audit;
pub mod constants;
pub mod error;
pub mod format;
pub mod reader;
pub mod security;
pub mod storage;
pub mod types;
pub mod writer;

pub use api::{AicfStore, SecurityReport};
pub use audit::{AuditEntry, AuditEvent, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use constants::{APP_NAME, DEFAULT_STORE_DIR, INDEX_FILENAME};
pub use error::{Error, PathViolationKind, Result, lock_mutex};
pub use format::{FieldValue, ParsedRecord, compile_record, parse_line, parse_section};
pub use reader::{Reader, SearchHit, SearchReport, StoreStats, ValidationReport};
pub use types::{
    Config, Consolidation, Conversation, Decision, DurabilityMode, Embedding, Insight,
    LockStrategy, Memory, PiiPolicy, Record, RecordKind, Session, WorkState,
};
pub use writer::{WriteReceipt, Writer};
