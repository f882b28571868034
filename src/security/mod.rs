//! Validation and transformation applied to everything crossing the store
//! boundary: path checks, payload escaping, PII detection and redaction.
//!
//! These are pure functions (the [`PiiScanner`] keeps only a bounded
//! detection log) and perform no record I/O.

pub mod path;
pub mod pii;
pub mod sanitize;

pub use path::validate_path;
pub use pii::{DetectionLogEntry, PiiMatch, PiiScanner, PiiType, Redaction, detect_pii, redact_pii};
pub use sanitize::{sanitize_payload, sanitize_payload_with, unescape_payload};
