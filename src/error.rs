use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// Why a caller-supplied path was refused by [`validate_path`](crate::security::validate_path).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathViolationKind {
    Empty,
    Absolute,
    Traversal,
    IllegalCharacter(char),
    ReservedName(String),
    EscapesRoot,
    Symlink,
}

impl std::fmt::Display for PathViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathViolationKind::Empty => write!(f, "empty path"),
            PathViolationKind::Absolute => write!(f, "absolute paths are not allowed"),
            PathViolationKind::Traversal => write!(f, "parent directory traversal"),
            PathViolationKind::IllegalCharacter(c) => write!(f, "illegal character {c:?}"),
            PathViolationKind::ReservedName(name) => write!(f, "reserved device name {name}"),
            PathViolationKind::EscapesRoot => write!(f, "resolved path escapes the store root"),
            PathViolationKind::Symlink => write!(f, "path is a symbolic link"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Path violation for {input:?}: {kind}")]
    PathViolation {
        input: String,
        kind: PathViolationKind,
    },

    #[error("Timed out after {waited_ms}ms waiting for lock on {}", path.display())]
    LockTimeout { path: PathBuf, waited_ms: u64 },

    #[error("Sensitive data rejected by policy: {}", types.join(", "))]
    SensitiveDataRejected { types: Vec<String> },

    #[error("Malformed record in {} at line {line}: {reason}", file.display())]
    MalformedRecord {
        file: PathBuf,
        line: u64,
        reason: String,
    },

    #[error("Invalid field {name:?}: {reason}")]
    InvalidField { name: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to parse config {}: {reason}", path.display())]
    ConfigParse { path: PathBuf, reason: String },

    #[error("Lock error")]
    Lock,
}

impl Error {
    /// True when retrying the same call may succeed without changing input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::LockTimeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Lock a mutex, converting a poisoned-lock panic into `Error::Lock`.
pub fn lock_mutex<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| Error::Lock)
}
