//! Low-level storage primitives for append-only record files.
//!
//! This module contains crash-safe atomic writes, per-file writer locks,
//! bounded-memory line streaming and the summary index model. These are
//! building blocks; most users should go through
//! [`AicfStore`](crate::AicfStore) instead.

pub mod atomic;
pub mod file_lock;
pub mod index_file;
pub mod line_stream;
pub(crate) mod process;

pub use atomic::{StagedWrite, atomic_append, atomic_write, cleanup_stale_temp_files};
pub use file_lock::{
    InProcessLockManager, LockFileManager, LockGuard, LockInfo, LockManager, LockSettings,
    lock_manager_for,
};
pub use index_file::IndexDocument;
pub use line_stream::{LineControl, StreamOptions, StreamSummary, StreamedLine, stream_lines};
