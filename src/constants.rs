/// Application name, used for the CLI binary and log targets.
pub const APP_NAME: &str = "aicf";

/// Default directory name for a record store.
pub const DEFAULT_STORE_DIR: &str = ".aicf";

/// Extension shared by every record file and the index.
pub const RECORD_EXTENSION: &str = "aicf";

/// Filename for the derived summary index within a store directory.
pub const INDEX_FILENAME: &str = "index.aicf";

/// Format version written into the index `METADATA` section.
pub const FORMAT_VERSION: &str = "3.0";

/// Index section holding store-level metadata.
pub(crate) const INDEX_METADATA_SECTION: &str = "METADATA";

/// Index section holding the most recent write.
pub(crate) const INDEX_STATE_SECTION: &str = "STATE";

/// Prefix of index sections for files that are not one of the record kinds.
pub(crate) const GENERIC_SECTION_PREFIX: &str = "FILE_";

/// Suffix appended to a record file path to build its sidecar lock file.
pub(crate) const LOCK_SUFFIX: &str = ".lock";

/// Suffix used for staged temp files during atomic writes.
pub(crate) const TEMP_SUFFIX: &str = ".tmp";

pub const DEFAULT_MAX_PAYLOAD_CHARS: usize = 10_000;
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;
pub const DEFAULT_CHUNK_BYTES: usize = 64 * 1024;
pub const DEFAULT_STREAMING_THRESHOLD_BYTES: u64 = 1024 * 1024;
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_STALE_LOCK_MS: u64 = 30_000;
pub const DEFAULT_AUDIT_CAPACITY: usize = 1_000;

/// Number of trailing lines kept as context for each search hit.
pub const SEARCH_CONTEXT_LINES: usize = 3;
