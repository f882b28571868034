//! Per-file writer locks.
//!
//! Two interchangeable strategies sit behind the [`LockManager`] trait:
//!
//! - [`InProcessLockManager`]: a lock table inside the process. Cheap, but
//!   only excludes writers that share the same manager instance.
//! - [`LockFileManager`]: an exclusive-create `<file>.lock` sidecar holding
//!   the owner as JSON. Excludes writers across processes.
//!
//! Both hand out an RAII [`LockGuard`] that releases on drop, and both
//! treat a holder older than the stale age as abandoned.

use crate::audit::{AuditEvent, AuditSink};
use crate::constants::LOCK_SUFFIX;
use crate::error::{Error, lock_mutex};
use crate::storage::process::{current_owner, is_process_alive};
use crate::types::{Config, LockStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_millis(250);
const DEFAULT_MAX_ATTEMPTS: u32 = 100;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Compute the `.lock` sidecar path for a given file path.
pub(crate) fn lock_path_for(path: &Path) -> PathBuf {
    let mut lock = path.as_os_str().to_os_string();
    lock.push(LOCK_SUFFIX);
    lock.into()
}

/// Who holds a lock and since when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub lock_id: String,
    /// `pid:thread` of the holder.
    pub owner: String,
    pub pid: u32,
    pub acquired_at_ms: u64,
}

impl LockInfo {
    fn for_current_thread() -> Self {
        Self {
            lock_id: uuid::Uuid::new_v4().to_string(),
            owner: current_owner(),
            pid: std::process::id(),
            acquired_at_ms: now_ms(),
        }
    }

    pub fn age_ms(&self) -> u64 {
        now_ms().saturating_sub(self.acquired_at_ms)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LockSettings {
    pub timeout: Duration,
    pub stale_after: Duration,
    pub poll_interval: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for LockSettings {
    fn from(config: &Config) -> Self {
        Self {
            timeout: config.lock_timeout(),
            stale_after: config.stale_lock_after(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Serializes writers per file path.
pub trait LockManager: Send + Sync {
    /// Block until `path` is free (or its holder is stale) and claim it.
    fn acquire(&self, path: &Path) -> crate::Result<LockGuard<'_>>;

    /// Release a claim. Does nothing unless `info` is the current holder.
    fn release(&self, path: &Path, info: &LockInfo) -> crate::Result<()>;

    fn strategy(&self) -> LockStrategy;
}

/// RAII guard returned by [`LockManager::acquire`].
pub struct LockGuard<'a> {
    manager: &'a dyn LockManager,
    path: PathBuf,
    info: LockInfo,
}

impl LockGuard<'_> {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self) -> &LockInfo {
        &self.info
    }
}

impl std::fmt::Debug for LockGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("path", &self.path)
            .field("info", &self.info)
            .finish()
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.manager.release(&self.path, &self.info) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release lock");
        }
    }
}

fn report_stale(audit: Option<&Arc<dyn AuditSink>>, path: &Path, holder: &LockInfo, age_ms: u64) {
    tracing::warn!(
        path = %path.display(),
        previous_owner = %holder.owner,
        age_ms,
        "recovering stale lock"
    );
    if let Some(audit) = audit {
        audit.record(AuditEvent::StaleLockRecovered {
            path: path.display().to_string(),
            previous_owner: holder.owner.clone(),
            age_ms,
        });
    }
}

fn timeout_error(path: &Path, started: Instant) -> Error {
    let waited_ms = started.elapsed().as_millis() as u64;
    tracing::debug!(path = %path.display(), waited_ms, "lock acquisition timed out");
    Error::LockTimeout {
        path: path.to_path_buf(),
        waited_ms,
    }
}

/// Lock table shared by every writer in this process.
pub struct InProcessLockManager {
    table: Mutex<HashMap<PathBuf, LockInfo>>,
    settings: LockSettings,
    audit: Option<Arc<dyn AuditSink>>,
}

impl InProcessLockManager {
    pub fn new(settings: LockSettings) -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            settings,
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Current holder of `path`, if any.
    pub fn holder(&self, path: &Path) -> crate::Result<Option<LockInfo>> {
        Ok(lock_mutex(&self.table)?.get(path).cloned())
    }
}

impl Default for InProcessLockManager {
    fn default() -> Self {
        Self::new(LockSettings::default())
    }
}

impl LockManager for InProcessLockManager {
    fn acquire(&self, path: &Path) -> crate::Result<LockGuard<'_>> {
        let started = Instant::now();
        let stale_ms = self.settings.stale_after.as_millis() as u64;

        loop {
            {
                let mut table = lock_mutex(&self.table)?;
                let claimable = match table.get(path) {
                    None => true,
                    Some(holder) => {
                        let age_ms = holder.age_ms();
                        if age_ms >= stale_ms {
                            report_stale(self.audit.as_ref(), path, holder, age_ms);
                            true
                        } else {
                            false
                        }
                    }
                };

                if claimable {
                    let info = LockInfo::for_current_thread();
                    table.insert(path.to_path_buf(), info.clone());
                    tracing::debug!(path = %path.display(), lock_id = %info.lock_id, "lock acquired");
                    return Ok(LockGuard {
                        manager: self,
                        path: path.to_path_buf(),
                        info,
                    });
                }
            }

            if started.elapsed() >= self.settings.timeout {
                return Err(timeout_error(path, started));
            }
            std::thread::sleep(self.settings.poll_interval);
        }
    }

    fn release(&self, path: &Path, info: &LockInfo) -> crate::Result<()> {
        let mut table = lock_mutex(&self.table)?;
        let is_holder = table
            .get(path)
            .is_some_and(|held| held.lock_id == info.lock_id && held.owner == info.owner);
        if is_holder {
            table.remove(path);
            tracing::debug!(path = %path.display(), lock_id = %info.lock_id, "lock released");
        } else {
            tracing::debug!(path = %path.display(), lock_id = %info.lock_id, "lock already taken over");
        }
        Ok(())
    }

    fn strategy(&self) -> LockStrategy {
        LockStrategy::InProcess
    }
}

/// Cross-process locks backed by exclusive-create sidecar files.
pub struct LockFileManager {
    settings: LockSettings,
    max_attempts: u32,
    audit: Option<Arc<dyn AuditSink>>,
}

impl LockFileManager {
    pub fn new(settings: LockSettings) -> Self {
        Self {
            settings,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    fn read_holder(lock_path: &Path) -> io::Result<Option<LockInfo>> {
        let content = std::fs::read_to_string(lock_path)?;
        Ok(serde_json::from_str(&content).ok())
    }

    /// Remove the sidecar if its holder is dead or stale. Returns whether
    /// the caller should retry immediately.
    ///
    /// Recovery is heuristic. The holder is re-read before removal, but the
    /// re-read and `remove_file` are two steps: a sidecar another waiter
    /// creates between them can still be deleted, letting two writers
    /// proceed. The window is a few syscalls wide and only opens while a
    /// dead or stale holder is being reclaimed.
    fn try_recover(&self, path: &Path, lock_path: &Path) -> crate::Result<bool> {
        let stale_ms = self.settings.stale_after.as_millis() as u64;

        let holder = match Self::read_holder(lock_path) {
            Ok(holder) => holder,
            // Released between our create attempt and this read.
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        };

        let (holder, age_ms, dead) = match holder {
            Some(info) => {
                let age_ms = info.age_ms();
                let dead = !is_process_alive(info.pid);
                (info, age_ms, dead)
            }
            None => {
                // Unreadable content: either mid-write or corrupt. Judge by mtime.
                let age_ms = std::fs::metadata(lock_path)
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|t| t.elapsed().ok())
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0);
                let unknown = LockInfo {
                    lock_id: String::new(),
                    owner: "unknown".to_string(),
                    pid: 0,
                    acquired_at_ms: 0,
                };
                (unknown, age_ms, false)
            }
        };

        if !dead && age_ms < stale_ms {
            return Ok(false);
        }

        // Only remove the sidecar we inspected; another waiter may have
        // replaced it in the meantime.
        if let Ok(Some(current)) = Self::read_holder(lock_path) {
            if current.lock_id != holder.lock_id {
                return Ok(true);
            }
        }

        match std::fs::remove_file(lock_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        report_stale(self.audit.as_ref(), path, &holder, age_ms);
        Ok(true)
    }
}

impl Default for LockFileManager {
    fn default() -> Self {
        Self::new(LockSettings::default())
    }
}

impl LockManager for LockFileManager {
    fn acquire(&self, path: &Path) -> crate::Result<LockGuard<'_>> {
        let lock_path = lock_path_for(path);
        if let Some(parent) = lock_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let started = Instant::now();
        let mut backoff = self.settings.poll_interval;
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(mut file) => {
                    let info = LockInfo::for_current_thread();
                    let written = serde_json::to_vec(&info)
                        .map_err(io::Error::other)
                        .and_then(|body| file.write_all(&body))
                        .and_then(|()| file.flush());
                    if let Err(e) = written {
                        let _ = std::fs::remove_file(&lock_path);
                        return Err(e.into());
                    }
                    tracing::debug!(path = %path.display(), lock_id = %info.lock_id, "lock file acquired");
                    return Ok(LockGuard {
                        manager: self,
                        path: path.to_path_buf(),
                        info,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if self.try_recover(path, &lock_path)? && attempts < self.max_attempts {
                        continue;
                    }
                }
                Err(e) => return Err(e.into()),
            }

            let waited = started.elapsed();
            if waited >= self.settings.timeout || attempts >= self.max_attempts {
                return Err(timeout_error(path, started));
            }
            std::thread::sleep(backoff.min(self.settings.timeout - waited));
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    fn release(&self, path: &Path, info: &LockInfo) -> crate::Result<()> {
        let lock_path = lock_path_for(path);
        match Self::read_holder(&lock_path) {
            Ok(Some(current)) if current.lock_id == info.lock_id => {
                std::fs::remove_file(&lock_path)?;
                tracing::debug!(path = %path.display(), lock_id = %info.lock_id, "lock file released");
            }
            Ok(_) => {
                tracing::debug!(path = %path.display(), lock_id = %info.lock_id, "lock file owned by another writer");
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    fn strategy(&self) -> LockStrategy {
        LockStrategy::LockFile
    }
}

/// Build the lock manager selected by `config.lock_strategy`.
pub fn lock_manager_for(config: &Config, audit: Option<Arc<dyn AuditSink>>) -> Arc<dyn LockManager> {
    let settings = LockSettings::from(config);
    match config.lock_strategy {
        LockStrategy::InProcess => {
            let manager = InProcessLockManager::new(settings);
            Arc::new(match audit {
                Some(audit) => manager.with_audit(audit),
                None => manager,
            })
        }
        LockStrategy::LockFile => {
            let manager = LockFileManager::new(settings);
            Arc::new(match audit {
                Some(audit) => manager.with_audit(audit),
                None => manager,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_settings(timeout_ms: u64, stale_ms: u64) -> LockSettings {
        LockSettings {
            timeout: Duration::from_millis(timeout_ms),
            stale_after: Duration::from_millis(stale_ms),
            poll_interval: Duration::from_millis(1),
        }
    }

    fn assert_mutual_exclusion(manager: Arc<dyn LockManager>, path: PathBuf) {
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                let inside = Arc::clone(&inside);
                let max_seen = Arc::clone(&max_seen);
                let path = path.clone();
                std::thread::spawn(move || {
                    for _ in 0..20 {
                        let _guard = manager.acquire(&path).unwrap();
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        std::thread::yield_now();
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_in_process_mutual_exclusion() {
        let manager: Arc<dyn LockManager> =
            Arc::new(InProcessLockManager::new(fast_settings(10_000, 60_000)));
        assert_mutual_exclusion(manager, PathBuf::from("/store/conversations.aicf"));
    }

    #[test]
    fn test_lock_file_mutual_exclusion() {
        let dir = tempfile::tempdir().unwrap();
        let manager: Arc<dyn LockManager> = Arc::new(
            LockFileManager::new(fast_settings(10_000, 60_000)).with_max_attempts(100_000),
        );
        let path = dir.path().join("decisions.aicf");
        assert_mutual_exclusion(manager, path.clone());
        assert!(!lock_path_for(&path).exists());
    }

    #[test]
    fn test_in_process_timeout_is_retryable() {
        let manager = InProcessLockManager::new(fast_settings(30, 60_000));
        let path = Path::new("/store/memories.aicf");
        let _held = manager.acquire(path).unwrap();

        let err = manager.acquire(path).unwrap_err();
        assert!(matches!(err, Error::LockTimeout { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_stale_holder_is_taken_over_and_audited() {
        let audit = Arc::new(MemoryAuditSink::default());
        let manager = InProcessLockManager::new(fast_settings(1_000, 20))
            .with_audit(Arc::clone(&audit) as Arc<dyn AuditSink>);
        let path = Path::new("/store/sessions.aicf");

        let first = manager.acquire(path).unwrap();
        std::thread::sleep(Duration::from_millis(40));
        let second = manager.acquire(path).unwrap();
        assert_ne!(first.info().lock_id, second.info().lock_id);

        // The abandoned holder must not release the new holder's claim.
        drop(first);
        let holder = manager.holder(path).unwrap().unwrap();
        assert_eq!(holder.lock_id, second.info().lock_id);

        let counts = audit.counts().unwrap();
        assert_eq!(counts.get("stale_lock_recovered"), Some(&1));

        drop(second);
        assert!(manager.holder(path).unwrap().is_none());
    }

    #[test]
    fn test_lock_file_release_requires_matching_id() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LockFileManager::new(fast_settings(100, 60_000));
        let path = dir.path().join("insights.aicf");

        let guard = manager.acquire(&path).unwrap();
        let sidecar = lock_path_for(&path);
        assert!(sidecar.exists());

        let stranger = LockInfo::for_current_thread();
        manager.release(&path, &stranger).unwrap();
        assert!(sidecar.exists());

        drop(guard);
        assert!(!sidecar.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_lock_file_of_dead_process_is_recovered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("work-state.aicf");
        let abandoned = LockInfo {
            lock_id: "abandoned".to_string(),
            owner: format!("{}:ThreadId(1)", i32::MAX),
            pid: i32::MAX as u32,
            acquired_at_ms: now_ms(),
        };
        std::fs::write(lock_path_for(&path), serde_json::to_vec(&abandoned).unwrap()).unwrap();

        let audit = Arc::new(MemoryAuditSink::default());
        let manager = LockFileManager::new(fast_settings(200, 60_000))
            .with_audit(Arc::clone(&audit) as Arc<dyn AuditSink>);
        let guard = manager.acquire(&path).unwrap();
        assert_ne!(guard.info().lock_id, "abandoned");
        assert_eq!(audit.len(), 1);
    }

    #[test]
    fn test_live_lock_file_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("embeddings.aicf");
        let manager = LockFileManager::new(fast_settings(40, 60_000));

        let _held = manager.acquire(&path).unwrap();
        assert!(matches!(
            manager.acquire(&path),
            Err(Error::LockTimeout { .. })
        ));
    }

    #[test]
    fn test_factory_honours_strategy() {
        let mut config = Config::default();
        assert_eq!(lock_manager_for(&config, None).strategy(), LockStrategy::InProcess);
        config.lock_strategy = LockStrategy::LockFile;
        assert_eq!(lock_manager_for(&config, None).strategy(), LockStrategy::LockFile);
    }
}
