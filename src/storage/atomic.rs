//! Crash-safe file replacement.
//!
//! Every mutation is staged in a sibling temp file and published with a
//! single `rename`. A crash at any point leaves either the old file or the
//! new file, never a mix. Temp files orphaned by a crash carry the writer's
//! pid in their name so a later [`cleanup_stale_temp_files`] can tell them
//! apart from temps that a live writer is still filling.

use crate::constants::TEMP_SUFFIX;
use crate::storage::process::is_process_alive;
use crate::types::DurabilityMode;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// A fully written temp file waiting to replace `target`.
///
/// Dropping a `StagedWrite` without calling [`commit`](Self::commit)
/// removes the temp file and leaves `target` untouched.
#[derive(Debug)]
pub struct StagedWrite {
    target: PathBuf,
    temp: PathBuf,
    durability: DurabilityMode,
    committed: bool,
}

impl StagedWrite {
    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp
    }

    /// Publish the staged content by renaming it over the target.
    pub fn commit(mut self) -> crate::Result<()> {
        std::fs::rename(&self.temp, &self.target)?;
        self.committed = true;

        if self.durability == DurabilityMode::Fsync {
            sync_parent_dir(&self.target)?;
        }
        Ok(())
    }
}

impl Drop for StagedWrite {
    fn drop(&mut self) {
        if !self.committed {
            // Best-effort cleanup; the target was never touched.
            let _ = std::fs::remove_file(&self.temp);
        }
    }
}

/// Temp path next to `target`: `.{name}.{pid}-{nonce}.tmp`.
fn temp_path_for(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let nonce = uuid::Uuid::new_v4().as_u128() as u32;
    target.with_file_name(format!(
        ".{name}.{}-{nonce:08x}{TEMP_SUFFIX}",
        std::process::id()
    ))
}

/// Parse the writer pid back out of a temp filename.
fn temp_owner_pid(file_name: &str) -> Option<u32> {
    let rest = file_name.strip_prefix('.')?.strip_suffix(TEMP_SUFFIX)?;
    let (_, tail) = rest.rsplit_once('.')?;
    let (pid, nonce) = tail.split_once('-')?;
    if nonce.len() != 8 || !nonce.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    pid.parse().ok()
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let dir_file = OpenOptions::new().read(true).open(parent)?;
    dir_file.sync_all()
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}

fn finish(file: &mut File, durability: DurabilityMode) -> io::Result<()> {
    match durability {
        DurabilityMode::Fsync => {
            file.flush()?;
            file.sync_all()
        }
        DurabilityMode::FlushOnly => file.flush(),
        DurabilityMode::None => Ok(()),
    }
}

fn stage<F>(target: &Path, durability: DurabilityMode, fill: F) -> crate::Result<StagedWrite>
where
    F: FnOnce(&mut File) -> io::Result<()>,
{
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let staged = StagedWrite {
        target: target.to_path_buf(),
        temp: temp_path_for(target),
        durability,
        committed: false,
    };

    let mut temp_file = OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&staged.temp)?;

    fill(&mut temp_file)?;
    finish(&mut temp_file, durability)?;

    if let Ok(metadata) = std::fs::metadata(target) {
        // Keep the target's permissions across the rename.
        let _ = std::fs::set_permissions(&staged.temp, metadata.permissions());
    }

    Ok(staged)
}

/// Stage `existing content + content` in a temp file without touching
/// `target`. The original is stream-copied, not loaded into memory.
pub fn stage_append(
    target: &Path,
    content: &[u8],
    durability: DurabilityMode,
) -> crate::Result<StagedWrite> {
    stage(target, durability, |temp| {
        match File::open(target) {
            Ok(mut original) => {
                io::copy(&mut original, temp)?;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        temp.write_all(content)
    })
}

/// Stage a full replacement of `target`.
pub fn stage_write(
    target: &Path,
    content: &[u8],
    durability: DurabilityMode,
) -> crate::Result<StagedWrite> {
    stage(target, durability, |temp| temp.write_all(content))
}

/// Append `content` to `target` atomically.
pub fn atomic_append(target: &Path, content: &[u8], durability: DurabilityMode) -> crate::Result<()> {
    stage_append(target, content, durability)?.commit()
}

/// Replace `target` with `content` atomically.
pub fn atomic_write(target: &Path, content: &[u8], durability: DurabilityMode) -> crate::Result<()> {
    stage_write(target, content, durability)?.commit()
}

/// Remove temp files left behind by writers that are no longer running.
///
/// Walks `root` recursively. Returns the number of files removed.
pub fn cleanup_stale_temp_files(root: &Path) -> crate::Result<usize> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let path = entry.path();

        if file_type.is_dir() {
            removed += cleanup_stale_temp_files(&path)?;
            continue;
        }
        if !file_type.is_file() {
            continue;
        }

        let name = entry.file_name();
        let Some(pid) = temp_owner_pid(&name.to_string_lossy()) else {
            continue;
        };

        if is_process_alive(pid) {
            tracing::debug!(path = %path.display(), pid, "keeping temp file of live writer");
            continue;
        }

        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(path = %path.display(), pid, "removed orphaned temp file");
                removed += 1;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove orphaned temp file");
            }
        }
    }

    Ok(removed)
}
