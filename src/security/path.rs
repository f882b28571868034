//! Store-relative path validation.
//!
//! All checks except the final symlink walk are lexical, so a rejected
//! input never touches the filesystem.

use crate::error::{Error, PathViolationKind};
use std::path::{Component, Path, PathBuf};

const ILLEGAL_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

fn violation(input: &str, kind: PathViolationKind) -> Error {
    tracing::warn!(input = %input, reason = %kind, "path rejected");
    Error::PathViolation {
        input: input.to_string(),
        kind,
    }
}

fn looks_absolute(input: &str) -> bool {
    let bytes = input.as_bytes();
    let drive_letter = bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':';
    input.starts_with('/') || input.starts_with('\\') || drive_letter || Path::new(input).is_absolute()
}

fn reserved_name(segment: &str) -> Option<String> {
    let stem = segment.split('.').next().unwrap_or(segment).trim_end();
    let upper = stem.to_ascii_uppercase();
    RESERVED_NAMES
        .iter()
        .find(|name| **name == upper)
        .map(|name| name.to_string())
}

/// Lexically normalize an absolute root: drop `.` segments and resolve `..`
/// against earlier segments without consulting the filesystem.
pub(crate) fn normalize_root(root: &Path) -> Result<PathBuf, Error> {
    let absolute = if root.is_absolute() {
        root.to_path_buf()
    } else {
        std::env::current_dir()?.join(root)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

/// Resolve a caller-supplied relative path under `root`.
///
/// Fails with [`Error::PathViolation`] for empty, absolute, traversing,
/// illegal-character, reserved-name, root-escaping or symlinked inputs.
pub fn validate_path(input: &str, root: &Path) -> Result<PathBuf, Error> {
    if input.trim().is_empty() {
        return Err(violation(input, PathViolationKind::Empty));
    }

    if looks_absolute(input) {
        return Err(violation(input, PathViolationKind::Absolute));
    }

    let mut segments = Vec::new();
    for segment in input.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => return Err(violation(input, PathViolationKind::Traversal)),
            _ => {}
        }

        if let Some(c) = segment
            .chars()
            .find(|c| ILLEGAL_CHARS.contains(c) || c.is_control())
        {
            return Err(violation(input, PathViolationKind::IllegalCharacter(c)));
        }

        if let Some(name) = reserved_name(segment) {
            return Err(violation(input, PathViolationKind::ReservedName(name)));
        }

        segments.push(segment);
    }

    if segments.is_empty() {
        return Err(violation(input, PathViolationKind::Empty));
    }

    let root = normalize_root(root)?;
    let mut resolved = root.clone();
    for segment in &segments {
        resolved.push(segment);
    }

    if !resolved.starts_with(&root) || resolved == root {
        return Err(violation(input, PathViolationKind::EscapesRoot));
    }

    // Every existing component below the root must be a real entry; a
    // symlinked directory would otherwise carry the write outside `root`.
    let mut current = root;
    for segment in &segments {
        current.push(segment);
        match std::fs::symlink_metadata(&current) {
            Ok(metadata) if metadata.file_type().is_symlink() => {
                return Err(violation(input, PathViolationKind::Symlink));
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }

    Ok(resolved)
}
