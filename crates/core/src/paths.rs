use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::PathSecurityError;

/// True when `rel` is relative and has no `..` segment.
pub fn validate_relative(rel: &str) -> bool {
    check_relative(rel).is_ok()
}

pub fn check_relative(rel: &str) -> Result<(), PathSecurityError> {
    let path = Path::new(rel);
    if rel.starts_with('/') || rel.starts_with('\\') || path.is_absolute() || path.has_root() {
        return Err(PathSecurityError::Absolute(rel.to_string()));
    }
    if path
        .components()
        .any(|component| matches!(component, Component::ParentDir))
    {
        return Err(PathSecurityError::Traversal(rel.to_string()));
    }
    Ok(())
}

/// Joins `rel` onto `base`, refusing any result that resolves outside `base`.
///
/// Validation happens before and after resolution; the second check catches symlinked
/// ancestors inside the destination tree. Nothing is created on disk.
pub fn safe_join(base: &Path, rel: &str) -> Result<PathBuf, PathSecurityError> {
    check_relative(rel)?;

    let resolved_base = resolve_lenient(base);
    let resolved = resolve_lenient(&resolved_base.join(rel));
    if !resolved.starts_with(&resolved_base) {
        return Err(PathSecurityError::Escapes {
            path: resolved,
            base: resolved_base,
        });
    }
    Ok(resolved)
}

/// Turns an arbitrary label into a single path-safe, lower-case component.
pub fn sanitize_component(name: &str) -> String {
    let cleaned = name
        .replace("..", "")
        .replace(['/', '\\'], "-")
        .to_lowercase()
        .replace(' ', "-");
    let trimmed = cleaned.trim_matches(|ch| ch == '-' || ch == '.');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Identity used for cross-tier deduplication: symlink-resolved and case-folded.
pub fn location_key(path: &Path) -> String {
    let resolved = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    resolved.to_string_lossy().to_lowercase()
}

/// Canonicalizes the deepest existing ancestor and re-appends the remaining components.
pub(crate) fn resolve_lenient(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut pending = Vec::new();
    let mut cursor = absolute.as_path();
    loop {
        if let Ok(resolved) = fs::canonicalize(cursor) {
            return pending
                .iter()
                .rev()
                .fold(resolved, |acc: PathBuf, part| acc.join(part));
        }
        match (cursor.parent(), cursor.file_name()) {
            (Some(parent), Some(name)) => {
                pending.push(name.to_os_string());
                cursor = parent;
            }
            _ => return normalize_lexically(&absolute),
        }
    }
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
