//! Path sandboxing.
//!
//! Every relative path that reaches the store passes through [`resolve`] before
//! anything touches disk. Resolution is purely lexical (no symlink following),
//! so it works for paths that do not exist yet.

use std::path::{Component, Path, PathBuf};

use path_absolutize::Absolutize;

use crate::error::{StoreError, StoreResult};

/// Normalize a client-supplied relative path: backslashes become `/`, leading
/// separators and empty segments are dropped.
pub fn normalize_rel(rel: &str) -> String {
    rel.replace('\\', "/")
        .split('/')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Split a normalized relative path into its segments.
pub fn segments(rel: &str) -> Vec<&str> {
    rel.split('/').filter(|s| !s.is_empty()).collect()
}

/// Join `rel` under `root` and confine the result to `root`.
///
/// `root` must already be absolute and normalized (see `StoreConfig::absolutized`).
/// Fails with `PathEscape` unless the normalized result equals `root` or lies below it.
pub fn resolve(root: &Path, rel: &str) -> StoreResult<PathBuf> {
    let rel = normalize_rel(rel);
    if rel.is_empty() {
        return Ok(root.to_path_buf());
    }
    // Drive prefixes or roots inside a "relative" path are never legitimate.
    if Path::new(&rel).components().any(|c| matches!(c, Component::Prefix(_) | Component::RootDir)) {
        return Err(StoreError::PathEscape);
    }
    let joined = root.join(&rel);
    let normalized = joined
        .absolutize_from(root)
        .map_err(|e| StoreError::io("resolve path", e))?
        .to_path_buf();
    if normalized == root || normalized.starts_with(root) {
        Ok(normalized)
    } else {
        Err(StoreError::PathEscape)
    }
}

/// Express an absolute path under `root` as a `/`-separated relative path.
pub fn relative_to(root: &Path, abs: &Path) -> String {
    abs.strip_prefix(root)
        .map(|p| {
            p.components()
                .filter_map(|c| match c {
                    Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("/")
        })
        .unwrap_or_default()
}
