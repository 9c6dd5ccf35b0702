//!
//! folio snapshot generator
//! -------------------------
//! Walks the storage root into the JSON tree clients read to learn the current
//! structure. The snapshot is derived and disposable: every call recomputes the
//! whole tree and replaces the previous document in full.
//!
//! Ignore rules (hidden entries, transient directory patterns, junk files,
//! symlinks) apply only here; ignored entries stay on disk.

use std::cmp::Ordering;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{IgnorePolicy, StabilizeConfig};
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SnapshotNode {
    Folder {
        name: String,
        path: String,
        children: Vec<SnapshotNode>,
    },
    File {
        name: String,
        path: String,
        size: u64,
        /// Epoch milliseconds.
        #[serde(rename = "modifiedTime")]
        modified_time: i64,
    },
}

impl SnapshotNode {
    pub fn name(&self) -> &str {
        match self {
            SnapshotNode::Folder { name, .. } | SnapshotNode::File { name, .. } => name,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            SnapshotNode::Folder { path, .. } | SnapshotNode::File { path, .. } => path,
        }
    }

    pub fn is_folder(&self) -> bool { matches!(self, SnapshotNode::Folder { .. }) }
}

/// Find a node by its relative path anywhere in a snapshot tree.
pub fn find<'a>(nodes: &'a [SnapshotNode], rel: &str) -> Option<&'a SnapshotNode> {
    for n in nodes {
        if n.path() == rel {
            return Some(n);
        }
        if let SnapshotNode::Folder { children, .. } = n {
            if let Some(hit) = find(children, rel) {
                return Some(hit);
            }
        }
    }
    None
}

impl IgnorePolicy {
    pub fn ignores_dir(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        if self.hidden && lower.starts_with('.') {
            return true;
        }
        self.dir_patterns.iter().any(|p| {
            let p = p.to_lowercase();
            lower == p || lower.starts_with(&format!("{p}-")) || lower.ends_with(&format!("-{p}"))
        })
    }

    pub fn ignores_file(&self, name: &str) -> bool {
        if self.hidden && name.starts_with('.') {
            return true;
        }
        let lower = name.to_lowercase();
        self.junk_files.iter().any(|j| j.eq_ignore_ascii_case(&lower))
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotGenerator {
    root: PathBuf,
    output: PathBuf,
    ignore: IgnorePolicy,
    stabilize: StabilizeConfig,
}

impl SnapshotGenerator {
    pub fn new(root: PathBuf, output: PathBuf, ignore: IgnorePolicy, stabilize: StabilizeConfig) -> Self {
        Self { root, output, ignore, stabilize }
    }

    pub fn output_path(&self) -> &Path { &self.output }

    /// Walk the storage root into a tree without writing anything.
    pub async fn build(&self) -> StoreResult<Vec<SnapshotNode>> {
        let root = self.root.clone();
        let ignore = self.ignore.clone();
        tokio::task::spawn_blocking(move || walk(&root, &root, &ignore))
            .await
            .map_err(|e| StoreError::io("walk storage root", io::Error::other(e)))?
            .map_err(|e| StoreError::io("walk storage root", e))
    }

    /// Recompute the tree and replace the snapshot document.
    pub async fn generate(&self) -> StoreResult<Vec<SnapshotNode>> {
        let tree = self.build().await?;
        let json = serde_json::to_vec_pretty(&tree)
            .map_err(|e| StoreError::io("serialize snapshot", io::Error::other(e)))?;
        self.write(&json).await?;
        info!(target: "snapshot", path = %self.output.display(), nodes = tree.len(), "snapshot updated");
        Ok(tree)
    }

    // Each writer uses its own temp file, so concurrent generations never interleave
    // bytes; the last rename wins.
    async fn write(&self, json: &[u8]) -> StoreResult<()> {
        if let Some(dir) = self.output.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| StoreError::io("create snapshot dir", e))?;
        }
        let tmp = self.output.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, json).await.map_err(|e| StoreError::io("write snapshot", e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.output).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StoreError::io("replace snapshot", e));
        }
        Ok(())
    }

    /// Re-read the snapshot until it parses, backing off between attempts.
    /// Returns whether a parseable document was observed.
    pub async fn stabilize(&self, max_attempts: u32, initial_delay: Duration) -> bool {
        let mut delay = initial_delay;
        for attempt in 1..=max_attempts {
            match tokio::fs::read(&self.output).await {
                Ok(bytes) if serde_json::from_slice::<Vec<SnapshotNode>>(&bytes).is_ok() => return true,
                Ok(_) => debug!(target: "snapshot", attempt, "snapshot not parseable yet"),
                Err(e) => debug!(target: "snapshot", attempt, error = %e, "snapshot not readable yet"),
            }
            if attempt < max_attempts {
                tokio::time::sleep(delay).await;
                delay = delay.mul_f64(1.6).min(self.stabilize.max_delay());
            }
        }
        warn!(target: "snapshot", attempts = max_attempts, "snapshot did not stabilize");
        false
    }

    /// `generate` followed by `stabilize` with the configured schedule.
    pub async fn refresh(&self) -> StoreResult<bool> {
        self.generate().await?;
        Ok(self.stabilize(self.stabilize.max_attempts, self.stabilize.initial_delay()).await)
    }

    /// Current snapshot document, or `None` before the first generation.
    pub async fn read(&self) -> StoreResult<Option<Vec<u8>>> {
        match tokio::fs::read(&self.output).await {
            Ok(b) => Ok(Some(b)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io("read snapshot", e)),
        }
    }
}

fn walk(root: &Path, dir: &Path, ignore: &IgnorePolicy) -> io::Result<Vec<SnapshotNode>> {
    let mut out = Vec::new();
    let rd = match fs::read_dir(dir) {
        Ok(rd) => rd,
        // The root itself must be readable; a subfolder that vanished mid-walk is skipped.
        Err(e) if dir != root => {
            warn!(target: "snapshot", dir = %dir.display(), error = %e, "cannot read folder");
            return Ok(out);
        }
        Err(e) => return Err(e),
    };
    for entry in rd.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();
        let rel = crate::storage::paths::relative_to(root, &path);
        let ft = match entry.file_type() {
            Ok(ft) => ft,
            Err(e) => {
                warn!(target: "snapshot", path = %rel, error = %e, "cannot stat entry");
                continue;
            }
        };
        if ft.is_symlink() {
            debug!(target: "snapshot", path = %rel, "skipping symlink");
            continue;
        }
        if ft.is_dir() {
            if ignore.ignores_dir(&name) {
                debug!(target: "snapshot", path = %rel, "skipping ignored folder");
                continue;
            }
            let children = walk(root, &path, ignore)?;
            out.push(SnapshotNode::Folder { name, path: rel, children });
        } else if ft.is_file() {
            if ignore.ignores_file(&name) {
                continue;
            }
            match entry.metadata() {
                Ok(md) => {
                    let modified_time = md.modified().map(|t| DateTime::<Utc>::from(t).timestamp_millis()).unwrap_or(0);
                    out.push(SnapshotNode::File { name, path: rel, size: md.len(), modified_time });
                }
                Err(e) => warn!(target: "snapshot", path = %rel, error = %e, "cannot read file metadata"),
            }
        } else {
            debug!(target: "snapshot", path = %rel, "skipping unknown node type");
        }
    }
    out.sort_by(|a, b| match (a.is_folder(), b.is_folder()) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a.name().cmp(b.name()),
    });
    Ok(out)
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod snapshot_tests;
