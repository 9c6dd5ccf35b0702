//! Soft-delete store.
//!
//! Deleted objects move into the trash root unchanged; a sidecar
//! `.meta/<blob>.json` records where each one came from. Sidecars live apart
//! from blobs so no deleted name can collide with one. Entries are keyed by a
//! generated id so two trashed objects sharing a basename stay
//! distinguishable. Only this module writes under the trash root.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::allocate::{allocate, allocate_with, is_variant_of};
use super::fsops::{move_entry, Fallback};
use super::names::check_common;
use super::paths::{relative_to, resolve};
use crate::error::{StoreError, StoreResult};

/// Directory under the trash root holding one sidecar per blob.
pub const META_DIR: &str = ".meta";
const SIDECAR_EXT: &str = "json";

/// Recovery record stored beside a trash blob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Sidecar {
    pub id: Uuid,
    /// Parent directory relative to the storage root; empty for the root itself.
    pub original_dir: String,
    pub original_name: String,
    pub deleted_at: DateTime<Utc>,
    #[serde(default)]
    pub is_dir: bool,
}

impl Sidecar {
    pub fn original_path(&self) -> String {
        if self.original_dir.is_empty() {
            self.original_name.clone()
        } else {
            format!("{}/{}", self.original_dir, self.original_name)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrashEntry {
    pub id: Uuid,
    /// Blob name inside the trash root.
    pub trash_name: String,
    pub original_path: String,
    pub is_dir: bool,
    pub deleted_at: DateTime<Utc>,
}

impl TrashEntry {
    fn from_sidecar(trash_name: String, sc: &Sidecar) -> Self {
        Self {
            id: sc.id,
            trash_name,
            original_path: sc.original_path(),
            is_dir: sc.is_dir,
            deleted_at: sc.deleted_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrashStore {
    storage_root: PathBuf,
    trash_root: PathBuf,
}

impl TrashStore {
    pub fn new(storage_root: PathBuf, trash_root: PathBuf) -> Self { Self { storage_root, trash_root } }

    pub fn root(&self) -> &Path { &self.trash_root }

    fn meta_dir(&self) -> PathBuf { self.trash_root.join(META_DIR) }

    /// Sidecar location for a blob in the trash root.
    pub fn sidecar_path(&self, blob: &Path) -> Option<PathBuf> {
        let mut name = blob.file_name()?.to_os_string();
        name.push(".");
        name.push(SIDECAR_EXT);
        Some(self.meta_dir().join(name))
    }

    fn sidecar_for(&self, blob: &Path) -> StoreResult<PathBuf> {
        self.sidecar_path(blob).ok_or(StoreError::EmptyPath)
    }

    async fn ensure_root(&self) -> StoreResult<()> {
        tokio::fs::create_dir_all(self.meta_dir()).await.map_err(|e| StoreError::io("create trash", e))
    }

    /// Move a live object (absolute, already resolved and checked to exist) into the trash.
    pub async fn put(&self, abs: &Path) -> StoreResult<TrashEntry> {
        self.ensure_root().await?;
        let name = abs.file_name().map(|s| s.to_string_lossy().into_owned()).ok_or(StoreError::EmptyPath)?;
        let is_dir = tokio::fs::symlink_metadata(abs).await.map(|m| m.is_dir()).unwrap_or(false);
        // A leftover sidecar keeps its slot taken so it can never describe a new blob.
        let blob = allocate_with(&self.trash_root.join(&name), |p| self.sidecar_path(p)).await?;
        move_entry(abs, &blob, Fallback::Any).await?;

        let original_dir = abs.parent().map(|p| relative_to(&self.storage_root, p)).unwrap_or_default();
        let sc = Sidecar { id: Uuid::new_v4(), original_dir, original_name: name, deleted_at: Utc::now(), is_dir };
        if let Err(e) = self.write_sidecar(&blob, &sc).await {
            // Without a sidecar the blob is unrecoverable through the API; put it back.
            if let Err(back) = move_entry(&blob, abs, Fallback::Any).await {
                error!(blob = %blob.display(), error = %back, "failed to return object after sidecar write failure");
            }
            return Err(e);
        }
        let trash_name = blob.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        info!(target: "trash", id = %sc.id, original = %sc.original_path(), trash_name = %trash_name, "moved to trash");
        Ok(TrashEntry::from_sidecar(trash_name, &sc))
    }

    async fn write_sidecar(&self, blob: &Path, sc: &Sidecar) -> StoreResult<()> {
        let json = serde_json::to_vec(sc).map_err(|e| StoreError::io("encode sidecar", std::io::Error::other(e)))?;
        let mut f = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.sidecar_for(blob)?)
            .await
            .map_err(|e| StoreError::io("write sidecar", e))?;
        f.write_all(&json).await.map_err(|e| StoreError::io("write sidecar", e))?;
        f.flush().await.map_err(|e| StoreError::io("write sidecar", e))
    }

    async fn read_sidecar(&self, blob: &Path) -> StoreResult<Option<Sidecar>> {
        let bytes = match tokio::fs::read(self.sidecar_for(blob)?).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io("read sidecar", e)),
        };
        match serde_json::from_slice::<Sidecar>(&bytes) {
            Ok(sc) => Ok(Some(sc)),
            Err(e) => {
                warn!(target: "trash", blob = %blob.display(), error = %e, "unreadable sidecar");
                Ok(None)
            }
        }
    }

    /// Blob names currently in the trash (the sidecar directory excluded).
    async fn blob_names(&self) -> StoreResult<Vec<String>> {
        let mut out = Vec::new();
        let mut rd = match tokio::fs::read_dir(&self.trash_root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(StoreError::io("list trash", e)),
        };
        while let Some(entry) = rd.next_entry().await.map_err(|e| StoreError::io("list trash", e))? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name != META_DIR {
                out.push(name);
            }
        }
        out.sort();
        Ok(out)
    }

    /// Every recoverable entry, most recently deleted first.
    pub async fn list(&self) -> StoreResult<Vec<TrashEntry>> {
        let mut out = Vec::new();
        for name in self.blob_names().await? {
            match self.read_sidecar(&self.trash_root.join(&name)).await? {
                Some(sc) => out.push(TrashEntry::from_sidecar(name, &sc)),
                None => warn!(target: "trash", blob = %name, "trash blob without sidecar"),
            }
        }
        out.sort_by(|a, b| b.deleted_at.cmp(&a.deleted_at));
        Ok(out)
    }

    /// Pick the trash entry a restore request for `rel` refers to.
    ///
    /// Order: recorded original location, then exact basename, then `__N` variants
    /// of the basename; newest deletion wins within each tier.
    pub async fn find_for_path(&self, rel: &str) -> StoreResult<(PathBuf, Sidecar)> {
        let (dir, base) = match rel.rsplit_once('/') {
            Some((d, b)) => (d, b),
            None => ("", rel),
        };
        if base.is_empty() {
            return Err(StoreError::EmptyPath);
        }
        let names = self.blob_names().await?;
        let mut candidates: Vec<(String, Option<Sidecar>)> = Vec::new();
        for name in names.into_iter().filter(|n| is_variant_of(n, base)) {
            let sc = self.read_sidecar(&self.trash_root.join(&name)).await?;
            candidates.push((name, sc));
        }
        if candidates.is_empty() {
            return Err(StoreError::NotInTrash(rel.to_string()));
        }

        let newest = |items: Vec<&(String, Option<Sidecar>)>| -> Option<(String, Sidecar)> {
            items
                .into_iter()
                .filter_map(|(n, sc)| sc.as_ref().map(|sc| (n.clone(), sc.clone())))
                .max_by_key(|(_, sc)| sc.deleted_at)
        };

        let by_origin = candidates
            .iter()
            .filter(|(_, sc)| sc.as_ref().is_some_and(|sc| sc.original_dir == dir && sc.original_name == base))
            .collect::<Vec<_>>();
        if let Some((name, sc)) = newest(by_origin) {
            return Ok((self.trash_root.join(name), sc));
        }
        if let Some((name, sc)) = candidates.iter().find(|(n, _)| n == base) {
            return match sc {
                Some(sc) => Ok((self.trash_root.join(name), sc.clone())),
                None => Err(StoreError::MetadataMissing(name.clone())),
            };
        }
        match newest(candidates.iter().collect()) {
            Some((name, sc)) => Ok((self.trash_root.join(name), sc)),
            None => Err(StoreError::MetadataMissing(candidates[0].0.clone())),
        }
    }

    pub async fn find_by_id(&self, id: Uuid) -> StoreResult<(PathBuf, Sidecar)> {
        for name in self.blob_names().await? {
            let blob = self.trash_root.join(&name);
            if let Some(sc) = self.read_sidecar(&blob).await? {
                if sc.id == id {
                    return Ok((blob, sc));
                }
            }
        }
        Err(StoreError::NotInTrash(id.to_string()))
    }

    /// Absolute directory a sidecar says the blob came from, confined to the storage root.
    pub fn destination_dir(&self, sc: &Sidecar) -> StoreResult<PathBuf> { resolve(&self.storage_root, &sc.original_dir) }

    /// Move a blob back under its original directory (recreated if needed) at a free
    /// name, then drop its sidecar. Returns the restored absolute path.
    pub async fn take_back(&self, blob: &Path, sc: &Sidecar) -> StoreResult<PathBuf> {
        let dir = self.destination_dir(sc)?;
        // The recorded name must be one plain segment directly inside `dir`.
        check_common(&sc.original_name)?;
        let wanted = dir.join(&sc.original_name);
        if wanted == self.storage_root || wanted.parent() != Some(dir.as_path()) {
            return Err(StoreError::PathEscape);
        }
        tokio::fs::create_dir_all(&dir).await.map_err(|e| StoreError::io("recreate original folder", e))?;
        let dest = allocate(&wanted).await?;
        move_entry(blob, &dest, Fallback::Any).await?;
        if let Err(e) = tokio::fs::remove_file(self.sidecar_for(blob)?).await {
            warn!(target: "trash", blob = %blob.display(), error = %e, "restored but sidecar removal failed");
        }
        info!(target: "trash", id = %sc.id, restored = %relative_to(&self.storage_root, &dest), "restored from trash");
        Ok(dest)
    }

    /// Remove every blob and sidecar. Returns how many blobs and sidecars were removed.
    pub async fn purge_all(&self) -> StoreResult<usize> {
        self.ensure_root().await?;
        let mut removed = clear_dir(&self.meta_dir()).await?;
        let mut rd = tokio::fs::read_dir(&self.trash_root).await.map_err(|e| StoreError::io("list trash", e))?;
        while let Some(entry) = rd.next_entry().await.map_err(|e| StoreError::io("list trash", e))? {
            if entry.file_name() == META_DIR {
                continue;
            }
            remove_entry(&entry).await?;
            removed += 1;
        }
        info!(target: "trash", removed, "trash purged");
        Ok(removed)
    }
}

async fn remove_entry(entry: &tokio::fs::DirEntry) -> StoreResult<()> {
    let p = entry.path();
    let ft = entry.file_type().await.map_err(|e| StoreError::io("purge trash", e))?;
    let res = if ft.is_dir() { tokio::fs::remove_dir_all(&p).await } else { tokio::fs::remove_file(&p).await };
    res.map_err(|e| StoreError::io("purge trash", e))
}

// Empty `dir` but keep it.
async fn clear_dir(dir: &Path) -> StoreResult<usize> {
    let mut rd = tokio::fs::read_dir(dir).await.map_err(|e| StoreError::io("list trash", e))?;
    let mut removed = 0usize;
    while let Some(entry) = rd.next_entry().await.map_err(|e| StoreError::io("list trash", e))? {
        remove_entry(&entry).await?;
        removed += 1;
    }
    Ok(removed)
}

#[cfg(test)]
#[path = "trash_tests.rs"]
mod trash_tests;
