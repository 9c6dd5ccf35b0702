//!
//! folio storage module
//! ---------------------
//! The object store behind the admin API: a sandboxed, soft-deleting store over
//! one directory tree. Every mutating operation follows the same shape:
//!
//! 1. normalize and resolve the relative path(s) under the storage root
//!    (`PathEscape` otherwise);
//! 2. validate every segment; rejections leave no trace;
//! 3. claim the affected subtrees so overlapping operations run one at a time;
//! 4. perform the filesystem action, never overwriting (see `allocate`);
//! 5. regenerate and stabilize the snapshot before reporting success.
//!
//! A failed snapshot refresh after a successful mutation is logged, not
//! returned: user data is not rolled back for a stale derived view.

use std::path::{Path, PathBuf};

use tracing::{error, info};
use uuid::Uuid;

pub mod allocate;
pub mod fsops;
pub mod locks;
pub mod names;
pub mod paths;
pub mod trash;
pub mod upload;

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::snapshot::SnapshotGenerator;
use allocate::allocate;
use fsops::{move_entry, Fallback};
use locks::SubtreeLocks;
use names::{validate_path, validate_segment, NameKind};
use paths::{normalize_rel, relative_to, resolve, segments};
use trash::{TrashEntry, TrashStore};
use upload::{IncomingFile, UploadedFile};

enum Lookup<'a> {
    Path(&'a str),
    Id(Uuid),
}

/// Handle to one storage root, its trash and its snapshot.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct Store {
    cfg: StoreConfig,
    locks: SubtreeLocks,
    trash: TrashStore,
    snapshot: SnapshotGenerator,
}

impl Store {
    /// Absolutize the configured roots, create them if missing, and build the store.
    /// Does not generate the first snapshot; callers decide when (see `resync`).
    pub async fn open(cfg: StoreConfig) -> StoreResult<Self> {
        let cfg = cfg
            .absolutized()
            .map_err(|e| StoreError::io("absolutize roots", std::io::Error::other(e.to_string())))?;
        for dir in [&cfg.storage_root, &cfg.trash_root, &cfg.staging_root] {
            tokio::fs::create_dir_all(dir).await.map_err(|e| StoreError::io("create root", e))?;
        }
        let trash = TrashStore::new(cfg.storage_root.clone(), cfg.trash_root.clone());
        let snapshot = SnapshotGenerator::new(
            cfg.storage_root.clone(),
            cfg.snapshot_path.clone(),
            cfg.ignore.clone(),
            cfg.stabilize.clone(),
        );
        Ok(Self { cfg, locks: SubtreeLocks::new(), trash, snapshot })
    }

    pub fn config(&self) -> &StoreConfig { &self.cfg }

    pub fn root(&self) -> &Path { &self.cfg.storage_root }

    pub fn snapshot(&self) -> &SnapshotGenerator { &self.snapshot }

    pub fn resolve(&self, rel: &str) -> StoreResult<PathBuf> { resolve(&self.cfg.storage_root, rel) }

    fn rel(&self, abs: &Path) -> String { relative_to(&self.cfg.storage_root, abs) }

    // Escapes are reported as such, ahead of any naming complaint about `..`.
    fn checked(&self, rel: &str) -> StoreResult<(String, PathBuf)> {
        let rel = normalize_rel(rel);
        let abs = self.resolve(&rel)?;
        validate_path(&rel)?;
        Ok((rel, abs))
    }

    async fn refresh_snapshot(&self, after: &'static str) {
        match self.snapshot.refresh().await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(op = after, "snapshot written but not confirmed readable"),
            Err(e) => error!(op = after, error = %e, "snapshot regeneration failed after successful mutation"),
        }
    }

    /// Ensure a folder (and its missing parents) exists. Idempotent for existing folders.
    pub async fn create_folder(&self, rel: &str) -> StoreResult<String> {
        let (rel, dir) = self.checked(rel)?;
        for seg in segments(&rel) {
            validate_segment(seg, NameKind::Folder)?;
        }
        let _guard = self.locks.acquire(vec![dir.clone()]).await;

        match tokio::fs::symlink_metadata(&dir).await {
            Ok(md) if md.is_dir() => {}
            Ok(_) => return Err(StoreError::NotADirectory(rel)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tokio::fs::create_dir_all(&dir).await.map_err(|e| StoreError::io("create folder", e))?;
                info!(target: "store", path = %rel, "folder created");
            }
            Err(e) => return Err(StoreError::io("create folder", e)),
        }
        drop(_guard);
        self.refresh_snapshot("create-folder").await;
        Ok(rel)
    }

    /// Store uploaded files under `folder` (created if missing), each at a
    /// sanitized, collision-free name. The whole request is checked against the
    /// type allow-list and size/count limits before anything is written.
    pub async fn upload_files(&self, folder: &str, files: Vec<IncomingFile>) -> StoreResult<Vec<UploadedFile>> {
        upload::check_batch(&files, &self.cfg.upload)?;
        let folder = normalize_rel(folder);
        let dir = self.resolve(&folder)?;
        for seg in segments(&folder) {
            validate_segment(seg, NameKind::Folder)?;
        }
        let named: Vec<(String, IncomingFile)> = files
            .into_iter()
            .map(|f| (upload::sanitize_file_name(&f.declared_name, self.cfg.upload.max_name_len), f))
            .collect();
        for (name, _) in &named {
            validate_segment(name, NameKind::File)?;
        }

        let mut staged = Vec::with_capacity(named.len());
        for (name, f) in &named {
            match upload::stage(&self.cfg.staging_root, name, &f.bytes).await {
                Ok(p) => staged.push(p),
                Err(e) => {
                    upload::discard(&staged).await;
                    return Err(e);
                }
            }
        }

        let _guard = self.locks.acquire(vec![dir.clone()]).await;
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            upload::discard(&staged).await;
            return Err(StoreError::io("create upload folder", e));
        }
        let mut out = Vec::with_capacity(staged.len());
        for (i, ((name, _), tmp)) in named.iter().zip(staged.iter()).enumerate() {
            let dest = allocate(&dir.join(name)).await;
            let moved = match dest {
                Ok(dest) => move_entry(tmp, &dest, Fallback::Any).await.map(|_| dest),
                Err(e) => Err(e),
            };
            match moved {
                Ok(dest) => {
                    let filename = dest.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
                    info!(target: "store", folder = %folder, file = %filename, "file uploaded");
                    out.push(UploadedFile { filename, path: self.rel(&dest) });
                }
                Err(e) => {
                    upload::discard(&staged[i..]).await;
                    if !out.is_empty() {
                        self.refresh_snapshot("upload-file").await;
                    }
                    return Err(e);
                }
            }
        }
        drop(_guard);
        self.refresh_snapshot("upload-file").await;
        Ok(out)
    }

    /// Rename or move `old` to `new`. Collisions are resolved by suffixing; the
    /// returned relative path is where the object actually landed.
    pub async fn rename(&self, old: &str, new: &str) -> StoreResult<String> {
        let (old_rel, from) = self.checked(old)?;
        let (new_rel, to) = self.checked(new)?;
        // Parents may be created below, so they follow the folder rules.
        let new_segs = segments(&new_rel);
        for seg in &new_segs[..new_segs.len().saturating_sub(1)] {
            validate_segment(seg, NameKind::Folder)?;
        }
        let to_parent = to.parent().map(Path::to_path_buf).unwrap_or_else(|| self.root().to_path_buf());
        let _guard = self.locks.acquire(vec![from.clone(), to_parent.clone()]).await;

        let md = match tokio::fs::symlink_metadata(&from).await {
            Ok(md) => md,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(StoreError::NotFound(old_rel)),
            Err(e) => return Err(StoreError::io("rename", e)),
        };
        let last = segments(&new_rel).last().copied().unwrap_or_default();
        validate_segment(last, NameKind::of_dir(md.is_dir()))?;
        if to == from {
            return Ok(old_rel);
        }
        if md.is_dir() && to.starts_with(&from) {
            return Err(StoreError::IntoItself(old_rel));
        }

        tokio::fs::create_dir_all(&to_parent).await.map_err(|e| StoreError::io("create destination folder", e))?;
        let dest = allocate(&to).await?;
        move_entry(&from, &dest, Fallback::DirsOnly).await?;
        let landed = self.rel(&dest);
        info!(target: "store", from = %old_rel, to = %landed, "renamed");
        drop(_guard);
        self.refresh_snapshot("rename").await;
        Ok(landed)
    }

    /// Soft-delete: move the object into the trash with recovery metadata.
    pub async fn delete(&self, rel: &str) -> StoreResult<TrashEntry> {
        let (rel, target) = self.checked(rel)?;
        let _guard = self.locks.acquire(vec![target.clone(), self.trash.root().to_path_buf()]).await;

        match tokio::fs::symlink_metadata(&target).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(StoreError::NotFound(rel)),
            Err(e) => return Err(StoreError::io("delete", e)),
        }
        let entry = self.trash.put(&target).await?;
        drop(_guard);
        self.refresh_snapshot("delete").await;
        Ok(entry)
    }

    /// Restore the trash entry a relative path refers to (see `TrashStore::find_for_path`).
    pub async fn restore(&self, rel: &str) -> StoreResult<String> {
        let rel = normalize_rel(rel);
        if rel.is_empty() {
            return Err(StoreError::EmptyPath);
        }
        let dest = self.take_from_trash(Lookup::Path(&rel)).await?;
        self.refresh_snapshot("restore").await;
        Ok(self.rel(&dest))
    }

    pub async fn restore_by_id(&self, id: Uuid) -> StoreResult<String> {
        let dest = self.take_from_trash(Lookup::Id(id)).await?;
        self.refresh_snapshot("restore").await;
        Ok(self.rel(&dest))
    }

    // Claims are released on return, before the caller refreshes the snapshot.
    async fn take_from_trash(&self, lookup: Lookup<'_>) -> StoreResult<PathBuf> {
        let _trash = self.locks.acquire(vec![self.trash.root().to_path_buf()]).await;
        let (blob, sc) = match lookup {
            Lookup::Path(rel) => self.trash.find_for_path(rel).await?,
            Lookup::Id(id) => self.trash.find_by_id(id).await?,
        };
        let dir = self.trash.destination_dir(&sc)?;
        let _dest = self.locks.acquire(vec![dir]).await;
        self.trash.take_back(&blob, &sc).await
    }

    pub async fn list_trash(&self) -> StoreResult<Vec<TrashEntry>> { self.trash.list().await }

    /// Permanently remove everything in the trash.
    pub async fn purge_trash(&self) -> StoreResult<usize> {
        let _guard = self.locks.acquire(vec![self.trash.root().to_path_buf()]).await;
        self.trash.purge_all().await
    }

    /// Manual resync: regenerate and stabilize the snapshot, surfacing failures.
    pub async fn resync(&self) -> StoreResult<()> {
        self.snapshot.refresh().await?;
        Ok(())
    }

    pub async fn read_snapshot(&self) -> StoreResult<Option<Vec<u8>>> { self.snapshot.read().await }
}
