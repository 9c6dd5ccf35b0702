//!
//! folio configuration
//! --------------------
//! Explicit configuration values handed to each component at construction.
//! Nothing here is read from ambient state after startup; tests build their own
//! `StoreConfig` pointing at temporary roots.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use path_absolutize::Absolutize;
use serde::{Deserialize, Serialize};

/// Rules deciding which on-disk entries never reach the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IgnorePolicy {
    /// Skip dot-prefixed directories and files.
    pub hidden: bool,
    /// Directory names ignored by exact match, `<pattern>-*` prefix or `*-<pattern>` suffix
    /// (case-insensitive).
    pub dir_patterns: Vec<String>,
    /// Exact file names (case-insensitive) treated as junk.
    pub junk_files: Vec<String>,
}

impl Default for IgnorePolicy {
    fn default() -> Self {
        Self {
            hidden: true,
            dir_patterns: ["tmp", ".tmp", "_tmp", "trash", "temp"].iter().map(|s| s.to_string()).collect(),
            junk_files: [".ds_store", "thumbs.db", ".gitkeep"].iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Per-request upload bounds, enforced before anything is committed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UploadLimits {
    pub max_file_bytes: u64,
    pub max_files: usize,
    /// Cap on a sanitized file name, extension included.
    pub max_name_len: usize,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self { max_file_bytes: 8 * 1024 * 1024, max_files: 30, max_name_len: 120 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WatcherConfig {
    pub enabled: bool,
    /// Events deeper than this many directories below the storage root are dropped.
    pub max_depth: usize,
    /// Quiet window after the last event before the snapshot is regenerated.
    pub quiet_period_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self { Self { enabled: true, max_depth: 6, quiet_period_ms: 200 } }
}

impl WatcherConfig {
    pub fn quiet_period(&self) -> Duration { Duration::from_millis(self.quiet_period_ms) }
}

/// Read-back schedule used after every snapshot write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StabilizeConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for StabilizeConfig {
    fn default() -> Self { Self { max_attempts: 6, initial_delay_ms: 150, max_delay_ms: 1500 } }
}

impl StabilizeConfig {
    pub fn initial_delay(&self) -> Duration { Duration::from_millis(self.initial_delay_ms) }
    pub fn max_delay(&self) -> Duration { Duration::from_millis(self.max_delay_ms) }
}

/// Storage layout and policy for one storage root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub storage_root: PathBuf,
    pub trash_root: PathBuf,
    /// Uploads are written here first, then moved into the tree.
    pub staging_root: PathBuf,
    pub snapshot_path: PathBuf,
    /// Label the UI shows for the storage root; stripped from incoming paths.
    pub root_label: String,
    pub ignore: IgnorePolicy,
    pub upload: UploadLimits,
    pub watcher: WatcherConfig,
    pub stabilize: StabilizeConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("uploads"),
            trash_root: PathBuf::from("trash"),
            staging_root: PathBuf::from("staging"),
            snapshot_path: PathBuf::from("data").join("portfolio.json"),
            root_label: "uploads".to_string(),
            ignore: IgnorePolicy::default(),
            upload: UploadLimits::default(),
            watcher: WatcherConfig::default(),
            stabilize: StabilizeConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Lay every directory out under one base folder.
    pub fn under<P: AsRef<Path>>(base: P) -> Self {
        let base = base.as_ref();
        Self {
            storage_root: base.join("uploads"),
            trash_root: base.join("trash"),
            staging_root: base.join("staging"),
            snapshot_path: base.join("data").join("portfolio.json"),
            ..Self::default()
        }
    }

    /// Absolutize all configured paths without touching the filesystem.
    pub fn absolutized(mut self) -> Result<Self> {
        self.storage_root = absolutize(&self.storage_root)?;
        self.trash_root = absolutize(&self.trash_root)?;
        self.staging_root = absolutize(&self.staging_root)?;
        self.snapshot_path = absolutize(&self.snapshot_path)?;
        Ok(self)
    }
}

fn absolutize(p: &Path) -> Result<PathBuf> {
    let abs = p.absolutize().with_context(|| format!("cannot absolutize {}", p.display()))?;
    Ok(abs.to_path_buf())
}

/// Process-level settings for the HTTP server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub http_port: u16,
    pub client_log_dir: PathBuf,
    pub store: StoreConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            http_port: 4000,
            client_log_dir: PathBuf::from("logs"),
            store: StoreConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load a JSON config file; missing fields fall back to defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let cfg: ServerConfig = serde_json::from_str(&text)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(cfg)
    }

    /// Overlay `FOLIO_*` environment variables.
    pub fn apply_env(&mut self) {
        self.apply_vars(|name| std::env::var(name).ok());
    }

    pub(crate) fn apply_vars<F: Fn(&str) -> Option<String>>(&mut self, var: F) {
        if let Some(p) = var("FOLIO_HTTP_PORT").and_then(|v| v.parse::<u16>().ok()) { self.http_port = p; }
        if let Some(v) = var("FOLIO_BIND") { self.bind = v; }
        if let Some(v) = var("FOLIO_STORAGE_ROOT") { self.store.storage_root = PathBuf::from(v); }
        if let Some(v) = var("FOLIO_TRASH_ROOT") { self.store.trash_root = PathBuf::from(v); }
        if let Some(v) = var("FOLIO_STAGING_ROOT") { self.store.staging_root = PathBuf::from(v); }
        if let Some(v) = var("FOLIO_SNAPSHOT_PATH") { self.store.snapshot_path = PathBuf::from(v); }
        if let Some(v) = var("FOLIO_CLIENT_LOG_DIR") { self.client_log_dir = PathBuf::from(v); }
        if let Some(b) = var("FOLIO_WATCH").and_then(|v| parse_bool(&v)) { self.store.watcher.enabled = b; }
    }
}

pub fn parse_bool(v: &str) -> Option<bool> {
    match v.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
