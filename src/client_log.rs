//! Browser error reports.
//!
//! The admin UI posts uncaught script errors here. Reports are clipped,
//! de-duplicated per reporter for a short cooldown, and appended as JSON lines to
//! a size-rotated file under the configured log directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use crate::storage::allocate::allocate;

pub const LOG_FILE: &str = "client-errors.log";
pub const MAX_FIELD_LEN: usize = 10_000;
const CLIP_MARK: &str = "…(clipped)";
const COOLDOWN: Duration = Duration::from_secs(5);
const ROTATE_BYTES: u64 = 5 * 1024 * 1024;
// Cooldown entries are pruned once the table grows past this.
const PRUNE_AT: usize = 1024;

/// Report as posted by the browser. Fields are loosely typed; anything missing is `null`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientErrorReport {
    #[serde(rename = "type")]
    pub kind: Value,
    pub message: Value,
    pub stack: Value,
    pub filename: Value,
    pub lineno: Value,
    pub colno: Value,
    pub href: Value,
    pub ua: Value,
    pub time: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub stack: String,
    pub filename: String,
    pub lineno: Value,
    pub colno: Value,
    pub href: String,
    pub ua: String,
    pub time: String,
    pub ip: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Written,
    Skipped,
}

fn text(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Truncate to `max` characters, marking the cut.
pub fn clip(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((cut, _)) => format!("{}{}", &s[..cut], CLIP_MARK),
        None => s.to_string(),
    }
}

impl LogRecord {
    pub fn from_report(ip: &str, r: &ClientErrorReport) -> Self {
        let c = |v: &Value| clip(&text(v), MAX_FIELD_LEN);
        let time = c(&r.time);
        Self {
            kind: c(&r.kind),
            message: c(&r.message),
            stack: c(&r.stack),
            filename: c(&r.filename),
            lineno: r.lineno.clone(),
            colno: r.colno.clone(),
            href: c(&r.href),
            ua: c(&r.ua),
            time: if time.is_empty() { Utc::now().to_rfc3339() } else { time },
            ip: ip.to_string(),
        }
    }

    fn dedup_key(&self) -> String {
        let line = match &self.lineno {
            Value::Null => String::new(),
            v => text(v),
        };
        format!("{}|{}|{}|{}|{}", self.ip, self.kind, self.message, self.filename, line)
    }
}

pub struct ClientErrorLog {
    dir: PathBuf,
    cooldown: Duration,
    rotate_bytes: u64,
    seen: Mutex<HashMap<String, Instant>>,
    write: tokio::sync::Mutex<()>,
}

impl ClientErrorLog {
    pub fn new(dir: PathBuf) -> Self { Self::with_limits(dir, COOLDOWN, ROTATE_BYTES) }

    pub fn with_limits(dir: PathBuf, cooldown: Duration, rotate_bytes: u64) -> Self {
        Self { dir, cooldown, rotate_bytes, seen: Mutex::new(HashMap::new()), write: tokio::sync::Mutex::new(()) }
    }

    pub fn dir(&self) -> &Path { &self.dir }

    pub fn current_file(&self) -> PathBuf { self.dir.join(LOG_FILE) }

    // True when the same report was accepted within the cooldown.
    fn is_repeat(&self, key: String) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock();
        if let Some(last) = seen.get(&key) {
            if now.duration_since(*last) < self.cooldown {
                return true;
            }
        }
        if seen.len() >= PRUNE_AT {
            let cooldown = self.cooldown;
            seen.retain(|_, t| now.duration_since(*t) < cooldown);
        }
        seen.insert(key, now);
        false
    }

    pub async fn record(&self, ip: &str, report: &ClientErrorReport) -> Result<Outcome> {
        let rec = LogRecord::from_report(ip, report);
        if self.is_repeat(rec.dedup_key()) {
            return Ok(Outcome::Skipped);
        }
        let mut line = serde_json::to_vec(&rec).context("encoding client error record")?;
        line.push(b'\n');

        let _w = self.write.lock().await;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating {}", self.dir.display()))?;
        self.rotate_if_needed().await?;
        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.current_file())
            .await
            .context("opening client error log")?;
        f.write_all(&line).await.context("appending client error log")?;
        f.flush().await.context("flushing client error log")?;
        tracing::warn!(target: "client", kind = %rec.kind, message = %rec.message, "client error reported");
        Ok(Outcome::Written)
    }

    async fn rotate_if_needed(&self) -> Result<()> {
        let current = self.current_file();
        let size = match tokio::fs::metadata(&current).await {
            Ok(md) => md.len(),
            Err(_) => return Ok(()),
        };
        if size < self.rotate_bytes {
            return Ok(());
        }
        let stamp = Utc::now().format("%Y-%m-%dT%H-%M-%S-%3fZ").to_string();
        let rotated = self.rotation_target(&stamp).await?;
        tokio::fs::rename(&current, &rotated).await.context("rotating client error log")?;
        tracing::info!(target: "client", rotated = %rotated.display(), "client error log rotated");
        Ok(())
    }

    // Two rotations within one millisecond must not replace each other.
    async fn rotation_target(&self, stamp: &str) -> Result<PathBuf> {
        let wanted = self.dir.join(format!("client-errors.{stamp}.log"));
        Ok(allocate(&wanted).await?)
    }
}
