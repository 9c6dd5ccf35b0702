//!
//! folio HTTP server
//! ------------------
//! Axum HTTP surface over the [`Store`]. Handlers translate request bodies into
//! store calls and store results into `{ok: true, ...}` JSON; every failure is
//! rendered through `AppError`.
//!
//! Responsibilities:
//! - Folder, upload, rename, delete and trash endpoints.
//! - Snapshot delivery with caching disabled.
//! - Browser error reports (`/log-error`).
//! - Startup: folder inventory, initial snapshot, change watcher.
//!
//! The UI addresses the storage root by its label (`uploads/...`); that first
//! segment is stripped here so the store only ever sees root-relative paths.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::multipart::MultipartError;
use axum::extract::{ConnectInfo, DefaultBodyLimit, Multipart, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::client_log::{ClientErrorLog, ClientErrorReport, Outcome};
use crate::config::{ServerConfig, UploadLimits};
use crate::error::{AppError, AppResult, StoreError};
use crate::storage::paths::{normalize_rel, segments};
use crate::storage::upload::{self, IncomingFile};
use crate::storage::Store;

// Room for the text fields and multipart framing on top of the file bytes.
const MULTIPART_SLACK: usize = 1024 * 1024;
const ERROR_REPORT_LIMIT: usize = 1024 * 1024;

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub client_log: Arc<ClientErrorLog>,
}

impl AppState {
    pub fn new(store: Store, client_log: ClientErrorLog) -> Self {
        Self { store: Arc::new(store), client_log: Arc::new(client_log) }
    }

    /// Normalize an incoming path and drop a leading root label segment.
    fn rel(&self, raw: &str) -> String {
        let rel = normalize_rel(raw);
        let label = &self.store.config().root_label;
        let segs = segments(&rel);
        match segs.first() {
            Some(first) if !label.is_empty() && first == label => segs[1..].join("/"),
            _ => rel,
        }
    }
}

fn required(v: Option<String>, field: &str) -> AppResult<String> {
    match v {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(AppError::user("missing_field".to_string(), format!("{field} is required"))),
    }
}

/// Build the router with every route mounted.
pub fn router(state: AppState) -> Router {
    let limits = &state.store.config().upload;
    let upload_limit = limits.max_file_bytes as usize * limits.max_files + MULTIPART_SLACK;
    Router::new()
        .route("/", get(|| async { "folio ok" }))
        .route("/create-folder", post(create_folder))
        .route("/upload-file", post(upload_file).layer(DefaultBodyLimit::max(upload_limit)))
        .route("/rename", post(rename))
        .route("/api/rename", post(rename))
        .route("/delete", post(delete))
        .route("/api/delete", post(delete))
        .route("/restore", post(restore))
        .route("/trash", get(list_trash))
        .route("/clear-trash", post(clear_trash))
        .route("/save", post(save))
        .route("/data/portfolio.json", get(snapshot))
        .route("/log-error", post(log_error).layer(DefaultBodyLimit::max(ERROR_REPORT_LIMIT)))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderPayload {
    pub folder_path: Option<String>,
}

pub async fn create_folder(State(state): State<AppState>, Json(payload): Json<FolderPayload>) -> AppResult<Json<Value>> {
    let raw = required(payload.folder_path, "folderPath")?;
    let folder = state.store.create_folder(&state.rel(&raw)).await?;
    Ok(Json(json!({"ok": true, "folderPath": folder})))
}

/// Drain a multipart upload into memory, enforcing type, count and size limits
/// while the body streams in.
pub async fn read_upload(mut multipart: Multipart, limits: &UploadLimits) -> AppResult<(String, Vec<IncomingFile>)> {
    let bad = |e: MultipartError| AppError::user("bad_upload".to_string(), e.body_text());
    let mut folder = String::new();
    let mut files = Vec::new();
    while let Some(mut field) = multipart.next_field().await.map_err(bad)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "folderPath" => folder = field.text().await.map_err(bad)?,
            "file" => {
                if files.len() >= limits.max_files {
                    return Err(StoreError::TooManyFiles { limit: limits.max_files }.into());
                }
                let declared_name = field.file_name().unwrap_or_default().to_string();
                let declared_type = field.content_type().unwrap_or_default().to_string();
                upload::check_type(&declared_type)?;
                let mut bytes = Vec::new();
                while let Some(chunk) = field.chunk().await.map_err(bad)? {
                    upload::check_size((bytes.len() + chunk.len()) as u64, limits)?;
                    bytes.extend_from_slice(&chunk);
                }
                files.push(IncomingFile { declared_name, declared_type, bytes });
            }
            other => warn!(target: "http", field = other, "ignoring unknown upload field"),
        }
    }
    if files.is_empty() {
        return Err(AppError::user("missing_file", "File not received"));
    }
    Ok((folder, files))
}

pub async fn upload_file(State(state): State<AppState>, multipart: Multipart) -> AppResult<Json<Value>> {
    let (folder, files) = read_upload(multipart, &state.store.config().upload).await?;
    let stored = state.store.upload_files(&state.rel(&folder), files).await?;
    let first = stored.first().cloned();
    Ok(Json(json!({
        "ok": true,
        "filename": first.as_ref().map(|f| f.filename.clone()),
        "path": first.as_ref().map(|f| f.path.clone()),
        "files": stored,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenamePayload {
    pub old_path: Option<String>,
    pub new_path: Option<String>,
}

pub async fn rename(State(state): State<AppState>, Json(payload): Json<RenamePayload>) -> AppResult<Json<Value>> {
    let old = required(payload.old_path, "oldPath")?;
    let new = required(payload.new_path, "newPath")?;
    let landed = state.store.rename(&state.rel(&old), &state.rel(&new)).await?;
    Ok(Json(json!({"ok": true, "newPath": landed})))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetPayload {
    pub target_path: Option<String>,
    pub id: Option<String>,
}

pub async fn delete(State(state): State<AppState>, Json(payload): Json<TargetPayload>) -> AppResult<Json<Value>> {
    let raw = required(payload.target_path, "targetPath")?;
    let rel = state.rel(&raw);
    let entry = state.store.delete(&rel).await?;
    Ok(Json(json!({"ok": true, "targetPath": rel, "id": entry.id})))
}

pub async fn restore(State(state): State<AppState>, Json(payload): Json<TargetPayload>) -> AppResult<Json<Value>> {
    let restored = match payload.id.filter(|s| !s.trim().is_empty()) {
        Some(id) => {
            let id = Uuid::parse_str(id.trim()).map_err(|_| AppError::user("invalid_id", "Invalid trash id"))?;
            state.store.restore_by_id(id).await?
        }
        None => {
            let raw = required(payload.target_path, "targetPath")?;
            state.store.restore(&state.rel(&raw)).await?
        }
    };
    Ok(Json(json!({"ok": true, "restoredPath": restored})))
}

pub async fn list_trash(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let entries = state.store.list_trash().await?;
    Ok(Json(json!({"ok": true, "entries": entries})))
}

pub async fn clear_trash(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let removed = state.store.purge_trash().await?;
    Ok(Json(json!({"ok": true, "removed": removed, "message": "Trash cleared"})))
}

pub async fn save(State(state): State<AppState>) -> AppResult<Json<Value>> {
    state.store.resync().await?;
    Ok(Json(json!({"ok": true})))
}

pub async fn snapshot(State(state): State<AppState>) -> Response {
    match state.store.read_snapshot().await {
        Ok(Some(bytes)) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, HeaderValue::from_static("application/json; charset=utf-8")),
                (header::CACHE_CONTROL, HeaderValue::from_static("no-store, must-revalidate")),
            ],
            bytes,
        )
            .into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => AppError::from(e).into_response(),
    }
}

/// Reporter address: first `X-Forwarded-For` hop, else the peer address.
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| peer.ip().to_string())
}

pub async fn log_error(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(report): Json<ClientErrorReport>,
) -> Response {
    let ip = client_ip(&headers, peer);
    match state.client_log.record(&ip, &report).await {
        Ok(Outcome::Written) => Json(json!({"ok": true})).into_response(),
        Ok(Outcome::Skipped) => Json(json!({"ok": true, "skipped": true})).into_response(),
        Err(e) => {
            error!(target: "client", error = %e, "failed to record client error");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"ok": false}))).into_response()
        }
    }
}

fn log_startup_folders(cfg: &ServerConfig) {
    let cwd = std::env::current_dir().ok();
    let exe = std::env::current_exe().ok();
    let s = &cfg.store;
    info!(
        target: "startup",
        "folio starting. Folder configuration: cwd={:?}, exe={:?}, storage_root={:?}, trash_root={:?}, staging_root={:?}, snapshot={:?}, client_logs={:?}",
        cwd, exe, s.storage_root, s.trash_root, s.staging_root, s.snapshot_path, cfg.client_log_dir
    );
    info!(
        target: "startup",
        "Path existence: storage_root_exists={}, trash_root_exists={}, snapshot_exists={}",
        s.storage_root.exists(), s.trash_root.exists(), s.snapshot_path.exists()
    );
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

/// Start the folio HTTP server with an explicit configuration.
///
/// Creates the storage folders, writes the initial snapshot, starts the change
/// watcher and serves until Ctrl-C. Snapshot and watcher failures at startup are
/// logged and do not prevent serving.
pub async fn run_with_config(cfg: ServerConfig) -> anyhow::Result<()> {
    log_startup_folders(&cfg);

    let store = Store::open(cfg.store.clone())
        .await
        .with_context(|| format!("While opening storage root: {}", cfg.store.storage_root.display()))?;
    if let Err(e) = store.resync().await {
        warn!(target: "startup", error = %e, "initial snapshot generation failed");
    }

    let watcher = if store.config().watcher.enabled {
        match crate::watcher::spawn(store.root().to_path_buf(), &store.config().watcher, store.snapshot().clone()) {
            Ok(h) => Some(h),
            Err(e) => {
                warn!(target: "startup", error = %e, "storage watcher unavailable; relying on explicit resync");
                None
            }
        }
    } else {
        info!(target: "startup", "storage watcher disabled");
        None
    };

    let state = AppState::new(store, ClientErrorLog::new(cfg.client_log_dir.clone()));
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", cfg.bind, cfg.http_port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", cfg.bind, cfg.http_port))?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(w) = watcher {
        w.stop().await;
    }
    Ok(())
}

/// Convenience entry point: defaults overlaid with `FOLIO_*` environment variables.
pub async fn run() -> anyhow::Result<()> {
    let mut cfg = ServerConfig::default();
    cfg.apply_env();
    run_with_config(cfg).await
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod server_tests;
