//! Unified application error model and mapping helpers.
//! `StoreError` is what the storage core returns; `AppError` is what the HTTP
//! frontend renders. The conversion between the two decides what detail the
//! client may see: validation reasons pass through verbatim, I/O detail is
//! logged server-side and replaced with a generic message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::io;

/// Which naming rule a segment violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameRule {
    Empty,
    DotSegment,
    ForbiddenChar,
    FolderDot,
    FileLeadingDot,
}

impl Display for NameRule {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            NameRule::Empty => "Empty name",
            NameRule::DotSegment => "Invalid name",
            NameRule::ForbiddenChar => "Forbidden characters: \\ / : * ? \" < > |",
            NameRule::FolderDot => "Folder name cannot contain dot (.)",
            NameRule::FileLeadingDot => "File name cannot start with dot (.)",
        };
        f.write_str(msg)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("path escapes the storage root")]
    PathEscape,
    #[error("{0}")]
    InvalidName(NameRule),
    #[error("Path is empty")]
    EmptyPath,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("not found in trash: {0}")]
    NotInTrash(String),
    #[error("metadata not found for trash entry: {0}")]
    MetadataMissing(String),
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),
    #[error("file exceeds the {limit} byte limit")]
    FileTooLarge { limit: u64 },
    #[error("more than {limit} files in one request")]
    TooManyFiles { limit: usize },
    #[error("a file already occupies {0}")]
    NotADirectory(String),
    #[error("Cannot move a folder into itself")]
    IntoItself(String),
    #[error("{op} failed: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    pub fn io(op: &'static str, source: io::Error) -> Self { StoreError::Io { op, source } }

    /// True for failures detected before any filesystem side effect.
    pub fn is_rejection(&self) -> bool { !matches!(self, StoreError::Io { .. }) }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    UserInput { code: String, message: String },
    NotFound { code: String, message: String },
    Io { code: String, message: String },
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::UserInput { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Io { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::UserInput { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::Io { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn user<S: Into<String>>(code: S, msg: S) -> Self { AppError::UserInput { code: code.into(), message: msg.into() } }
    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn io<S: Into<String>>(code: S, msg: S) -> Self { AppError::Io { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::UserInput { .. } => 400,
            AppError::NotFound { .. } => 404,
            AppError::Io { .. } => 500,
            AppError::Internal { .. } => 500,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match &err {
            // Never echo the resolved path back to the client.
            StoreError::PathEscape => AppError::user("invalid_path", "Invalid path"),
            StoreError::InvalidName(rule) => AppError::user("invalid_name".to_string(), rule.to_string()),
            StoreError::EmptyPath => AppError::user("invalid_path".to_string(), err.to_string()),
            StoreError::NotADirectory(_) => AppError::user("not_a_directory".to_string(), err.to_string()),
            StoreError::IntoItself(_) => AppError::user("into_itself".to_string(), err.to_string()),
            StoreError::UnsupportedType(_) => AppError::user("unsupported_type", "Unsupported file type"),
            StoreError::FileTooLarge { .. } => AppError::user("file_too_large".to_string(), err.to_string()),
            StoreError::TooManyFiles { .. } => AppError::user("too_many_files".to_string(), err.to_string()),
            StoreError::NotFound(_) => AppError::not_found("not_found", "Source not found"),
            StoreError::NotInTrash(_) => AppError::not_found("not_in_trash", "File not found in trash/recycle bin"),
            StoreError::MetadataMissing(_) => AppError::not_found("metadata_missing", "Metadata not found"),
            StoreError::Io { op, source } => {
                tracing::error!(op = *op, error = %source, kind = ?source.kind(), "storage i/o failure");
                AppError::io("io_error".to_string(), format!("Failed to {}", op))
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %err, "internal error");
        AppError::Internal { code: "internal".into(), message: "Internal error".into() }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = serde_json::json!({"ok": false, "error": self.message(), "code": self.code_str()});
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
