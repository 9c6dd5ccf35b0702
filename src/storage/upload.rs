//! Upload intake: media-type allow-list, file name sanitizing and staging.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

use super::allocate::split_name;
use crate::config::UploadLimits;
use crate::error::{StoreError, StoreResult};

static ALLOWED_MIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(image/(jpeg|png|webp|gif)|video/(mp4|webm|quicktime|x-msvideo|x-matroska))$")
        .expect("static regex")
});

static UNSAFE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9._-]+").expect("static regex"));

/// Extension given to names that arrive without one.
pub const DEFAULT_EXTENSION: &str = "bin";

pub fn is_allowed_type(declared_type: &str) -> bool {
    ALLOWED_MIME.is_match(declared_type.trim().to_ascii_lowercase().as_str())
}

/// Reduce a client-declared file name to a conservative safe form.
///
/// NFKC-normalizes, drops any client-side directory part, replaces runs of
/// characters outside `[A-Za-z0-9._-]` with `_`, strips leading dots, forces an
/// extension and caps the length while keeping the extension.
pub fn sanitize_file_name(declared: &str, max_len: usize) -> String {
    let normalized: String = declared.nfkc().collect();
    let base = normalized.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or("");
    let replaced = UNSAFE_RUN.replace_all(base, "_");
    let mut safe = replaced.trim_start_matches('.').to_string();
    if safe.is_empty() || safe.chars().all(|c| c == '_') {
        safe = format!("file{safe}");
    }
    if split_name(&safe).1.is_none() {
        safe = format!("{}.{}", safe.trim_end_matches('.'), DEFAULT_EXTENSION);
    }
    cap_len(&safe, max_len.max(8))
}

// Sanitized names are pure ASCII, so byte slicing is safe.
fn cap_len(name: &str, max_len: usize) -> String {
    if name.len() <= max_len {
        return name.to_string();
    }
    match split_name(name) {
        (stem, Some(ext)) if ext.len() + 2 <= max_len => {
            let keep = max_len - ext.len() - 1;
            format!("{}.{}", &stem[..keep.min(stem.len())], ext)
        }
        _ => name[..max_len].to_string(),
    }
}

/// One file of an upload request, fully received.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub declared_name: String,
    pub declared_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadedFile {
    pub filename: String,
    pub path: String,
}

/// Reject a request before any byte is written.
pub fn check_batch(files: &[IncomingFile], limits: &UploadLimits) -> StoreResult<()> {
    if files.len() > limits.max_files {
        return Err(StoreError::TooManyFiles { limit: limits.max_files });
    }
    for f in files {
        check_type(&f.declared_type)?;
        check_size(f.bytes.len() as u64, limits)?;
    }
    Ok(())
}

pub fn check_type(declared_type: &str) -> StoreResult<()> {
    if is_allowed_type(declared_type) { Ok(()) } else { Err(StoreError::UnsupportedType(declared_type.to_string())) }
}

pub fn check_size(len: u64, limits: &UploadLimits) -> StoreResult<()> {
    if len > limits.max_file_bytes { Err(StoreError::FileTooLarge { limit: limits.max_file_bytes }) } else { Ok(()) }
}

/// Write bytes into the staging area under a collision-free name.
pub async fn stage(staging_root: &Path, safe_name: &str, bytes: &[u8]) -> StoreResult<PathBuf> {
    tokio::fs::create_dir_all(staging_root).await.map_err(|e| StoreError::io("create staging", e))?;
    let p = staging_root.join(format!("{}_{}", Uuid::new_v4().simple(), safe_name));
    tokio::fs::write(&p, bytes).await.map_err(|e| StoreError::io("stage upload", e))?;
    Ok(p)
}

/// Best-effort cleanup of staged files after a failed request.
pub async fn discard(staged: &[PathBuf]) {
    for p in staged {
        if let Err(e) = tokio::fs::remove_file(p).await {
            tracing::warn!(path = %p.display(), error = %e, "failed to discard staged upload");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_list() {
        for ok in ["image/jpeg", "image/png", "image/webp", "image/gif", "video/mp4", "video/webm",
                   "video/quicktime", "video/x-msvideo", "video/x-matroska", "IMAGE/JPEG"] {
            assert!(is_allowed_type(ok), "{ok}");
        }
        for bad in ["image/svg+xml", "text/html", "application/octet-stream", "image/jpeg; x", "", "video/mp4x"] {
            assert!(!is_allowed_type(bad), "{bad}");
        }
    }

    #[test]
    fn sanitize_basic() {
        assert_eq!(sanitize_file_name("photo.jpg", 120), "photo.jpg");
        assert_eq!(sanitize_file_name("my photo (1).JPG", 120), "my_photo_1_.JPG");
        assert_eq!(sanitize_file_name("фото.png", 120), "_.png");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\cat.gif", 120), "cat.gif");
        assert_eq!(sanitize_file_name("../../etc/passwd", 120), "passwd.bin");
    }

    #[test]
    fn sanitize_never_produces_hidden_or_empty() {
        assert_eq!(sanitize_file_name(".htaccess", 120), "htaccess.bin");
        assert_eq!(sanitize_file_name("", 120), "file.bin");
        assert_eq!(sanitize_file_name("...", 120), "file.bin");
        assert_eq!(sanitize_file_name("name.", 120), "name.bin");
    }

    #[test]
    fn sanitize_nfkc() {
        // fullwidth letters fold to ASCII under NFKC
        assert_eq!(sanitize_file_name("ｐｈｏｔｏ.jpg", 120), "photo.jpg");
    }

    #[test]
    fn sanitize_caps_length_keeping_extension() {
        let long = format!("{}.webm", "a".repeat(300));
        let got = sanitize_file_name(&long, 120);
        assert_eq!(got.len(), 120);
        assert!(got.ends_with(".webm"));
    }

    #[test]
    fn batch_checks() {
        let limits = UploadLimits { max_file_bytes: 4, max_files: 2, max_name_len: 120 };
        let f = |t: &str, n: usize| IncomingFile { declared_name: "a.jpg".into(), declared_type: t.into(), bytes: vec![0; n] };
        assert!(check_batch(&[f("image/jpeg", 4)], &limits).is_ok());
        assert!(matches!(check_batch(&[f("image/jpeg", 5)], &limits), Err(StoreError::FileTooLarge { limit: 4 })));
        assert!(matches!(check_batch(&[f("text/plain", 1)], &limits), Err(StoreError::UnsupportedType(_))));
        let three = vec![f("image/jpeg", 1), f("image/jpeg", 1), f("image/jpeg", 1)];
        assert!(matches!(check_batch(&three, &limits), Err(StoreError::TooManyFiles { limit: 2 })));
    }

    #[tokio::test]
    async fn stage_and_discard() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = tmp.path().join("staging");
        let a = stage(&staging, "a.jpg", b"1").await.unwrap();
        let b = stage(&staging, "a.jpg", b"2").await.unwrap();
        assert_ne!(a, b);
        assert!(a.file_name().unwrap().to_string_lossy().ends_with("_a.jpg"));
        discard(&[a.clone(), b.clone()]).await;
        assert!(!a.exists() && !b.exists());
    }
}
