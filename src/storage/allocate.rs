//! Unique path allocation: `name.ext` → `name__1.ext` → `name__2.ext` …

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::{StoreError, StoreResult};

/// Disambiguator inserted between stem and extension.
pub const SUFFIX_SEP: &str = "__";

/// Existence check that does not follow symlinks: a dangling link still occupies its slot.
pub(crate) async fn occupied(p: &Path) -> StoreResult<bool> {
    match tokio::fs::symlink_metadata(p).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StoreError::io("check path", e)),
    }
}

/// Split a file name into stem and extension (extension keeps no dot).
/// A leading dot is part of the stem, so `.bashrc` has no extension.
pub(crate) fn split_name(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(i) if i > 0 && i + 1 < name.len() => (&name[..i], Some(&name[i + 1..])),
        _ => (name, None),
    }
}

/// Candidate name for attempt `n`.
pub fn suffixed_name(name: &str, n: u32) -> String {
    match split_name(name) {
        (stem, Some(ext)) => format!("{stem}{SUFFIX_SEP}{n}.{ext}"),
        (stem, None) => format!("{stem}{SUFFIX_SEP}{n}"),
    }
}

/// Return `desired` if free, else the first free `__N` variant beside it.
pub async fn allocate(desired: &Path) -> StoreResult<PathBuf> { allocate_with(desired, |_| None).await }

/// Like `allocate`, but a slot also counts as taken while its companion path
/// (as mapped by `companion`) exists.
pub async fn allocate_with<F>(desired: &Path, companion: F) -> StoreResult<PathBuf>
where
    F: Fn(&Path) -> Option<PathBuf>,
{
    let taken = |p: PathBuf| {
        let extra = companion(&p);
        async move {
            if occupied(&p).await? {
                return Ok::<_, StoreError>(true);
            }
            match extra {
                Some(c) => occupied(&c).await,
                None => Ok(false),
            }
        }
    };
    if !taken(desired.to_path_buf()).await? {
        return Ok(desired.to_path_buf());
    }
    let parent = desired.parent().map(Path::to_path_buf).unwrap_or_default();
    let name: OsString = desired.file_name().map(|s| s.to_os_string()).unwrap_or_default();
    let name = name.to_string_lossy().into_owned();
    let mut n: u32 = 1;
    loop {
        let cand = parent.join(suffixed_name(&name, n));
        if !taken(cand.clone()).await? {
            return Ok(cand);
        }
        n = n.checked_add(1).ok_or_else(|| {
            StoreError::io("allocate path", std::io::Error::other("disambiguator space exhausted"))
        })?;
    }
}

/// True when `candidate` is `base` itself or a `__N` variant of it.
pub fn is_variant_of(candidate: &str, base: &str) -> bool {
    if candidate == base {
        return true;
    }
    let (stem, ext) = split_name(base);
    let Some(rest) = candidate.strip_prefix(stem).and_then(|r| r.strip_prefix(SUFFIX_SEP)) else {
        return false;
    };
    let digits = match ext {
        Some(ext) => match rest.strip_suffix(ext).and_then(|r| r.strip_suffix('.')) {
            Some(d) => d,
            None => return false,
        },
        None => rest,
    };
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_preserves_extension() {
        assert_eq!(suffixed_name("photo.jpg", 1), "photo__1.jpg");
        assert_eq!(suffixed_name("archive.tar.gz", 2), "archive.tar__2.gz");
        assert_eq!(suffixed_name("Folder", 3), "Folder__3");
        assert_eq!(suffixed_name(".hidden", 1), ".hidden__1");
    }

    #[test]
    fn variant_matching() {
        assert!(is_variant_of("b.jpg", "b.jpg"));
        assert!(is_variant_of("b__1.jpg", "b.jpg"));
        assert!(is_variant_of("b__12.jpg", "b.jpg"));
        assert!(!is_variant_of("b__x.jpg", "b.jpg"));
        assert!(!is_variant_of("b__1.png", "b.jpg"));
        assert!(!is_variant_of("bb__1.jpg", "b.jpg"));
        assert!(is_variant_of("Session__2", "Session"));
        assert!(!is_variant_of("Session__", "Session"));
    }

    #[tokio::test]
    async fn free_path_is_returned_unchanged() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("a.jpg");
        assert_eq!(allocate(&p).await.unwrap(), p);
    }

    #[tokio::test]
    async fn occupied_paths_get_increasing_suffixes() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("a.jpg");
        std::fs::write(&p, b"0").unwrap();
        let mut seen = Vec::new();
        for _ in 0..3 {
            let got = allocate(&p).await.unwrap();
            assert!(!got.exists());
            std::fs::write(&got, b"x").unwrap();
            seen.push(got.file_name().unwrap().to_string_lossy().into_owned());
        }
        assert_eq!(seen, vec!["a__1.jpg", "a__2.jpg", "a__3.jpg"]);
    }

    #[tokio::test]
    async fn directories_and_gaps() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("Session")).unwrap();
        std::fs::create_dir(tmp.path().join("Session__1")).unwrap();
        std::fs::create_dir(tmp.path().join("Session__3")).unwrap();
        let got = allocate(&tmp.path().join("Session")).await.unwrap();
        assert_eq!(got, tmp.path().join("Session__2"));
    }

    #[tokio::test]
    async fn companion_paths_also_occupy_a_slot() {
        let tmp = tempfile::tempdir().unwrap();
        let side = tmp.path().join("side");
        std::fs::create_dir(&side).unwrap();
        std::fs::write(side.join("a.jpg"), b"stale").unwrap();
        let companion = |p: &Path| p.file_name().map(|n| side.join(n));
        let got = allocate_with(&tmp.path().join("a.jpg"), companion).await.unwrap();
        assert_eq!(got, tmp.path().join("a__1.jpg"));
    }
}
