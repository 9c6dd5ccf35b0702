//! Name policy: desktop-file-manager-like rules for path segments.

use crate::error::{NameRule, StoreError, StoreResult};

/// Characters no segment may contain.
pub const FORBIDDEN_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    File,
    Folder,
}

impl NameKind {
    pub fn of_dir(is_dir: bool) -> Self { if is_dir { NameKind::Folder } else { NameKind::File } }
}

/// Check the rules shared by every segment regardless of kind.
pub fn check_common(name: &str) -> StoreResult<()> {
    if name.trim().is_empty() {
        return Err(StoreError::InvalidName(NameRule::Empty));
    }
    if name == "." || name == ".." {
        return Err(StoreError::InvalidName(NameRule::DotSegment));
    }
    if name.contains(FORBIDDEN_CHARS) {
        return Err(StoreError::InvalidName(NameRule::ForbiddenChar));
    }
    Ok(())
}

/// Validate one segment for the given kind of object.
pub fn validate_segment(name: &str, kind: NameKind) -> StoreResult<()> {
    check_common(name)?;
    match kind {
        NameKind::Folder if name.contains('.') => Err(StoreError::InvalidName(NameRule::FolderDot)),
        NameKind::File if name.starts_with('.') => Err(StoreError::InvalidName(NameRule::FileLeadingDot)),
        _ => Ok(()),
    }
}

/// Validate every segment of an already-normalized relative path, stopping at
/// the first failure. Kind-specific rules are left to the caller, which knows
/// what the last segment names.
pub fn validate_path(rel: &str) -> StoreResult<()> {
    let segs = super::paths::segments(rel);
    if segs.is_empty() {
        return Err(StoreError::EmptyPath);
    }
    for seg in segs {
        check_common(seg)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(r: StoreResult<()>) -> Option<NameRule> {
        match r {
            Err(StoreError::InvalidName(rule)) => Some(rule),
            _ => None,
        }
    }

    #[test]
    fn forbidden_chars_fail_for_both_kinds() {
        for c in FORBIDDEN_CHARS {
            let name = format!("a{c}b");
            assert_eq!(rule(validate_segment(&name, NameKind::File)), Some(NameRule::ForbiddenChar), "{name}");
            assert_eq!(rule(validate_segment(&name, NameKind::Folder)), Some(NameRule::ForbiddenChar), "{name}");
        }
    }

    #[test]
    fn empty_and_dot_segments() {
        assert_eq!(rule(validate_segment("", NameKind::File)), Some(NameRule::Empty));
        assert_eq!(rule(validate_segment("   ", NameKind::Folder)), Some(NameRule::Empty));
        assert_eq!(rule(validate_segment("..", NameKind::File)), Some(NameRule::DotSegment));
        assert_eq!(rule(validate_segment(".", NameKind::File)), Some(NameRule::DotSegment));
    }

    #[test]
    fn folder_dot_rule() {
        assert_eq!(rule(validate_segment("My.Folder", NameKind::Folder)), Some(NameRule::FolderDot));
        assert_eq!(rule(validate_segment(".hidden", NameKind::Folder)), Some(NameRule::FolderDot));
        assert!(validate_segment("New Session", NameKind::Folder).is_ok());
    }

    #[test]
    fn file_leading_dot_rule() {
        assert_eq!(rule(validate_segment(".env", NameKind::File)), Some(NameRule::FileLeadingDot));
        assert!(validate_segment("photo.final.jpg", NameKind::File).is_ok());
        assert!(validate_segment("README", NameKind::File).is_ok());
    }

    #[test]
    fn unicode_names_are_legal() {
        assert!(validate_segment("Портрет", NameKind::Folder).is_ok());
        assert!(validate_segment("фото 1.jpg", NameKind::File).is_ok());
    }

    #[test]
    fn validate_path_short_circuits() {
        assert!(validate_path("Portrait/New Session").is_ok());
        assert!(matches!(validate_path(""), Err(StoreError::EmptyPath)));
        assert_eq!(rule(validate_path("a/../b")), Some(NameRule::DotSegment));
        assert_eq!(rule(validate_path("a/b?c/d:e")), Some(NameRule::ForbiddenChar));
        // dots inside intermediate folders are the caller's concern
        assert!(validate_path("a.b/c").is_ok());
    }
}
