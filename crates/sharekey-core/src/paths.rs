//! Virtual path helpers
//!
//! All collaborators address data with absolute, `/`-separated virtual
//! paths such as `/alice/files/docs/a.txt`.

use crate::error::{StorageError, StorageResult};

/// Area of a user's home that holds regular files
pub const FILES_AREA: &str = "files";

/// Area of a user's home that holds deleted files
pub const TRASH_AREA: &str = "files_trashbin";

/// Normalize `path` to `/a/b` form. `..` is rejected.
pub fn normalize(path: &str) -> StorageResult<String> {
    let mut out = String::with_capacity(path.len() + 1);
    for part in path.split('/') {
        match part {
            "" | "." => continue,
            ".." => return Err(StorageError::InvalidPath(path.to_string())),
            _ => {
                out.push('/');
                out.push_str(part);
            }
        }
    }
    if out.is_empty() {
        out.push('/');
    }
    Ok(out)
}

/// Join `rel` onto `base` with exactly one separator
pub fn join(base: &str, rel: &str) -> String {
    let base = base.trim_end_matches('/');
    let rel = rel.trim_start_matches('/');
    if rel.is_empty() {
        if base.is_empty() { "/".to_string() } else { base.to_string() }
    } else {
        format!("{}/{}", base, rel)
    }
}

/// Parent directory of a normalized path; `/` for top-level entries
pub fn parent(path: &str) -> &str {
    match path.trim_end_matches('/').rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Last component of a path
pub fn file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Validate a single path component such as a user id or key id
pub fn validate_component(name: &str) -> StorageResult<&str> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(StorageError::InvalidPath(name.to_string()));
    }
    Ok(name)
}

/// A path inside a user's home, split into its parts
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserPath<'a> {
    /// Owning user
    pub uid: &'a str,
    /// First directory below the home, e.g. `files`
    pub area: &'a str,
    /// Remainder below the area, `/`-prefixed, empty for the area itself
    pub rel: &'a str,
}

/// Split `/uid/area/rest` into its parts
pub fn split_user_path(path: &str) -> Option<UserPath<'_>> {
    let trimmed = path.strip_prefix('/')?;
    let (uid, rest) = trimmed.split_once('/')?;
    if uid.is_empty() {
        return None;
    }
    let (area, rel) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };
    if area.is_empty() {
        return None;
    }
    Some(UserPath { uid, area, rel })
}

/// Full path of a file in a user's `files` area
pub fn user_file_path(uid: &str, rel: &str) -> StorageResult<String> {
    validate_component(uid)?;
    normalize(&format!("/{}/{}/{}", uid, FILES_AREA, rel))
}
