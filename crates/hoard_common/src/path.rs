//! Workspace-relative path helpers.
//!
//! Manifests key their entries by forward-slash separated paths relative to
//! the repository root (`data/raw.csv`), independent of the host platform.

use std::path::{Component, Path};

/// Converts `path` into a tracked path relative to `root`.
///
/// Both paths should be absolute (or both relative to the same base).
/// Returns `None` if `path` does not live under `root`, equals `root`,
/// contains `..` components after the prefix is stripped, or has a component
/// that is not valid UTF-8. Lossy conversion would let distinct files share
/// one tracked path.
pub fn to_tracked_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Normalizes a user-supplied tracked path.
///
/// Backslashes become forward slashes, `.` segments and empty segments are
/// dropped, so `./data//raw.csv/` becomes `data/raw.csv`.
pub fn normalize_tracked(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|seg| !seg.is_empty() && *seg != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Joins a child's relative path onto a tracked parent path.
pub fn join_tracked(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{parent}/{child}")
    }
}

/// Returns `true` if `path` equals `ancestor` or lies beneath it.
pub fn is_same_or_descendant(path: &str, ancestor: &str) -> bool {
    path == ancestor
        || (path.len() > ancestor.len()
            && path.starts_with(ancestor)
            && path.as_bytes()[ancestor.len()] == b'/')
}
