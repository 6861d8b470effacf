//! Manifests: the set of tracked outputs in one snapshot.
//!
//! The working manifest is stored as `.hoard/manifest.json`. Committed
//! revisions store immutable copies of it. Each entry maps a tracked output
//! path to its fingerprint; directory entries also carry the sorted list of
//! files they contain.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use hoard_common::{join_tracked, Fingerprint, FingerprintHasher};
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Name of the working manifest file within the `.hoard/` directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Current manifest format version. Increment on breaking layout changes.
pub const MANIFEST_FORMAT_VERSION: u32 = 1;

/// Domain separator mixed into directory fingerprints.
const DIR_DOMAIN: &[u8] = b"hoard-dir-v1\n";

/// Whether a tracked output is a single file or a directory tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// A regular file.
    File,
    /// A directory; its content is the set of files beneath it.
    Directory,
}

/// One tracked output (or, inside a directory entry, one contained file).
///
/// For top-level entries `path` is the tracked output path relative to the
/// repository root. For children it is relative to the parent directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Output path (top level) or path relative to the parent (children).
    pub path: String,

    /// Content fingerprint. For directories, derived from the children.
    #[serde(rename = "hash")]
    pub fingerprint: Fingerprint,

    /// File or directory.
    pub kind: EntryKind,

    /// Total size in bytes.
    pub size: u64,

    /// Files contained in a directory entry, sorted by relative path.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ManifestEntry>,
}

impl ManifestEntry {
    /// Creates a file entry.
    pub fn file(path: impl Into<String>, fingerprint: Fingerprint, size: u64) -> Self {
        Self {
            path: path.into(),
            fingerprint,
            kind: EntryKind::File,
            size,
            children: Vec::new(),
        }
    }

    /// Creates a directory entry from its files.
    ///
    /// Children are sorted by relative path before the directory fingerprint
    /// is computed, so enumeration order never affects the result.
    pub fn directory(path: impl Into<String>, mut children: Vec<ManifestEntry>) -> Self {
        children.sort_by(|a, b| a.path.cmp(&b.path));
        let fingerprint = directory_fingerprint(&children);
        let size = children.iter().map(|c| c.size).sum();
        Self {
            path: path.into(),
            fingerprint,
            kind: EntryKind::Directory,
            size,
            children,
        }
    }

    /// Returns `true` for directory entries.
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Returns a copy of this entry recorded under a different path.
    pub fn with_path(&self, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..self.clone()
        }
    }

    /// Returns the contained files as top-level entries (`dir/child`).
    pub fn expanded_children(&self) -> impl Iterator<Item = ManifestEntry> + '_ {
        self.children
            .iter()
            .map(move |c| c.with_path(join_tracked(&self.path, &c.path)))
    }
}

/// Computes the fingerprint of a directory from its (already sorted) files.
///
/// Each child contributes its relative path and fingerprint; the aggregate
/// depends only on the set of `(path, fingerprint)` pairs.
pub fn directory_fingerprint(sorted_children: &[ManifestEntry]) -> Fingerprint {
    let mut hasher = FingerprintHasher::new();
    hasher.update(DIR_DOMAIN);
    for child in sorted_children {
        hasher.update(child.path.as_bytes());
        hasher.update(b"\0");
        hasher.update(child.fingerprint.to_string().as_bytes());
        hasher.update(b"\n");
    }
    hasher.finish()
}

/// A mapping from tracked output path to its entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Manifest layout version.
    pub format_version: u32,

    /// Tracked outputs keyed by path.
    pub entries: BTreeMap<String, ManifestEntry>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}

impl Manifest {
    /// Creates an empty manifest.
    pub fn new() -> Self {
        Self {
            format_version: MANIFEST_FORMAT_VERSION,
            entries: BTreeMap::new(),
        }
    }

    /// Builds a manifest from entries; a later entry replaces an earlier one
    /// with the same path.
    pub fn from_entries(entries: impl IntoIterator<Item = ManifestEntry>) -> Self {
        let mut manifest = Self::new();
        for entry in entries {
            manifest.insert(entry);
        }
        manifest
    }

    /// Returns the entry tracked at `path`.
    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries.get(path)
    }

    /// Returns `true` if `path` is tracked.
    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Inserts or replaces an entry, returning the previous one.
    pub fn insert(&mut self, entry: ManifestEntry) -> Option<ManifestEntry> {
        self.entries.insert(entry.path.clone(), entry)
    }

    /// Removes the entry at `path`.
    pub fn remove(&mut self, path: &str) -> Option<ManifestEntry> {
        self.entries.remove(path)
    }

    /// Number of tracked outputs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over entries in path order.
    pub fn iter(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.values()
    }

    /// Returns the tracked output that `path` overlaps, other than `path` itself.
    ///
    /// Two outputs overlap when one is a directory prefix of the other.
    pub fn overlapping(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries.values().find(|e| {
            e.path != path
                && (hoard_common::is_same_or_descendant(path, &e.path)
                    || hoard_common::is_same_or_descendant(&e.path, path))
        })
    }

    /// Fingerprint of the canonical JSON form; equal manifests share it.
    pub fn digest(&self) -> Result<Fingerprint, CacheError> {
        Ok(Fingerprint::from_bytes(self.to_json()?.as_bytes()))
    }

    /// Serializes to pretty JSON.
    pub fn to_json(&self) -> Result<String, CacheError> {
        serde_json::to_string_pretty(self).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })
    }

    /// Loads a manifest from a JSON file.
    pub fn load(path: &Path) -> Result<Self, CacheError> {
        let content = std::fs::read_to_string(path).map_err(|e| CacheError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let manifest: Manifest =
            serde_json::from_str(&content).map_err(|e| CacheError::ManifestParse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        if manifest.format_version != MANIFEST_FORMAT_VERSION {
            return Err(CacheError::ManifestParse {
                path: path.to_path_buf(),
                reason: format!(
                    "unsupported format version {} (expected {MANIFEST_FORMAT_VERSION})",
                    manifest.format_version
                ),
            });
        }
        Ok(manifest)
    }

    /// Saves the manifest as JSON, replacing the file atomically.
    ///
    /// Creates the parent directory if it doesn't exist.
    pub fn save(&self, path: &Path) -> Result<(), CacheError> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(|e| CacheError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let json = self.to_json()?;
        let io_err = |source| CacheError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(json.as_bytes()).map_err(io_err)?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}
