//! Snapshot diff engine.
//!
//! Compares two manifests and classifies each tracked path as added,
//! deleted, modified, renamed, or not in cache. Unchanged paths whose
//! content is cached appear in no category.
//!
//! Each category is sorted by path (renames by their old path), so two
//! results can be compared structurally.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use hoard_common::{is_same_or_descendant, normalize_tracked, Fingerprint};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CacheError;
use crate::manifest::{EntryKind, Manifest, ManifestEntry};
use crate::store::BlobIndex;

/// A path with a single fingerprint (added, deleted, not in cache).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathChange {
    /// The tracked path.
    pub path: String,
    /// Its fingerprint.
    pub hash: Fingerprint,
}

/// Old and new fingerprints of a modified path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashPair {
    /// Fingerprint in the baseline.
    pub old: Fingerprint,
    /// Fingerprint in the comparison point.
    pub new: Fingerprint,
}

/// A path whose content changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifiedChange {
    /// The tracked path.
    pub path: String,
    /// Old and new fingerprints.
    pub hash: HashPair,
}

/// Old and new paths of a renamed output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathPair {
    /// Path in the baseline.
    pub old: String,
    /// Path in the comparison point.
    pub new: String,
}

/// Content that moved to a new path unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenamedChange {
    /// Old and new paths.
    pub path: PathPair,
    /// The shared fingerprint.
    pub hash: Fingerprint,
}

/// The classified difference between two manifests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResult {
    /// Paths only in the comparison point.
    pub added: Vec<PathChange>,
    /// Paths only in the baseline.
    pub deleted: Vec<PathChange>,
    /// Paths whose fingerprint changed.
    pub modified: Vec<ModifiedChange>,
    /// Content that moved between paths.
    pub renamed: Vec<RenamedChange>,
    /// Unchanged paths whose content is missing from the cache.
    #[serde(rename = "not in cache")]
    pub not_in_cache: Vec<PathChange>,
}

impl DiffResult {
    /// Returns `true` if every category is empty.
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Number of records across all categories.
    pub fn total(&self) -> usize {
        self.added.len()
            + self.deleted.len()
            + self.modified.len()
            + self.renamed.len()
            + self.not_in_cache.len()
    }

    /// Serializes to the JSON interchange format.
    pub fn to_json(&self, pretty: bool) -> Result<String, CacheError> {
        let out = if pretty {
            serde_json::to_string_pretty(self)
        } else {
            serde_json::to_string(self)
        };
        out.map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })
    }
}

/// Restricts and shapes a diff.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffOptions {
    /// Only paths equal to or beneath one of these are compared. Empty means all.
    pub targets: Vec<String>,
    /// Compare the files inside tracked directories instead of whole directories.
    pub recursive: bool,
}

impl DiffOptions {
    /// Options comparing every tracked output as a whole.
    pub fn all() -> Self {
        Self::default()
    }
}

/// Classifies the differences between `old` (baseline) and `new`.
///
/// `cache` decides whether unchanged content is still restorable.
pub fn diff(
    old: &Manifest,
    new: &Manifest,
    opts: &DiffOptions,
    cache: &dyn BlobIndex,
) -> DiffResult {
    let targets: Vec<String> = opts
        .targets
        .iter()
        .map(|t| normalize_tracked(t))
        .collect();
    let old_flat = flatten(old, &targets, opts.recursive);
    let new_flat = flatten(new, &targets, opts.recursive);

    let mut result = DiffResult::default();
    let mut added: Vec<&ManifestEntry> = Vec::new();
    let mut deleted: Vec<&ManifestEntry> = Vec::new();

    for (path, a) in &old_flat {
        match new_flat.get(path) {
            None => deleted.push(a),
            Some(b) if a.fingerprint != b.fingerprint => result.modified.push(ModifiedChange {
                path: path.clone(),
                hash: HashPair {
                    old: a.fingerprint,
                    new: b.fingerprint,
                },
            }),
            Some(b) => {
                if !cache.has_entry(b) {
                    result.not_in_cache.push(PathChange {
                        path: path.clone(),
                        hash: b.fingerprint,
                    });
                }
            }
        }
    }
    for (path, b) in &new_flat {
        if !old_flat.contains_key(path) {
            added.push(b);
        }
    }

    // Pair each added path with the first unmatched deleted path holding the
    // same content. Both lists are in path order, so pairing is deterministic.
    let mut by_content: HashMap<(Fingerprint, EntryKind), VecDeque<&ManifestEntry>> =
        HashMap::new();
    for d in deleted.iter().copied() {
        by_content
            .entry((d.fingerprint, d.kind))
            .or_default()
            .push_back(d);
    }
    let mut renamed_old: HashSet<&str> = HashSet::new();
    for a in added {
        let matched = by_content
            .get_mut(&(a.fingerprint, a.kind))
            .and_then(VecDeque::pop_front);
        match matched {
            Some(d) => {
                renamed_old.insert(d.path.as_str());
                result.renamed.push(RenamedChange {
                    path: PathPair {
                        old: d.path.clone(),
                        new: a.path.clone(),
                    },
                    hash: a.fingerprint,
                });
            }
            None => result.added.push(PathChange {
                path: a.path.clone(),
                hash: a.fingerprint,
            }),
        }
    }
    result.deleted = deleted
        .into_iter()
        .filter(|d| !renamed_old.contains(d.path.as_str()))
        .map(|d| PathChange {
            path: d.path.clone(),
            hash: d.fingerprint,
        })
        .collect();

    result.added.sort_by(|x, y| x.path.cmp(&y.path));
    result.deleted.sort_by(|x, y| x.path.cmp(&y.path));
    result.modified.sort_by(|x, y| x.path.cmp(&y.path));
    result.renamed.sort_by(|x, y| x.path.old.cmp(&y.path.old));
    result.not_in_cache.sort_by(|x, y| x.path.cmp(&y.path));

    debug!(
        added = result.added.len(),
        deleted = result.deleted.len(),
        modified = result.modified.len(),
        renamed = result.renamed.len(),
        not_in_cache = result.not_in_cache.len(),
        "computed diff"
    );
    result
}

/// Flattens a manifest into the path-keyed entries being compared.
///
/// A directory is expanded into its files when `recursive` is set or when a
/// target lies strictly inside it. An empty directory has nothing to expand
/// into and stays as itself. Entries outside every target are dropped.
fn flatten(manifest: &Manifest, targets: &[String], recursive: bool) -> BTreeMap<String, ManifestEntry> {
    let selected = |path: &str| {
        targets.is_empty() || targets.iter().any(|t| is_same_or_descendant(path, t))
    };
    let mut flat = BTreeMap::new();
    for entry in manifest.iter() {
        let expand = entry.is_dir()
            && (recursive
                || targets
                    .iter()
                    .any(|t| t != &entry.path && is_same_or_descendant(t, &entry.path)));
        if expand && entry.children.is_empty() {
            if selected(&entry.path) {
                flat.insert(entry.path.clone(), entry.clone());
            }
        } else if expand {
            for child in entry.expanded_children() {
                if selected(&child.path) {
                    flat.insert(child.path.clone(), child);
                }
            }
        } else if selected(&entry.path) {
            flat.insert(entry.path.clone(), entry.clone());
        }
    }
    flat
}
