//! Live workspace state as a manifest.

use rayon::prelude::*;
use tracing::debug;

use crate::error::CacheError;
use crate::hasher::ContentHasher;
use crate::manifest::Manifest;
use crate::repo::Repository;

/// Re-hashes every tracked output on disk into a manifest.
///
/// Outputs missing from the workspace are left out, so they diff as
/// deleted. Unchanged files are served from the hash-state database.
pub fn workspace_manifest(repo: &Repository) -> Result<Manifest, CacheError> {
    let tracked = repo.manifest();
    let hasher = ContentHasher::new().with_state(repo.state());

    let entries = tracked
        .entries
        .par_iter()
        .filter_map(|(path, _)| {
            let fs_path = repo.workspace_path(path);
            if fs_path.exists() {
                Some(hasher.hash_path(&fs_path, path))
            } else {
                debug!(path = %path, "tracked output missing from workspace");
                None
            }
        })
        .collect::<Result<Vec<_>, CacheError>>()?;

    repo.save_state()?;
    Ok(Manifest::from_entries(entries))
}
