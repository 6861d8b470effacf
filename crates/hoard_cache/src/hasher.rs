//! Content hashing of files and directory trees.
//!
//! Files are fingerprinted by streaming their bytes through XXH3-128.
//! Directories are fingerprinted from the sorted list of files beneath them
//! (see [`ManifestEntry::directory`]), so enumeration order never matters.
//! Hashing consults the [`HashState`] database when one is attached and can
//! be interrupted between files through a [`CancelFlag`].

use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hoard_common::Fingerprint;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::CacheError;
use crate::manifest::ManifestEntry;
use crate::repo::HOARD_DIR;
use crate::state::HashState;

/// A shared flag a caller raises to stop long-running hashing.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Creates a lowered flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once the flag has been raised.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Computes fingerprints for files and directories.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentHasher<'a> {
    state: Option<&'a HashState>,
    cancel: Option<&'a CancelFlag>,
}

impl<'a> ContentHasher<'a> {
    /// Creates a hasher with no state database and no cancellation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reuses fingerprints from `state` for unchanged files and records new ones.
    pub fn with_state(mut self, state: &'a HashState) -> Self {
        self.state = Some(state);
        self
    }

    /// Checks `cancel` before every file.
    pub fn with_cancel(mut self, cancel: &'a CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Hashes a single file, returning its fingerprint and size.
    pub fn hash_file(&self, path: &Path) -> Result<(Fingerprint, u64), CacheError> {
        self.check_cancel(path)?;
        let meta = std::fs::metadata(path)
            .map_err(|e| CacheError::from_target_io(path.to_path_buf(), e))?;

        if let Some(fp) = self.state.and_then(|s| s.lookup(path, &meta)) {
            debug!(path = %path.display(), fingerprint = %fp.short(), "hash state hit");
            return Ok((fp, meta.len()));
        }

        let file = File::open(path).map_err(|e| CacheError::from_target_io(path.to_path_buf(), e))?;
        let (fp, size) = Fingerprint::from_reader(file).map_err(|e| CacheError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        if let Some(state) = self.state {
            state.record(path, &meta, fp);
        }
        debug!(path = %path.display(), fingerprint = %fp.short(), size, "hashed file");
        Ok((fp, size))
    }

    /// Hashes the file or directory at `fs_path` into an entry tracked as `tracked`.
    ///
    /// Directories are walked recursively; only regular files contribute and
    /// empty subdirectories are ignored.
    pub fn hash_path(&self, fs_path: &Path, tracked: &str) -> Result<ManifestEntry, CacheError> {
        let meta = std::fs::metadata(fs_path)
            .map_err(|e| CacheError::from_target_io(fs_path.to_path_buf(), e))?;
        if meta.is_dir() {
            self.hash_dir(fs_path, tracked)
        } else {
            let (fp, size) = self.hash_file(fs_path)?;
            Ok(ManifestEntry::file(tracked, fp, size))
        }
    }

    fn hash_dir(&self, dir: &Path, tracked: &str) -> Result<ManifestEntry, CacheError> {
        let mut children = Vec::new();
        let walker = WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.file_name() != HOARD_DIR);

        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(dir).to_path_buf();
                CacheError::Io {
                    path,
                    source: e.into(),
                }
            })?;
            let file_path = entry.path();
            if !file_path.is_file() {
                continue;
            }
            let rel = hoard_common::to_tracked_path(dir, file_path).ok_or_else(|| {
                CacheError::NonUtf8Path {
                    path: file_path.to_path_buf(),
                }
            })?;
            let (fp, size) = self.hash_file(file_path)?;
            children.push(ManifestEntry::file(rel, fp, size));
        }

        let entry = ManifestEntry::directory(tracked, children);
        debug!(
            path = %dir.display(),
            fingerprint = %entry.fingerprint.short(),
            files = entry.children.len(),
            "hashed directory"
        );
        Ok(entry)
    }

    fn check_cancel(&self, path: &Path) -> Result<(), CacheError> {
        match self.cancel {
            Some(flag) if flag.is_cancelled() => Err(CacheError::Interrupted {
                path: path.to_path_buf(),
            }),
            _ => Ok(()),
        }
    }
}
