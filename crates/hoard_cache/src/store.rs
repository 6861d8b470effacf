//! Content-addressed cache store.
//!
//! Blobs live at `<root>/files/<first 2 hex>/<remaining 30 hex>`, directory
//! listings next to them with a `.dir` suffix. Every write goes to a temp
//! file under `<root>/tmp/` first and is moved into place with a no-clobber
//! rename, so concurrent inserts of the same fingerprint are safe and a
//! failed insert never leaves a partial blob behind.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use hoard_common::{Fingerprint, FingerprintHasher};
use hoard_config::LinkType;
use rayon::prelude::*;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::manifest::{EntryKind, ManifestEntry};

const FILES_DIR: &str = "files";
const TMP_DIR: &str = "tmp";
const LISTING_SUFFIX: &str = ".dir";

/// Result of a single insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The blob was written.
    Inserted,
    /// A blob with the same fingerprint already existed; nothing was written.
    AlreadyPresent,
}

/// Counts of blobs written and skipped while inserting an entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertStats {
    /// Blobs (and listings) newly written.
    pub written: usize,
    /// Blobs (and listings) already present.
    pub present: usize,
}

impl InsertStats {
    fn count(&mut self, outcome: InsertOutcome) {
        match outcome {
            InsertOutcome::Inserted => self.written += 1,
            InsertOutcome::AlreadyPresent => self.present += 1,
        }
    }

    fn merge(mut self, other: InsertStats) -> Self {
        self.written += other.written;
        self.present += other.present;
        self
    }
}

/// Answers whether content is available in a store.
///
/// The diff engine uses this to detect tracked paths whose content is
/// missing from the cache.
pub trait BlobIndex {
    /// Returns `true` if a blob with this fingerprint is stored.
    fn has_blob(&self, fingerprint: &Fingerprint) -> bool;

    /// Returns `true` if a directory listing with this fingerprint is stored.
    fn has_listing(&self, fingerprint: &Fingerprint) -> bool {
        self.has_blob(fingerprint)
    }

    /// Returns `true` if everything needed to restore `entry` is stored.
    fn has_entry(&self, entry: &ManifestEntry) -> bool {
        match entry.kind {
            EntryKind::File => self.has_blob(&entry.fingerprint),
            EntryKind::Directory => {
                self.has_listing(&entry.fingerprint)
                    && entry.children.iter().all(|c| self.has_blob(&c.fingerprint))
            }
        }
    }
}

impl BlobIndex for HashSet<Fingerprint> {
    fn has_blob(&self, fingerprint: &Fingerprint) -> bool {
        self.contains(fingerprint)
    }
}

/// A content-addressed blob store rooted at a directory.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
    protected: bool,
}

impl CacheStore {
    /// Creates a store rooted at `root`. Directories are created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            protected: false,
        }
    }

    /// Marks newly written blobs read-only when `protected` is set.
    pub fn with_protection(mut self, protected: bool) -> Self {
        self.protected = protected;
        self
    }

    /// The store's root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the blob and temp directories if they don't exist.
    pub fn ensure_dirs(&self) -> Result<(), CacheError> {
        for sub in [FILES_DIR, TMP_DIR] {
            let dir = self.root.join(sub);
            std::fs::create_dir_all(&dir).map_err(|e| CacheError::Io {
                path: dir,
                source: e,
            })?;
        }
        Ok(())
    }

    /// Location of the blob for `fingerprint`.
    pub fn blob_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        let hex = fingerprint.to_string();
        let (prefix, rest) = hex.split_at(2);
        self.root.join(FILES_DIR).join(prefix).join(rest)
    }

    /// Location of the directory listing for `fingerprint`.
    pub fn listing_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        let mut path = self.blob_path(fingerprint).into_os_string();
        path.push(LISTING_SUFFIX);
        PathBuf::from(path)
    }

    /// Copies `src` into the store under `expected`.
    ///
    /// The bytes are re-hashed while copying; if they no longer match
    /// `expected` the insert fails with [`CacheError::ContentChanged`] and
    /// nothing is stored.
    pub fn insert_file(
        &self,
        src: &Path,
        expected: Fingerprint,
    ) -> Result<InsertOutcome, CacheError> {
        let dest = self.blob_path(&expected);
        if dest.is_file() {
            return Ok(InsertOutcome::AlreadyPresent);
        }
        let write_err = |source: io::Error| CacheError::CacheWriteFailure {
            fingerprint: expected,
            path: src.to_path_buf(),
            source,
        };

        self.ensure_dirs()?;
        let mut tmp = NamedTempFile::new_in(self.root.join(TMP_DIR)).map_err(write_err)?;
        let mut reader = File::open(src).map_err(|e| CacheError::from_target_io(src.to_path_buf(), e))?;
        let mut hasher = FingerprintHasher::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf).map_err(|e| CacheError::Io {
                path: src.to_path_buf(),
                source: e,
            })?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            tmp.write_all(&buf[..n]).map_err(write_err)?;
        }
        let actual = hasher.finish();
        if actual != expected {
            return Err(CacheError::ContentChanged {
                path: src.to_path_buf(),
                expected,
                actual,
            });
        }

        let outcome = self.persist(tmp, &dest).map_err(write_err)?;
        debug!(fingerprint = %expected.short(), src = %src.display(), ?outcome, "cached blob");
        Ok(outcome)
    }

    /// Stores the children listing of a directory entry.
    pub fn insert_listing(&self, entry: &ManifestEntry) -> Result<InsertOutcome, CacheError> {
        let dest = self.listing_path(&entry.fingerprint);
        if dest.is_file() {
            return Ok(InsertOutcome::AlreadyPresent);
        }
        let json = serde_json::to_vec(&entry.children).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;
        let write_err = |source: io::Error| CacheError::CacheWriteFailure {
            fingerprint: entry.fingerprint,
            path: dest.clone(),
            source,
        };

        self.ensure_dirs()?;
        let mut tmp = NamedTempFile::new_in(self.root.join(TMP_DIR)).map_err(write_err)?;
        tmp.write_all(&json).map_err(write_err)?;
        self.persist(tmp, &dest).map_err(write_err)
    }

    /// Reads back the children listing of a cached directory.
    pub fn read_listing(&self, fingerprint: &Fingerprint) -> Result<Vec<ManifestEntry>, CacheError> {
        let path = self.listing_path(fingerprint);
        let raw = std::fs::read(&path).map_err(|e| CacheError::Io {
            path: path.clone(),
            source: e,
        })?;
        serde_json::from_slice(&raw).map_err(|e| CacheError::ManifestParse {
            path,
            reason: e.to_string(),
        })
    }

    /// Inserts every blob `entry` needs, reading content from `src`.
    ///
    /// Directory children are inserted in parallel on the current rayon pool;
    /// the listing is written last so a directory never looks cached before
    /// all of its files are.
    pub fn insert_entry(&self, entry: &ManifestEntry, src: &Path) -> Result<InsertStats, CacheError> {
        let mut stats = InsertStats::default();
        match entry.kind {
            EntryKind::File => stats.count(self.insert_file(src, entry.fingerprint)?),
            EntryKind::Directory => {
                stats = entry
                    .children
                    .par_iter()
                    .map(|child| {
                        let mut s = InsertStats::default();
                        s.count(self.insert_file(&src.join(&child.path), child.fingerprint)?);
                        Ok::<_, CacheError>(s)
                    })
                    .try_reduce(InsertStats::default, |a, b| Ok(a.merge(b)))?;
                stats.count(self.insert_listing(entry)?);
            }
        }
        Ok(stats)
    }

    /// Materializes the blob for `fingerprint` at `dest`.
    ///
    /// Strategies are tried in order until one succeeds. The new file is
    /// created under a temporary name and renamed over `dest`, so an
    /// existing file at `dest` is replaced atomically.
    pub fn link(
        &self,
        fingerprint: &Fingerprint,
        dest: &Path,
        link_types: &[LinkType],
    ) -> Result<LinkType, CacheError> {
        let blob = self.blob_path(fingerprint);
        let io_err = |source| CacheError::Io {
            path: dest.to_path_buf(),
            source,
        };
        let parent = match dest.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent).map_err(io_err)?;

        let mut last_err = io::Error::new(io::ErrorKind::Unsupported, "no link type configured");
        for &link_type in link_types {
            let tmp = tempfile::Builder::new()
                .prefix(".hoard-link-")
                .tempfile_in(parent)
                .map_err(io_err)?
                .into_temp_path();
            std::fs::remove_file(&tmp).map_err(io_err)?;

            match materialize(&blob, &tmp, link_type) {
                Ok(()) => {
                    tmp.persist(dest).map_err(|e| io_err(e.error))?;
                    debug!(fingerprint = %fingerprint.short(), dest = %dest.display(), %link_type, "linked");
                    return Ok(link_type);
                }
                Err(e) => {
                    warn!(
                        dest = %dest.display(),
                        %link_type,
                        error = %e,
                        "link strategy failed, trying next"
                    );
                    last_err = e;
                }
            }
        }
        Err(io_err(last_err))
    }

    /// Materializes a whole entry (file or directory tree) at `dest`.
    ///
    /// Files already present under `dest` but absent from the entry are left
    /// untouched.
    pub fn checkout_entry(
        &self,
        entry: &ManifestEntry,
        dest: &Path,
        link_types: &[LinkType],
    ) -> Result<(), CacheError> {
        match entry.kind {
            EntryKind::File => {
                self.link(&entry.fingerprint, dest, link_types)?;
            }
            EntryKind::Directory => {
                std::fs::create_dir_all(dest).map_err(|e| CacheError::Io {
                    path: dest.to_path_buf(),
                    source: e,
                })?;
                entry.children.par_iter().try_for_each(|child| {
                    self.link(&child.fingerprint, &dest.join(&child.path), link_types)
                        .map(|_| ())
                })?;
            }
        }
        Ok(())
    }

    fn persist(&self, tmp: NamedTempFile, dest: &Path) -> io::Result<InsertOutcome> {
        if self.protected {
            let mut perms = tmp.as_file().metadata()?.permissions();
            perms.set_readonly(true);
            tmp.as_file().set_permissions(perms)?;
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match tmp.persist_noclobber(dest) {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                Ok(InsertOutcome::AlreadyPresent)
            }
            Err(e) => Err(e.error),
        }
    }
}

impl BlobIndex for CacheStore {
    fn has_blob(&self, fingerprint: &Fingerprint) -> bool {
        self.blob_path(fingerprint).is_file()
    }

    fn has_listing(&self, fingerprint: &Fingerprint) -> bool {
        self.listing_path(fingerprint).is_file()
    }
}

fn materialize(blob: &Path, dest: &Path, link_type: LinkType) -> io::Result<()> {
    match link_type {
        LinkType::Reflink => {
            reflink::reflink(blob, dest)?;
            make_writable(dest)
        }
        LinkType::Hardlink => std::fs::hard_link(blob, dest),
        LinkType::Symlink => symlink(blob, dest),
        LinkType::Copy => {
            std::fs::copy(blob, dest)?;
            make_writable(dest)
        }
    }
}

#[cfg(unix)]
fn symlink(blob: &Path, dest: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(blob, dest)
}

#[cfg(not(unix))]
fn symlink(_blob: &Path, _dest: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symlinks are only supported on unix",
    ))
}

/// Workspace copies must stay editable even when the cached blob is read-only.
#[allow(clippy::permissions_set_readonly_false)]
fn make_writable(path: &Path) -> io::Result<()> {
    let mut perms = std::fs::metadata(path)?.permissions();
    if perms.readonly() {
        perms.set_readonly(false);
        std::fs::set_permissions(path, perms)?;
    }
    Ok(())
}
