//! The repository handle.
//!
//! A `Repository` ties together the configuration, cache store, working
//! manifest, hash-state database and revision log found under `.hoard/`.
//! It is created explicitly by [`Repository::init`], [`Repository::open`] or
//! [`Repository::discover`] and passed to every operation.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use hoard_common::to_tracked_path;
use hoard_config::{load_config, resolve_remote, save_config, ConfigError, LinkType, RepoConfig, CONFIG_FILE};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::add::{self, AddOptions, AddReport};
use crate::diff::{diff, DiffOptions, DiffResult};
use crate::error::CacheError;
use crate::manifest::{Manifest, ManifestEntry, MANIFEST_FILE};
use crate::revision::{Revision, RevisionLog, RevisionRecord, RevisionResolver};
use crate::state::HashState;
use crate::store::CacheStore;
use crate::workspace::workspace_manifest;

/// Name of the metadata directory at the repository root.
pub const HOARD_DIR: &str = ".hoard";

const TMP_DIR: &str = "tmp";
const REVISIONS_DIR: &str = "revisions";

/// An open artifact repository.
#[derive(Debug)]
pub struct Repository {
    root: PathBuf,
    hoard_dir: PathBuf,
    config: RepoConfig,
    store: CacheStore,
    manifest: RwLock<Manifest>,
    state: HashState,
    revisions: RevisionLog,
    output_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Repository {
    /// Creates tracking metadata at `root` and opens it.
    ///
    /// Fails if a repository already exists unless `force` is set, in which
    /// case configuration, working manifest and history are reset. Cached
    /// blobs are kept.
    pub fn init(root: &Path, force: bool) -> Result<Self, CacheError> {
        let hoard_dir = root.join(HOARD_DIR);
        if hoard_dir.exists() {
            if !force {
                return Err(CacheError::invalid(
                    "init",
                    format!("{} is already a hoard repository", root.display()),
                ));
            }
            for stale in [hoard_dir.join(MANIFEST_FILE), hoard_dir.join(CONFIG_FILE)] {
                remove_if_exists(&stale, false)?;
            }
            remove_if_exists(&hoard_dir.join(REVISIONS_DIR), true)?;
        }

        for dir in [
            hoard_dir.clone(),
            hoard_dir.join(TMP_DIR),
            hoard_dir.join(REVISIONS_DIR),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| CacheError::Io {
                path: dir.clone(),
                source: e,
            })?;
        }
        let config = RepoConfig::default();
        save_config(&hoard_dir, &config)?;
        Manifest::new().save(&hoard_dir.join(MANIFEST_FILE))?;

        let repo = Self::open(root)?;
        repo.store.ensure_dirs()?;
        info!(root = %repo.root.display(), "initialized repository");
        Ok(repo)
    }

    /// Opens the repository rooted at `root`.
    pub fn open(root: &Path) -> Result<Self, CacheError> {
        let uninitialized = || CacheError::RepositoryUninitialized {
            root: root.to_path_buf(),
        };
        if !root.join(HOARD_DIR).is_dir() {
            return Err(uninitialized());
        }
        let root = std::fs::canonicalize(root).map_err(|e| CacheError::Io {
            path: root.to_path_buf(),
            source: e,
        })?;
        let hoard_dir = root.join(HOARD_DIR);

        let config = if hoard_dir.join(CONFIG_FILE).is_file() {
            load_config(&hoard_dir)?
        } else {
            RepoConfig::default()
        };
        let cache_dir = {
            let dir = Path::new(&config.cache.dir);
            if dir.is_absolute() {
                dir.to_path_buf()
            } else {
                hoard_dir.join(dir)
            }
        };
        let store = CacheStore::new(cache_dir).with_protection(config.cache.protected);

        let manifest_path = hoard_dir.join(MANIFEST_FILE);
        let manifest = if manifest_path.is_file() {
            Manifest::load(&manifest_path)?
        } else {
            Manifest::new()
        };
        let state = if config.state.enabled {
            HashState::load(&hoard_dir.join(TMP_DIR))
        } else {
            HashState::in_memory()
        };
        let revisions = RevisionLog::new(hoard_dir.join(REVISIONS_DIR));

        debug!(root = %root.display(), outputs = manifest.len(), "opened repository");
        Ok(Self {
            root,
            hoard_dir,
            config,
            store,
            manifest: RwLock::new(manifest),
            state,
            revisions,
            output_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Opens the repository containing `start`, searching parent directories.
    pub fn discover(start: &Path) -> Result<Self, CacheError> {
        let start_abs = std::fs::canonicalize(start).map_err(|e| CacheError::Io {
            path: start.to_path_buf(),
            source: e,
        })?;
        match start_abs.ancestors().find(|dir| dir.join(HOARD_DIR).is_dir()) {
            Some(root) => Self::open(root),
            None => Err(CacheError::RepositoryUninitialized {
                root: start.to_path_buf(),
            }),
        }
    }

    /// The workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The `.hoard/` directory.
    pub fn hoard_dir(&self) -> &Path {
        &self.hoard_dir
    }

    /// The loaded configuration.
    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    /// The local cache store.
    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// The hash-state database.
    pub fn state(&self) -> &HashState {
        &self.state
    }

    /// The revision history.
    pub fn revisions(&self) -> &RevisionLog {
        &self.revisions
    }

    /// Configured link strategies, in order of preference.
    pub fn link_types(&self) -> &[LinkType] {
        &self.config.cache.link_types
    }

    /// A snapshot of the working manifest.
    pub fn manifest(&self) -> Manifest {
        self.manifest.read().clone()
    }

    /// Runs `f` against the working manifest under its read lock.
    pub(crate) fn with_manifest<T>(&self, f: impl FnOnce(&Manifest) -> T) -> T {
        f(&self.manifest.read())
    }

    /// Resolves a user-supplied path to its location on disk and its tracked path.
    ///
    /// Relative paths are taken relative to the repository root. The path
    /// need not exist. Paths outside the workspace or inside `.hoard/` are
    /// rejected.
    pub fn tracked_path(&self, target: &Path) -> Result<(PathBuf, String), CacheError> {
        let joined = if target.is_absolute() {
            target.to_path_buf()
        } else {
            self.root.join(target)
        };
        let abs = resolve_existing(&lexical_normalize(&joined));
        if abs.strip_prefix(&self.root).is_ok_and(|rel| rel.to_str().is_none()) {
            return Err(CacheError::NonUtf8Path {
                path: target.to_path_buf(),
            });
        }
        let tracked = to_tracked_path(&self.root, &abs).ok_or_else(|| CacheError::OutsideRepository {
            path: target.to_path_buf(),
        })?;
        if hoard_common::is_same_or_descendant(&tracked, HOARD_DIR) {
            return Err(CacheError::invalid(
                "target",
                format!("{} is repository metadata and cannot be tracked", target.display()),
            ));
        }
        Ok((abs, tracked))
    }

    /// The on-disk location of a tracked path.
    pub fn workspace_path(&self, tracked: &str) -> PathBuf {
        tracked
            .split('/')
            .fold(self.root.clone(), |path, part| path.join(part))
    }

    /// The lock serializing writes to one output path.
    pub(crate) fn output_lock(&self, tracked: &str) -> Arc<Mutex<()>> {
        self.output_locks
            .lock()
            .entry(tracked.to_string())
            .or_default()
            .clone()
    }

    /// Applies `f` to a copy of the working manifest and persists the result.
    ///
    /// The in-memory manifest is replaced only after the new one is saved,
    /// so a failure leaves both untouched.
    pub(crate) fn update_manifest<T>(
        &self,
        f: impl FnOnce(&mut Manifest) -> Result<T, CacheError>,
    ) -> Result<T, CacheError> {
        let mut guard = self.manifest.write();
        let mut next = guard.clone();
        let out = f(&mut next)?;
        next.save(&self.hoard_dir.join(MANIFEST_FILE))?;
        *guard = next;
        Ok(out)
    }

    /// The store a remote-destination add writes to, with its job count.
    pub(crate) fn remote_store(
        &self,
        remote: Option<&str>,
        jobs: Option<usize>,
    ) -> Result<(CacheStore, usize), CacheError> {
        let resolved = resolve_remote(&self.config, remote, jobs).map_err(|e| match e {
            ConfigError::UnknownRemote(name) => CacheError::RemoteNotFound { name },
            ConfigError::MissingField(_) => CacheError::invalid(
                "to_remote",
                "no remote named and core.remote is not set",
            ),
            other => CacheError::Config(other),
        })?;
        let location = if resolved.location.is_absolute() {
            resolved.location
        } else {
            self.root.join(resolved.location)
        };
        debug!(remote = %resolved.name, location = %location.display(), "resolved remote");
        Ok((
            CacheStore::new(location).with_protection(self.config.cache.protected),
            resolved.jobs,
        ))
    }

    /// Persists the hash-state database.
    pub fn save_state(&self) -> Result<(), CacheError> {
        self.state.save()
    }

    /// Tracks `targets`, reporting a separate outcome per target.
    ///
    /// Option errors are returned before any target is touched.
    pub fn add(&self, targets: &[PathBuf], opts: &AddOptions) -> Result<AddReport, CacheError> {
        add::run(self, targets, opts)
    }

    /// Stops tracking an output. Its cached content and workspace copy stay.
    ///
    /// Returns the removed entry, or `None` if the path was not tracked.
    pub fn untrack(&self, target: &Path) -> Result<Option<ManifestEntry>, CacheError> {
        let (_, tracked) = self.tracked_path(target)?;
        let lock = self.output_lock(&tracked);
        let _guard = lock.lock();
        let removed = self.update_manifest(|m| Ok(m.remove(&tracked)))?;
        if removed.is_some() {
            info!(output = %tracked, "untracked");
        }
        Ok(removed)
    }

    /// Freezes the working manifest as a new revision.
    pub fn commit(&self, message: &str) -> Result<RevisionRecord, CacheError> {
        let manifest = self.manifest();
        self.revisions.commit(&manifest, message)
    }

    /// Compares revision `a` with `b` (the workspace when `None`).
    ///
    /// A repository with no committed revision yields an empty result.
    pub fn diff_revisions(
        &self,
        a: &Revision,
        b: Option<&Revision>,
        opts: &DiffOptions,
    ) -> Result<DiffResult, CacheError> {
        if !self.revisions.has_history()? {
            debug!("no committed revisions; diff is empty");
            return Ok(DiffResult::default());
        }
        let old = self.resolve(a)?.unwrap_or_default();
        let new = self.resolve(b.unwrap_or(&Revision::Workspace))?.unwrap_or_default();
        let result = diff(&old, &new, opts, &self.store);
        info!(
            from = %a,
            to = %b.unwrap_or(&Revision::Workspace),
            changes = result.total(),
            "diff complete"
        );
        Ok(result)
    }
}

impl RevisionResolver for Repository {
    fn resolve(&self, rev: &Revision) -> Result<Option<Manifest>, CacheError> {
        match rev {
            Revision::Workspace => workspace_manifest(self).map(Some),
            other => self.revisions.resolve(other),
        }
    }

    fn has_history(&self) -> Result<bool, CacheError> {
        self.revisions.has_history()
    }
}

fn remove_if_exists(path: &Path, dir: bool) -> Result<(), CacheError> {
    let result = if dir {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    match result {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(CacheError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
        _ => Ok(()),
    }
}

/// Removes `.` and resolves `..` without touching the filesystem.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalizes the directories above `path`. The final component is kept
/// as written, so a symlinked output still names itself.
fn resolve_existing(path: &Path) -> PathBuf {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => resolve_ancestors(parent).join(name),
        _ => resolve_ancestors(path),
    }
}

/// Canonicalizes the longest existing ancestor of `path`, keeping the rest.
fn resolve_ancestors(path: &Path) -> PathBuf {
    let mut suffix = Vec::new();
    let mut current = path;
    loop {
        if let Ok(canonical) = std::fs::canonicalize(current) {
            return suffix
                .iter()
                .rev()
                .fold(canonical, |acc: PathBuf, part| acc.join(part));
        }
        match (current.parent(), current.file_name()) {
            (Some(parent), Some(name)) => {
                suffix.push(name.to_os_string());
                current = parent;
            }
            _ => return path.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn init_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path(), false).unwrap();
        let hoard = dir.path().join(HOARD_DIR);
        assert!(hoard.join(CONFIG_FILE).is_file());
        assert!(hoard.join(MANIFEST_FILE).is_file());
        assert!(hoard.join("cache").join("files").is_dir());
        assert!(hoard.join(REVISIONS_DIR).is_dir());
        assert!(repo.manifest().is_empty());
    }

    #[test]
    fn reinit_requires_force() {
        let dir = tempfile::tempdir().unwrap();
        Repository::init(dir.path(), false).unwrap();
        let err = Repository::init(dir.path(), false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgumentCombination);
        Repository::init(dir.path(), true).unwrap();
    }

    #[test]
    fn open_uninitialized_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = Repository::open(dir.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RepositoryUninitialized);
    }

    #[test]
    fn discover_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        Repository::init(dir.path(), false).unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        let repo = Repository::discover(&nested).unwrap();
        assert_eq!(repo.root(), std::fs::canonicalize(dir.path()).unwrap());
    }

    #[test]
    fn tracked_paths() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path(), false).unwrap();

        let (abs, tracked) = repo.tracked_path(Path::new("data/./raw.csv")).unwrap();
        assert_eq!(tracked, "data/raw.csv");
        assert_eq!(abs, repo.root().join("data").join("raw.csv"));
        assert_eq!(repo.workspace_path(&tracked), abs);

        let err = repo.tracked_path(Path::new("../outside.csv")).unwrap_err();
        assert!(matches!(err, CacheError::OutsideRepository { .. }));
        let err = repo.tracked_path(Path::new(".hoard/config.toml")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgumentCombination);
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_output_keeps_its_own_path() {
        let dir = tempfile::tempdir().unwrap();
        Repository::init(dir.path(), false).unwrap();
        let hoard_dir = dir.path().join(HOARD_DIR);
        let mut config = load_config(&hoard_dir).unwrap();
        config.cache.link_types = vec![LinkType::Symlink];
        save_config(&hoard_dir, &config).unwrap();
        let repo = Repository::open(dir.path()).unwrap();

        std::fs::write(dir.path().join("a.bin"), b"linked").unwrap();
        let first = repo
            .add(&[PathBuf::from("a.bin")], &AddOptions::default())
            .unwrap();
        assert!(first.is_success());
        let link = dir.path().join("a.bin");
        assert!(std::fs::symlink_metadata(&link).unwrap().file_type().is_symlink());

        let (abs, tracked) = repo.tracked_path(Path::new("a.bin")).unwrap();
        assert_eq!(tracked, "a.bin");
        assert_eq!(abs, repo.root().join("a.bin"));

        let again = repo
            .add(&[PathBuf::from("a.bin")], &AddOptions::default())
            .unwrap();
        assert!(again.outcomes[0].result.as_ref().unwrap().unchanged);
        assert!(repo.untrack(Path::new("a.bin")).unwrap().is_some());
        assert!(repo.manifest().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_target_is_rejected() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path(), false).unwrap();
        let err = repo
            .tracked_path(Path::new(OsStr::from_bytes(b"raw\xff.csv")))
            .unwrap_err();
        assert!(matches!(err, CacheError::NonUtf8Path { .. }));
        assert_eq!(err.kind(), ErrorKind::InvalidArgumentCombination);
    }

    #[test]
    fn diff_without_history_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path(), false).unwrap();
        let result = repo
            .diff_revisions(&Revision::Head, None, &DiffOptions::all())
            .unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn update_manifest_failure_leaves_manifest_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path(), false).unwrap();
        let err = repo
            .update_manifest(|m| {
                m.insert(crate::manifest::ManifestEntry::file(
                    "x",
                    hoard_common::Fingerprint::from_bytes(b"x"),
                    1,
                ));
                Err::<(), _>(CacheError::invalid("test", "abort"))
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgumentCombination);
        assert!(repo.manifest().is_empty());
    }

    #[test]
    fn untrack_removes_entry_only() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path(), false).unwrap();
        std::fs::write(dir.path().join("a"), b"a").unwrap();
        repo.add(&[PathBuf::from("a")], &AddOptions::default())
            .unwrap();

        let removed = repo.untrack(Path::new("a")).unwrap().unwrap();
        assert!(repo.manifest().is_empty());
        assert!(dir.path().join("a").is_file());
        assert!(repo.store().blob_path(&removed.fingerprint).is_file());
        assert!(repo.untrack(Path::new("a")).unwrap().is_none());
    }

    #[test]
    fn unknown_remote_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path(), false).unwrap();
        let err = repo.remote_store(Some("nowhere"), None).unwrap_err();
        assert!(matches!(err, CacheError::RemoteNotFound { ref name } if name == "nowhere"));
    }
}
