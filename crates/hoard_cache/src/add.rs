//! The add pipeline.
//!
//! `add` hashes each target, writes its content into the cache (or a
//! remote store), materializes it at its destination and records it in the
//! working manifest. Option combinations are rejected before any I/O.
//! Every target then succeeds or fails on its own: a failed target leaves
//! no manifest entry and does not affect the others.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use hoard_config::RepoConfig;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::error::CacheError;
use crate::hasher::{CancelFlag, ContentHasher};
use crate::manifest::{Manifest, ManifestEntry};
use crate::repo::Repository;
use crate::store::InsertStats;

/// Where added content goes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Destination {
    /// Track the target at its own path.
    #[default]
    InPlace,
    /// Track the target's content under another workspace path.
    Out(PathBuf),
    /// Send the content straight to a remote store instead of the local cache.
    ToRemote {
        /// Remote name; the configured default when `None`.
        remote: Option<String>,
        /// Parallel transfer jobs; the configured default when `None`.
        jobs: Option<usize>,
    },
}

impl Destination {
    /// Builds a destination from independent command-line style flags.
    ///
    /// `remote` and `remote_jobs` are only meaningful with `to_remote`, and
    /// `out` cannot be combined with it.
    pub fn from_flags(
        out: Option<PathBuf>,
        to_remote: bool,
        remote: Option<String>,
        remote_jobs: Option<usize>,
    ) -> Result<Self, CacheError> {
        if to_remote {
            if out.is_some() {
                return Err(CacheError::invalid("out", "cannot be combined with to_remote"));
            }
            return Ok(Destination::ToRemote {
                remote,
                jobs: remote_jobs,
            });
        }
        if remote.is_some() {
            return Err(CacheError::invalid("remote", "requires to_remote"));
        }
        if remote_jobs.is_some() {
            return Err(CacheError::invalid("remote_jobs", "requires to_remote"));
        }
        Ok(out.map_or(Destination::InPlace, Destination::Out))
    }

    fn option_name(&self) -> Option<&'static str> {
        match self {
            Destination::InPlace => None,
            Destination::Out(_) => Some("out"),
            Destination::ToRemote { .. } => Some("to_remote"),
        }
    }
}

/// Options for [`Repository::add`].
#[derive(Debug, Clone)]
pub struct AddOptions {
    /// Record fingerprints without writing content into the cache.
    pub no_commit: bool,
    /// Expand shell-style wildcards in each target.
    pub glob: bool,
    /// Where the content goes.
    pub destination: Destination,
    /// Overwrite an output already tracked with different content.
    pub force: bool,
    /// Replace the workspace copy with a link to the cached blob.
    pub relink: bool,
    /// Number of targets processed in parallel; rayon's default when `None`.
    pub jobs: Option<usize>,
    /// Raised by the caller to interrupt hashing.
    pub cancel: Option<CancelFlag>,
}

impl Default for AddOptions {
    fn default() -> Self {
        Self {
            no_commit: false,
            glob: false,
            destination: Destination::InPlace,
            force: false,
            relink: true,
            jobs: None,
            cancel: None,
        }
    }
}

impl AddOptions {
    /// Checks option combinations for `target_count` targets.
    pub fn validate(&self, target_count: usize, config: &RepoConfig) -> Result<(), CacheError> {
        if target_count == 0 {
            return Err(CacheError::invalid("targets", "at least one target is required"));
        }
        if let Some(option) = self.destination.option_name() {
            if target_count != 1 {
                return Err(CacheError::invalid(
                    option,
                    format!("requires exactly one target, got {target_count}"),
                ));
            }
            if self.glob {
                return Err(CacheError::invalid(option, "cannot be combined with glob"));
            }
            if self.no_commit {
                return Err(CacheError::invalid(option, "cannot be combined with no_commit"));
            }
        }
        if let Destination::ToRemote { jobs, .. } = &self.destination {
            if !config.transfer.enabled {
                return Err(CacheError::invalid(
                    "to_remote",
                    "remote-transfer mode is disabled; set transfer.enabled = true",
                ));
            }
            if *jobs == Some(0) {
                return Err(CacheError::invalid("remote_jobs", "must be at least 1"));
            }
        }
        if self.jobs == Some(0) {
            return Err(CacheError::invalid("jobs", "must be at least 1"));
        }
        Ok(())
    }
}

/// A successfully added target.
#[derive(Debug, Clone)]
pub struct AddedTarget {
    /// The manifest entry recorded for the target.
    pub entry: ManifestEntry,
    /// Blobs and listings newly written to the store.
    pub blobs_written: usize,
    /// `true` if the output was already tracked with the same content.
    pub unchanged: bool,
}

/// The outcome of one target.
#[derive(Debug)]
pub struct TargetOutcome {
    /// The target as resolved (after glob expansion).
    pub target: PathBuf,
    /// What happened to it.
    pub result: Result<AddedTarget, CacheError>,
}

/// Per-target outcomes of an add, in target order.
#[derive(Debug, Default)]
pub struct AddReport {
    /// One outcome per resolved target.
    pub outcomes: Vec<TargetOutcome>,
}

impl AddReport {
    /// Entries recorded by successful targets.
    pub fn entries(&self) -> Vec<&ManifestEntry> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().map(|a| &a.entry))
            .collect()
    }

    /// Failed targets and their errors.
    pub fn failures(&self) -> Vec<(&Path, &CacheError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.target.as_path(), e)))
            .collect()
    }

    /// Returns `true` if every target succeeded.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    /// Total blobs written across all targets.
    pub fn blobs_written(&self) -> usize {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .map(|a| a.blobs_written)
            .sum()
    }
}

pub(crate) fn run(
    repo: &Repository,
    targets: &[PathBuf],
    opts: &AddOptions,
) -> Result<AddReport, CacheError> {
    opts.validate(targets.len(), repo.config())?;
    if opts.glob {
        for target in targets {
            glob::Pattern::new(&target.to_string_lossy())
                .map_err(|e| CacheError::invalid("glob", format!("{}: {e}", target.display())))?;
        }
    }

    let resolved = dedupe(if opts.glob {
        expand_globs(repo.root(), targets)
    } else {
        targets.to_vec()
    });

    let add_all = || -> Vec<TargetOutcome> {
        resolved
            .par_iter()
            .map(|target| TargetOutcome {
                target: target.clone(),
                result: add_one(repo, target, opts),
            })
            .collect()
    };
    let outcomes = match opts.jobs {
        Some(jobs) => build_pool(jobs)?.install(add_all),
        None => add_all(),
    };

    if let Err(e) = repo.save_state() {
        warn!(error = %e, "failed to save hash state");
    }
    let report = AddReport { outcomes };
    info!(
        targets = report.outcomes.len(),
        failed = report.failures().len(),
        blobs_written = report.blobs_written(),
        "add finished"
    );
    Ok(report)
}

fn add_one(repo: &Repository, target: &Path, opts: &AddOptions) -> Result<AddedTarget, CacheError> {
    let (src, src_tracked) = repo.tracked_path(target)?;
    if std::fs::symlink_metadata(&src).is_err() {
        return Err(CacheError::TargetNotFound {
            path: target.to_path_buf(),
        });
    }
    let (dest, tracked) = match &opts.destination {
        Destination::Out(out) => repo.tracked_path(out)?,
        _ => (src.clone(), src_tracked),
    };

    let mut hasher = ContentHasher::new().with_state(repo.state());
    if let Some(cancel) = &opts.cancel {
        hasher = hasher.with_cancel(cancel);
    }
    let entry = hasher.hash_path(&src, &tracked)?;

    let lock = repo.output_lock(&tracked);
    let _guard = lock.lock();
    let unchanged = repo.with_manifest(|m| check_existing(m, &entry, opts.force))?;
    if let Destination::Out(_) = opts.destination {
        if !unchanged && !opts.force && std::fs::symlink_metadata(&dest).is_ok() {
            return Err(CacheError::OutputExists { path: dest });
        }
    }

    let stats = match &opts.destination {
        Destination::ToRemote { remote, jobs } => {
            let (store, jobs) = repo.remote_store(remote.as_deref(), *jobs)?;
            build_pool(jobs)?.install(|| store.insert_entry(&entry, &src))?
        }
        _ if opts.no_commit => InsertStats::default(),
        _ => repo.store().insert_entry(&entry, &src)?,
    };

    match &opts.destination {
        Destination::Out(_) => repo.store().checkout_entry(&entry, &dest, repo.link_types())?,
        Destination::InPlace if opts.relink && !opts.no_commit => {
            repo.store().checkout_entry(&entry, &src, repo.link_types())?
        }
        _ => {}
    }

    if !unchanged {
        repo.update_manifest(|manifest| {
            check_existing(manifest, &entry, opts.force)?;
            manifest.insert(entry.clone());
            Ok(())
        })?;
    }

    info!(
        output = %entry.path,
        fingerprint = %entry.fingerprint.short(),
        written = stats.written,
        unchanged,
        "added"
    );
    Ok(AddedTarget {
        entry,
        blobs_written: stats.written,
        unchanged,
    })
}

/// Checks `entry` against what `manifest` already tracks.
///
/// Returns `true` if the same content is already tracked at the same path.
fn check_existing(
    manifest: &Manifest,
    entry: &ManifestEntry,
    force: bool,
) -> Result<bool, CacheError> {
    if let Some(other) = manifest.overlapping(&entry.path) {
        return Err(CacheError::OverlappingOutput {
            path: entry.path.clone(),
            existing: other.path.clone(),
        });
    }
    match manifest.get(&entry.path) {
        Some(existing) if existing.fingerprint == entry.fingerprint && existing.kind == entry.kind => {
            Ok(true)
        }
        Some(existing) if !force => Err(CacheError::OutputAlreadyTracked {
            path: entry.path.clone(),
            existing: existing.fingerprint,
        }),
        _ => Ok(false),
    }
}

/// Expands wildcard targets relative to `root`.
///
/// A pattern matching nothing is kept literally so it fails as a missing
/// target.
fn expand_globs(root: &Path, targets: &[PathBuf]) -> Vec<PathBuf> {
    let mut out = Vec::new();
    for target in targets {
        let pattern = if target.is_absolute() {
            target.to_string_lossy().into_owned()
        } else {
            format!(
                "{}/{}",
                glob::Pattern::escape(&root.to_string_lossy()),
                target.to_string_lossy()
            )
        };
        let mut matched: Vec<PathBuf> = match glob::glob(&pattern) {
            Ok(paths) => paths
                .filter_map(|p| match p {
                    Ok(path) => Some(path),
                    Err(e) => {
                        warn!(error = %e, "skipping unreadable glob match");
                        None
                    }
                })
                .collect(),
            Err(_) => Vec::new(),
        };
        if matched.is_empty() {
            out.push(target.clone());
        } else {
            matched.sort();
            out.append(&mut matched);
        }
    }
    out
}

fn dedupe(targets: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    targets
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

fn build_pool(jobs: usize) -> Result<rayon::ThreadPool, CacheError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .build()
        .map_err(|e| CacheError::invalid("jobs", format!("cannot start {jobs} workers: {e}")))
}
