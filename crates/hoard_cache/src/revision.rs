//! Committed revisions and revision resolution.
//!
//! `hoard commit` freezes the working manifest into
//! `.hoard/revisions/<id>.json` and appends a record to
//! `.hoard/revisions/log.json`. The diff engine compares manifests that a
//! [`RevisionResolver`] produces from a [`Revision`].

use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use hoard_common::Fingerprint;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::CacheError;
use crate::manifest::Manifest;

const LOG_FILE: &str = "log.json";

/// Shortest revision id prefix accepted.
const MIN_ID_PREFIX: usize = 4;

/// A point in history whose manifest can be compared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Revision {
    /// The live workspace, re-hashed on demand.
    Workspace,
    /// The latest committed revision.
    Head,
    /// The n-th ancestor of the latest revision (`HEAD~n`).
    HeadAncestor(usize),
    /// A committed revision named by (a prefix of) its id.
    Id(String),
}

impl FromStr for Revision {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || CacheError::UnknownRevision { rev: s.to_string() };
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("workspace") {
            return Ok(Revision::Workspace);
        }
        if let Some(rest) = trimmed.strip_prefix("HEAD") {
            return match rest {
                "" => Ok(Revision::Head),
                "^" | "~" => Ok(Revision::HeadAncestor(1)),
                _ => {
                    let n = rest
                        .strip_prefix('~')
                        .and_then(|n| n.parse::<usize>().ok())
                        .ok_or_else(unknown)?;
                    Ok(if n == 0 {
                        Revision::Head
                    } else {
                        Revision::HeadAncestor(n)
                    })
                }
            };
        }
        let is_id = (MIN_ID_PREFIX..=32).contains(&trimmed.len())
            && trimmed.bytes().all(|b| b.is_ascii_hexdigit());
        if is_id {
            Ok(Revision::Id(trimmed.to_ascii_lowercase()))
        } else {
            Err(unknown())
        }
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Revision::Workspace => f.write_str("workspace"),
            Revision::Head => f.write_str("HEAD"),
            Revision::HeadAncestor(n) => write!(f, "HEAD~{n}"),
            Revision::Id(id) => f.write_str(id),
        }
    }
}

/// Produces the manifest valid at a revision.
pub trait RevisionResolver {
    /// Resolves `rev`; `Ok(None)` means nothing has been committed yet.
    fn resolve(&self, rev: &Revision) -> Result<Option<Manifest>, CacheError>;

    /// Returns `true` once at least one revision has been committed.
    fn has_history(&self) -> Result<bool, CacheError>;
}

/// One committed revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionRecord {
    /// Revision id (32 hex characters).
    pub id: String,
    /// Id of the previous revision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Digest of the committed manifest.
    pub manifest: Fingerprint,
    /// Commit message.
    pub message: String,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
    /// Number of tracked outputs.
    pub entries: usize,
}

impl RevisionRecord {
    /// First eight characters of the id.
    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(8)]
    }
}

/// The append-only history stored under `.hoard/revisions/`.
#[derive(Debug)]
pub struct RevisionLog {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl RevisionLog {
    /// Opens the log stored in `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    /// All records, oldest first. A missing log is an empty history.
    pub fn records(&self) -> Result<Vec<RevisionRecord>, CacheError> {
        let path = self.dir.join(LOG_FILE);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CacheError::Io { path, source: e }),
        };
        serde_json::from_str(&raw).map_err(|e| CacheError::ManifestParse {
            path,
            reason: e.to_string(),
        })
    }

    /// All records, newest first.
    pub fn entries(&self) -> Result<Vec<RevisionRecord>, CacheError> {
        let mut records = self.records()?;
        records.reverse();
        Ok(records)
    }

    /// The latest record, if any.
    pub fn head(&self) -> Result<Option<RevisionRecord>, CacheError> {
        Ok(self.records()?.pop())
    }

    /// Freezes `manifest` as a new revision on top of the current head.
    pub fn commit(&self, manifest: &Manifest, message: &str) -> Result<RevisionRecord, CacheError> {
        let _guard = self.lock.lock();
        let mut records = self.records()?;
        let parent = records.last().map(|r| r.id.clone());
        let digest = manifest.digest()?;
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let seed = format!(
            "{}\n{digest}\n{message}\n{created_at}\n{}",
            parent.as_deref().unwrap_or(""),
            records.len()
        );
        let record = RevisionRecord {
            id: Fingerprint::from_bytes(seed.as_bytes()).to_string(),
            parent,
            manifest: digest,
            message: message.to_string(),
            created_at,
            entries: manifest.len(),
        };

        manifest.save(&self.manifest_path(&record.id))?;
        records.push(record.clone());
        self.write_log(&records)?;
        info!(id = %record.short_id(), entries = record.entries, "committed revision");
        Ok(record)
    }

    /// Finds the committed record `rev` names.
    ///
    /// `HEAD` and its ancestors resolve to `None` on an empty history.
    pub fn find(&self, rev: &Revision) -> Result<Option<RevisionRecord>, CacheError> {
        let records = self.records()?;
        let unknown = || CacheError::UnknownRevision {
            rev: rev.to_string(),
        };
        match rev {
            Revision::Workspace => Err(unknown()),
            Revision::Head => Ok(records.last().cloned()),
            Revision::HeadAncestor(n) => {
                if records.is_empty() {
                    return Ok(None);
                }
                n.checked_add(1)
                    .and_then(|back| records.len().checked_sub(back))
                    .map(|i| Some(records[i].clone()))
                    .ok_or_else(unknown)
            }
            Revision::Id(prefix) => {
                let mut matches = records.iter().filter(|r| r.id.starts_with(prefix.as_str()));
                match (matches.next(), matches.next()) {
                    (Some(r), None) => Ok(Some(r.clone())),
                    _ => Err(unknown()),
                }
            }
        }
    }

    /// Loads the manifest frozen by `record`.
    pub fn load_manifest(&self, record: &RevisionRecord) -> Result<Manifest, CacheError> {
        Manifest::load(&self.manifest_path(&record.id))
    }

    fn manifest_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn write_log(&self, records: &[RevisionRecord]) -> Result<(), CacheError> {
        let path = self.dir.join(LOG_FILE);
        let json = serde_json::to_string_pretty(records).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;
        let io_err = |source| CacheError::Io {
            path: path.clone(),
            source,
        };
        std::fs::create_dir_all(&self.dir).map_err(io_err)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(io_err)?;
        tmp.write_all(json.as_bytes()).map_err(io_err)?;
        tmp.persist(&path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}

impl RevisionResolver for RevisionLog {
    fn resolve(&self, rev: &Revision) -> Result<Option<Manifest>, CacheError> {
        match self.find(rev)? {
            Some(record) => Ok(Some(self.load_manifest(&record)?)),
            None => Ok(None),
        }
    }

    fn has_history(&self) -> Result<bool, CacheError> {
        Ok(!self.records()?.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestEntry;

    fn manifest(tag: &str) -> Manifest {
        Manifest::from_entries([ManifestEntry::file(
            "data.csv",
            Fingerprint::from_bytes(tag.as_bytes()),
            1,
        )])
    }

    #[test]
    fn parse_revisions() {
        assert_eq!("HEAD".parse::<Revision>().unwrap(), Revision::Head);
        assert_eq!("HEAD~0".parse::<Revision>().unwrap(), Revision::Head);
        assert_eq!("HEAD^".parse::<Revision>().unwrap(), Revision::HeadAncestor(1));
        assert_eq!("HEAD~3".parse::<Revision>().unwrap(), Revision::HeadAncestor(3));
        assert_eq!("workspace".parse::<Revision>().unwrap(), Revision::Workspace);
        assert_eq!(
            "ABCD12".parse::<Revision>().unwrap(),
            Revision::Id("abcd12".to_string())
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        for bad in ["HEAD~x", "main", "abc", "HEAD@{1}"] {
            let err = bad.parse::<Revision>().unwrap_err();
            assert!(matches!(err, CacheError::UnknownRevision { .. }), "{bad}");
        }
    }

    #[test]
    fn display_roundtrips() {
        for rev in [
            Revision::Workspace,
            Revision::Head,
            Revision::HeadAncestor(2),
            Revision::Id("deadbeef".to_string()),
        ] {
            assert_eq!(rev.to_string().parse::<Revision>().unwrap(), rev);
        }
    }

    #[test]
    fn empty_history_resolves_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let log = RevisionLog::new(dir.path());
        assert!(!log.has_history().unwrap());
        assert!(log.resolve(&Revision::Head).unwrap().is_none());
        assert!(log.resolve(&Revision::HeadAncestor(2)).unwrap().is_none());
    }

    #[test]
    fn commit_and_resolve_history() {
        let dir = tempfile::tempdir().unwrap();
        let log = RevisionLog::new(dir.path().join("revisions"));
        let first = log.commit(&manifest("v1"), "first").unwrap();
        let second = log.commit(&manifest("v2"), "second").unwrap();

        assert_eq!(second.parent.as_deref(), Some(first.id.as_str()));
        assert_ne!(first.id, second.id);
        assert_eq!(log.resolve(&Revision::Head).unwrap(), Some(manifest("v2")));
        assert_eq!(
            log.resolve(&Revision::HeadAncestor(1)).unwrap(),
            Some(manifest("v1"))
        );
        assert_eq!(
            log.resolve(&Revision::Id(first.id[..8].to_string())).unwrap(),
            Some(manifest("v1"))
        );

        let ids: Vec<String> = log.entries().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[test]
    fn ancestor_past_root_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let log = RevisionLog::new(dir.path());
        log.commit(&manifest("v1"), "only").unwrap();
        let err = log.resolve(&Revision::HeadAncestor(1)).unwrap_err();
        assert!(matches!(err, CacheError::UnknownRevision { ref rev } if rev == "HEAD~1"));
    }

    #[test]
    fn huge_ancestor_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let log = RevisionLog::new(dir.path());
        log.commit(&manifest("v1"), "only").unwrap();
        let rev: Revision = format!("HEAD~{}", usize::MAX).parse().unwrap();
        assert_eq!(rev, Revision::HeadAncestor(usize::MAX));
        let err = log.resolve(&rev).unwrap_err();
        assert!(matches!(err, CacheError::UnknownRevision { .. }));
    }

    #[test]
    fn unknown_id_errors() {
        let dir = tempfile::tempdir().unwrap();
        let log = RevisionLog::new(dir.path());
        let head = log.commit(&manifest("v1"), "only").unwrap();
        let flipped = if head.id.starts_with('0') { "1" } else { "0" };
        let other = format!("{flipped}{}", &head.id[1..]);
        let err = log.resolve(&Revision::Id(other)).unwrap_err();
        assert!(matches!(err, CacheError::UnknownRevision { .. }));
    }
}
