//! Hash-state database.
//!
//! Remembers the fingerprint of every file hashed so far, keyed by absolute
//! path and validated against the file's size and modification time. A hit
//! lets the hasher skip reading the file again. The database is persisted
//! with bincode at `.hoard/tmp/state.bin`; a missing, corrupt, or
//! version-mismatched file is treated as empty.

use std::collections::HashMap;
use std::fs::Metadata;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use hoard_common::Fingerprint;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::CacheError;

/// File name of the persisted state database.
pub const STATE_FILE: &str = "state.bin";

/// Current state database format version.
const STATE_FORMAT_VERSION: u32 = 1;

/// Records whose mtime lies within this window of the recording time are not
/// trusted: a write in the same timestamp granule would go unnoticed.
const RACY_WINDOW_NS: u128 = 2_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StateRecord {
    size: u64,
    mtime_ns: u128,
    recorded_ns: u128,
    fingerprint: Fingerprint,
}

#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    format_version: u32,
    records: HashMap<PathBuf, StateRecord>,
}

/// Thread-safe map from file path to its last known fingerprint.
#[derive(Debug)]
pub struct HashState {
    path: Option<PathBuf>,
    records: Mutex<HashMap<PathBuf, StateRecord>>,
    dirty: Mutex<bool>,
}

impl HashState {
    /// Creates an empty database that is never persisted.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: Mutex::new(HashMap::new()),
            dirty: Mutex::new(false),
        }
    }

    /// Loads the database from `<dir>/state.bin`.
    ///
    /// Never fails: unreadable or stale data yields an empty database that
    /// will be written back to the same location on [`save`](Self::save).
    pub fn load(dir: &Path) -> Self {
        let path = dir.join(STATE_FILE);
        let records = match std::fs::read(&path) {
            Ok(raw) => match bincode::serde::decode_from_slice::<StateFile, _>(
                &raw,
                bincode::config::standard(),
            ) {
                Ok((file, _)) if file.format_version == STATE_FORMAT_VERSION => file.records,
                Ok((file, _)) => {
                    warn!(
                        path = %path.display(),
                        version = file.format_version,
                        "discarding hash-state database with unsupported version"
                    );
                    HashMap::new()
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "discarding corrupt hash-state database");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        debug!(path = %path.display(), records = records.len(), "loaded hash state");
        Self {
            path: Some(path),
            records: Mutex::new(records),
            dirty: Mutex::new(false),
        }
    }

    /// Returns the recorded fingerprint if `path` still matches `meta`.
    pub fn lookup(&self, path: &Path, meta: &Metadata) -> Option<Fingerprint> {
        let mtime_ns = mtime_ns(meta)?;
        let records = self.records.lock();
        let record = records.get(path)?;
        let trusted = record.size == meta.len()
            && record.mtime_ns == mtime_ns
            && record.mtime_ns + RACY_WINDOW_NS < record.recorded_ns;
        trusted.then_some(record.fingerprint)
    }

    /// Records the fingerprint computed for `path` with metadata `meta`.
    pub fn record(&self, path: &Path, meta: &Metadata, fingerprint: Fingerprint) {
        let Some(mtime_ns) = mtime_ns(meta) else {
            return;
        };
        let record = StateRecord {
            size: meta.len(),
            mtime_ns,
            recorded_ns: now_ns(),
            fingerprint,
        };
        let previous = self.records.lock().insert(path.to_path_buf(), record.clone());
        if previous.as_ref() != Some(&record) {
            *self.dirty.lock() = true;
        }
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns `true` if no records are held.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Writes the database back to disk if anything changed.
    pub fn save(&self) -> Result<(), CacheError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut dirty = self.dirty.lock();
        if !*dirty {
            return Ok(());
        }
        let file = StateFile {
            format_version: STATE_FORMAT_VERSION,
            records: self.records.lock().clone(),
        };
        let bytes = bincode::serde::encode_to_vec(&file, bincode::config::standard()).map_err(
            |e| CacheError::Serialization {
                reason: e.to_string(),
            },
        )?;

        let dir = path.parent().unwrap_or(Path::new("."));
        let io_err = |source| CacheError::Io {
            path: path.clone(),
            source,
        };
        std::fs::create_dir_all(dir).map_err(io_err)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(&bytes).map_err(io_err)?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;
        *dirty = false;
        debug!(path = %path.display(), records = file.records.len(), "saved hash state");
        Ok(())
    }
}

fn mtime_ns(meta: &Metadata) -> Option<u128> {
    let modified = meta.modified().ok()?;
    Some(modified.duration_since(UNIX_EPOCH).ok()?.as_nanos())
}

fn now_ns() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}
