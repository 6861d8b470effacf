//! Error types for tracking, caching, and diff operations.

use std::path::PathBuf;

use hoard_common::Fingerprint;
use hoard_config::ConfigError;

/// Errors that can occur while adding, caching, or diffing tracked artifacts.
///
/// Every variant carries the path, fingerprint, or option name needed to act
/// on it. Use [`CacheError::kind`] to match on the category without
/// destructuring.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An I/O error occurred outside of a cache write.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A manifest file could not be parsed.
    #[error("failed to parse manifest {path}: {reason}")]
    ManifestParse {
        /// The manifest file path.
        path: PathBuf,
        /// Description of the parse failure.
        reason: String,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },

    /// The repository configuration is invalid or unreadable.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An add target does not exist.
    #[error("target not found: {path}")]
    TargetNotFound {
        /// The missing target path.
        path: PathBuf,
    },

    /// Mutually exclusive or incomplete options were supplied.
    #[error("invalid use of '{option}': {reason}")]
    InvalidArgumentCombination {
        /// The offending option.
        option: String,
        /// Why the combination is rejected.
        reason: String,
    },

    /// The output path is already tracked with different content.
    #[error("output '{path}' is already tracked as {existing}; use force to overwrite")]
    OutputAlreadyTracked {
        /// The tracked output path.
        path: String,
        /// Fingerprint of the existing manifest entry.
        existing: Fingerprint,
    },

    /// The output path overlaps another tracked output.
    #[error("output '{path}' overlaps tracked output '{existing}'")]
    OverlappingOutput {
        /// The requested output path.
        path: String,
        /// The tracked output it overlaps.
        existing: String,
    },

    /// An untracked file or directory already occupies the output path.
    #[error("{} already exists and is not tracked; use force to overwrite it", path.display())]
    OutputExists {
        /// The workspace path that would be replaced.
        path: PathBuf,
    },

    /// A path whose name is not valid UTF-8 and so has no tracked form.
    #[error("{} is not valid UTF-8 and cannot be tracked", path.display())]
    NonUtf8Path {
        /// The offending path.
        path: PathBuf,
    },

    /// Writing a blob into the cache store failed.
    #[error("failed to write {fingerprint} from {path} into the cache: {source}")]
    CacheWriteFailure {
        /// Fingerprint of the blob being written.
        fingerprint: Fingerprint,
        /// Source file of the blob.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A file changed between hashing and copying it into the cache.
    #[error("{path} changed while being cached: expected {expected}, got {actual}")]
    ContentChanged {
        /// The file that changed.
        path: PathBuf,
        /// Fingerprint computed while hashing.
        expected: Fingerprint,
        /// Fingerprint of the bytes actually copied.
        actual: Fingerprint,
    },

    /// No tracking metadata exists at the given root.
    #[error("no hoard repository found at {root}; run `hoard init` first")]
    RepositoryUninitialized {
        /// The directory that was searched.
        root: PathBuf,
    },

    /// A path lies outside the repository workspace.
    #[error("{path} is outside the repository")]
    OutsideRepository {
        /// The offending path.
        path: PathBuf,
    },

    /// Hashing was cancelled by the caller.
    #[error("interrupted while hashing {path}")]
    Interrupted {
        /// The file being hashed when cancellation was observed.
        path: PathBuf,
    },

    /// A remote-destination add named a remote that is not configured.
    #[error("remote '{name}' is not configured")]
    RemoteNotFound {
        /// The remote name (empty when no default remote is set).
        name: String,
    },

    /// A revision identifier did not resolve.
    #[error("unknown revision '{rev}'")]
    UnknownRevision {
        /// The revision as written by the caller.
        rev: String,
    },
}

/// The category of a [`CacheError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Rejected options; reported before any I/O.
    InvalidArgumentCombination,
    /// A missing add target.
    TargetNotFound,
    /// Overwrite of a tracked output without force, or overlapping outputs.
    OutputAlreadyTracked,
    /// A failed or inconsistent cache write.
    CacheWriteFailure,
    /// Missing tracking metadata.
    RepositoryUninitialized,
    /// Caller-requested cancellation.
    Interrupted,
    /// An unresolvable revision.
    UnknownRevision,
    /// Corrupt metadata or configuration.
    Corrupt,
    /// Any other I/O failure.
    Io,
}

impl CacheError {
    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CacheError::InvalidArgumentCombination { .. }
            | CacheError::OutsideRepository { .. }
            | CacheError::NonUtf8Path { .. }
            | CacheError::RemoteNotFound { .. } => ErrorKind::InvalidArgumentCombination,
            CacheError::TargetNotFound { .. } => ErrorKind::TargetNotFound,
            CacheError::OutputAlreadyTracked { .. }
            | CacheError::OverlappingOutput { .. }
            | CacheError::OutputExists { .. } => ErrorKind::OutputAlreadyTracked,
            CacheError::CacheWriteFailure { .. } | CacheError::ContentChanged { .. } => {
                ErrorKind::CacheWriteFailure
            }
            CacheError::RepositoryUninitialized { .. } => ErrorKind::RepositoryUninitialized,
            CacheError::Interrupted { .. } => ErrorKind::Interrupted,
            CacheError::UnknownRevision { .. } => ErrorKind::UnknownRevision,
            CacheError::ManifestParse { .. }
            | CacheError::Serialization { .. }
            | CacheError::Config(_) => ErrorKind::Corrupt,
            CacheError::Io { .. } => ErrorKind::Io,
        }
    }

    /// Shorthand for an [`InvalidArgumentCombination`](CacheError::InvalidArgumentCombination).
    pub(crate) fn invalid(option: &str, reason: impl Into<String>) -> Self {
        CacheError::InvalidArgumentCombination {
            option: option.to_string(),
            reason: reason.into(),
        }
    }

    /// Wraps an I/O error, mapping `NotFound` to [`CacheError::TargetNotFound`].
    pub(crate) fn from_target_io(path: PathBuf, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            CacheError::TargetNotFound { path }
        } else {
            CacheError::Io { path, source }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_display() {
        let err = CacheError::Io {
            path: PathBuf::from("/repo/.hoard/manifest.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let msg = err.to_string();
        assert!(msg.contains("I/O error"));
        assert!(msg.contains("manifest.json"));
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn invalid_argument_names_option() {
        let err = CacheError::invalid("out", "requires exactly one target");
        assert_eq!(
            err.to_string(),
            "invalid use of 'out': requires exactly one target"
        );
        assert_eq!(err.kind(), ErrorKind::InvalidArgumentCombination);
    }

    #[test]
    fn output_already_tracked_names_path_and_hash() {
        let existing = Fingerprint::from_bytes(b"old");
        let err = CacheError::OutputAlreadyTracked {
            path: "data/raw.csv".to_string(),
            existing,
        };
        let msg = err.to_string();
        assert!(msg.contains("data/raw.csv"));
        assert!(msg.contains(&existing.to_string()));
        assert_eq!(err.kind(), ErrorKind::OutputAlreadyTracked);
    }

    #[test]
    fn cache_write_failure_display() {
        let err = CacheError::CacheWriteFailure {
            fingerprint: Fingerprint::from_bytes(b"blob"),
            path: PathBuf::from("model.bin"),
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        };
        let msg = err.to_string();
        assert!(msg.contains("model.bin"));
        assert!(msg.contains("disk full"));
        assert_eq!(err.kind(), ErrorKind::CacheWriteFailure);
    }

    #[test]
    fn not_found_maps_to_target_not_found() {
        let err = CacheError::from_target_io(
            PathBuf::from("missing.csv"),
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(err, CacheError::TargetNotFound { .. }));
        assert_eq!(err.kind(), ErrorKind::TargetNotFound);
    }

    #[test]
    fn config_errors_are_corrupt() {
        let err = CacheError::from(ConfigError::ParseError("bad".to_string()));
        assert_eq!(err.kind(), ErrorKind::Corrupt);
        assert!(err.to_string().contains("bad"));
    }

    #[test]
    fn uninitialized_suggests_init() {
        let err = CacheError::RepositoryUninitialized {
            root: PathBuf::from("/work"),
        };
        assert!(err.to_string().contains("hoard init"));
        assert_eq!(err.kind(), ErrorKind::RepositoryUninitialized);
    }
}
