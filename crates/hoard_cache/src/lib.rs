//! Content-addressed artifact tracking.
//!
//! This crate is the engine behind `hoard`: it fingerprints files and
//! directory trees, stores their content in a content-addressed cache,
//! records tracked outputs in a [`Manifest`], and classifies the differences
//! between two manifests into added, deleted, modified, renamed, and
//! not-in-cache paths.
//!
//! Every operation goes through an explicit [`Repository`] handle created by
//! [`Repository::init`] or [`Repository::open`].

#![warn(missing_docs)]

pub mod add;
pub mod diff;
pub mod error;
pub mod hasher;
pub mod manifest;
pub mod repo;
pub mod revision;
pub mod state;
pub mod store;
pub mod workspace;

pub use add::{AddOptions, AddReport, AddedTarget, Destination, TargetOutcome};
pub use diff::{
    diff, DiffOptions, DiffResult, HashPair, ModifiedChange, PathChange, PathPair, RenamedChange,
};
pub use error::{CacheError, ErrorKind};
pub use hasher::{CancelFlag, ContentHasher};
pub use hoard_common::Fingerprint;
pub use manifest::{EntryKind, Manifest, ManifestEntry};
pub use repo::{Repository, HOARD_DIR};
pub use revision::{Revision, RevisionLog, RevisionRecord, RevisionResolver};
pub use state::HashState;
pub use store::{BlobIndex, CacheStore, InsertOutcome, InsertStats};
