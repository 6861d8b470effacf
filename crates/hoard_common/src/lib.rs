//! Shared foundational types used across the Hoard artifact tracker.
//!
//! This crate provides the content [`Fingerprint`] that keys every cached blob,
//! a streaming hasher for large files, and helpers for normalizing the
//! workspace-relative paths that manifests are keyed by.

#![warn(missing_docs)]

pub mod hash;
pub mod path;

pub use hash::{Fingerprint, FingerprintHasher, ParseFingerprintError};
pub use path::{is_same_or_descendant, join_tracked, normalize_tracked, to_tracked_path};
