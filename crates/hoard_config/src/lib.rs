//! Parsing and validation of `.hoard/config.toml` repository configuration.
//!
//! This crate reads the repository configuration file and produces a
//! strongly-typed [`RepoConfig`] with cache link strategies, remote
//! definitions, and remote-transfer settings.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod resolve;
pub mod types;

pub use error::ConfigError;
pub use loader::{load_config, load_config_from_str, save_config, CONFIG_FILE};
pub use resolve::{resolve_remote, ResolvedRemote};
pub use types::*;
