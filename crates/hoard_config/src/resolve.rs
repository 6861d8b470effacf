//! Remote resolution: picking a named or default remote from the configuration.

use crate::error::ConfigError;
use crate::types::RepoConfig;
use std::path::PathBuf;

/// A remote selected for a transfer, with its parallelism settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRemote {
    /// The remote name.
    pub name: String,
    /// Filesystem location of the remote store.
    pub location: PathBuf,
    /// Number of parallel transfer jobs (request override, then config, then 1).
    pub jobs: usize,
}

/// Resolves the remote a remote-destination add should write to.
///
/// An explicit `name` wins over `core.remote`. `jobs` overrides
/// `transfer.jobs`. Fails when no remote is named and no default is set.
pub fn resolve_remote(
    config: &RepoConfig,
    name: Option<&str>,
    jobs: Option<usize>,
) -> Result<ResolvedRemote, ConfigError> {
    let name = match name.or(config.core.remote.as_deref()) {
        Some(n) => n,
        None => return Err(ConfigError::MissingField("core.remote".to_string())),
    };
    let remote = config
        .remotes
        .get(name)
        .ok_or_else(|| ConfigError::UnknownRemote(name.to_string()))?;

    Ok(ResolvedRemote {
        name: name.to_string(),
        location: PathBuf::from(&remote.url),
        jobs: jobs.or(config.transfer.jobs).unwrap_or(1).max(1),
    })
}
