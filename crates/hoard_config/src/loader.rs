//! Reading, writing and validating `.hoard/config.toml`.

use crate::error::ConfigError;
use crate::types::RepoConfig;
use std::path::Path;

/// Name of the configuration file within the `.hoard/` directory.
pub const CONFIG_FILE: &str = "config.toml";

/// Loads and validates the configuration from a `.hoard/` directory.
///
/// Reads `<hoard_dir>/config.toml`, parses it, and validates cross-field rules.
pub fn load_config(hoard_dir: &Path) -> Result<RepoConfig, ConfigError> {
    let config_path = hoard_dir.join(CONFIG_FILE);
    let content = std::fs::read_to_string(&config_path)?;
    load_config_from_str(&content)
}

/// Parses and validates a configuration from a string.
///
/// Used by `load_config` and by tests that build configs inline.
pub fn load_config_from_str(content: &str) -> Result<RepoConfig, ConfigError> {
    let config: RepoConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Writes the configuration to `<hoard_dir>/config.toml`.
pub fn save_config(hoard_dir: &Path, config: &RepoConfig) -> Result<(), ConfigError> {
    validate_config(config)?;
    let text =
        toml::to_string_pretty(config).map_err(|e| ConfigError::SerializeError(e.to_string()))?;
    std::fs::write(hoard_dir.join(CONFIG_FILE), text)?;
    Ok(())
}

/// Validates that configuration values are consistent.
fn validate_config(config: &RepoConfig) -> Result<(), ConfigError> {
    if config.cache.dir.trim().is_empty() {
        return Err(ConfigError::MissingField("cache.dir".to_string()));
    }
    if config.cache.link_types.is_empty() {
        return Err(ConfigError::ValidationError(
            "cache.type must list at least one link type".to_string(),
        ));
    }
    if let Some(name) = &config.core.remote {
        if !config.remotes.contains_key(name) {
            return Err(ConfigError::UnknownRemote(name.clone()));
        }
    }
    for (name, remote) in &config.remotes {
        if remote.url.trim().is_empty() {
            return Err(ConfigError::MissingField(format!("remote.{name}.url")));
        }
    }
    if config.transfer.jobs == Some(0) {
        return Err(ConfigError::ValidationError(
            "transfer.jobs must be at least 1".to_string(),
        ));
    }
    Ok(())
}
