//! Errors raised while reading, writing or validating `.hoard/config.toml`.

/// A configuration problem. Any of these makes the repository unusable until fixed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `config.toml` could not be read or written.
    #[error("cannot access config.toml: {0}")]
    IoError(#[from] std::io::Error),

    /// `config.toml` is not valid TOML or has values of the wrong type.
    #[error("invalid config.toml: {0}")]
    ParseError(String),

    /// A configuration could not be rendered as TOML.
    #[error("cannot write config.toml: {0}")]
    SerializeError(String),

    /// A remote name that has no `[remote.<name>]` section.
    #[error("unknown remote '{0}'")]
    UnknownRemote(String),

    /// A setting that must be present is absent or blank.
    #[error("config field '{0}' is required")]
    MissingField(String),

    /// A setting is present but out of range or inconsistent with another.
    #[error("invalid setting: {0}")]
    ValidationError(String),
}
