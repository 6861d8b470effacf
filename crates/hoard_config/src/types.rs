//! Configuration types deserialized from `.hoard/config.toml`.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// The top-level repository configuration parsed from `.hoard/config.toml`.
///
/// Every section is optional; a missing section takes its default values,
/// so an empty file is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Core repository settings (default remote).
    #[serde(default)]
    pub core: CoreConfig,
    /// Cache store settings (location, link strategies, protection).
    #[serde(default)]
    pub cache: CacheConfig,
    /// Hash-state database settings.
    #[serde(default)]
    pub state: StateConfig,
    /// Remote-transfer mode settings.
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Named directory remotes.
    #[serde(default, rename = "remote")]
    pub remotes: BTreeMap<String, RemoteConfig>,
}

/// Core settings shared by all commands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Remote used when a remote-destination add names none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
}

/// Cache store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache directory, relative to `.hoard/` unless absolute.
    #[serde(default = "default_cache_dir")]
    pub dir: String,
    /// Strategies for linking cached blobs into the workspace, tried in order.
    ///
    /// Accepts either a single string (`type = "copy"`) or a list
    /// (`type = ["reflink", "copy"]`).
    #[serde(
        default = "default_link_types",
        rename = "type",
        deserialize_with = "deserialize_link_types"
    )]
    pub link_types: Vec<LinkType>,
    /// Mark cached blobs read-only so hard links cannot corrupt the cache.
    #[serde(default = "default_true")]
    pub protected: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            link_types: default_link_types(),
            protected: true,
        }
    }
}

/// Hash-state database configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateConfig {
    /// Reuse fingerprints of files whose size and mtime are unchanged.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Remote-transfer mode configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Whether adds may send content straight to a remote.
    #[serde(default)]
    pub enabled: bool,
    /// Default number of parallel transfer jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jobs: Option<usize>,
}

/// A directory remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Filesystem location of the remote store.
    pub url: String,
}

/// A strategy for materializing a cached blob in the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    /// Copy-on-write clone, where the filesystem supports it.
    Reflink,
    /// Hard link to the cached blob.
    Hardlink,
    /// Symbolic link to the cached blob.
    Symlink,
    /// Plain byte copy (always works).
    Copy,
}

impl LinkType {
    /// Returns the configuration spelling of this link type.
    pub fn as_str(self) -> &'static str {
        match self {
            LinkType::Reflink => "reflink",
            LinkType::Hardlink => "hardlink",
            LinkType::Symlink => "symlink",
            LinkType::Copy => "copy",
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reflink" => Ok(LinkType::Reflink),
            "hardlink" => Ok(LinkType::Hardlink),
            "symlink" => Ok(LinkType::Symlink),
            "copy" => Ok(LinkType::Copy),
            other => Err(format!("unknown link type '{other}'")),
        }
    }
}

fn default_cache_dir() -> String {
    "cache".to_string()
}

fn default_link_types() -> Vec<LinkType> {
    vec![LinkType::Reflink, LinkType::Copy]
}

fn default_true() -> bool {
    true
}

/// Deserializes a link-type field that can be either a single string or a list.
///
/// A comma-separated string (`"reflink,copy"`) is accepted as well.
fn deserialize_link_types<'de, D>(deserializer: D) -> Result<Vec<LinkType>, D::Error>
where
    D: Deserializer<'de>,
{
    struct StringOrVec;

    impl<'de> Visitor<'de> for StringOrVec {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a string or a list of strings")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(v.split(',').map(|s| s.to_string()).collect())
        }

        fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut vec = Vec::new();
            while let Some(val) = seq.next_element::<String>()? {
                vec.push(val);
            }
            Ok(vec)
        }
    }

    deserializer
        .deserialize_any(StringOrVec)?
        .iter()
        .map(|s| s.parse::<LinkType>().map_err(de::Error::custom))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_config_from_str;

    #[test]
    fn link_type_single_string() {
        let config = load_config_from_str("[cache]\ntype = \"hardlink\"\n").unwrap();
        assert_eq!(config.cache.link_types, vec![LinkType::Hardlink]);
    }

    #[test]
    fn link_type_list() {
        let config = load_config_from_str("[cache]\ntype = [\"symlink\", \"copy\"]\n").unwrap();
        assert_eq!(
            config.cache.link_types,
            vec![LinkType::Symlink, LinkType::Copy]
        );
    }

    #[test]
    fn link_type_comma_separated() {
        let config = load_config_from_str("[cache]\ntype = \"reflink, hardlink\"\n").unwrap();
        assert_eq!(
            config.cache.link_types,
            vec![LinkType::Reflink, LinkType::Hardlink]
        );
    }

    #[test]
    fn link_type_unknown_rejected() {
        assert!(load_config_from_str("[cache]\ntype = \"teleport\"\n").is_err());
    }

    #[test]
    fn link_type_display_matches_config_spelling() {
        for lt in [
            LinkType::Reflink,
            LinkType::Hardlink,
            LinkType::Symlink,
            LinkType::Copy,
        ] {
            assert_eq!(lt.to_string().parse::<LinkType>().unwrap(), lt);
        }
    }

    #[test]
    fn remotes_table() {
        let toml = r#"
[core]
remote = "backup"

[remote.backup]
url = "/mnt/backup"

[remote.scratch]
url = "/tmp/scratch"
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.remotes.len(), 2);
        assert_eq!(config.remotes["backup"].url, "/mnt/backup");
        assert_eq!(config.core.remote.as_deref(), Some("backup"));
    }
}
