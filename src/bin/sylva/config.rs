use std::fs;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use sylva::storage::btree::{BPlusTreeOptions, CachePolicy};
use sylva::{KeyCodec, ValCodec};
use thiserror::Error;

/// Key encodings the CLI can decode.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum KeyType {
    #[default]
    U64,
    String,
    Bytes,
}

/// Value encodings the CLI can decode.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ValueType {
    U64,
    #[default]
    String,
    Bytes,
}

/// Tree layout read from `--config`.
///
/// Every field is optional; absent fields keep the library defaults.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TreeConfig {
    pub block_size: Option<u32>,
    pub cache_policy: Option<CachePolicy>,
    pub minimum_child_nodes: Option<usize>,
    pub maximum_child_nodes: Option<usize>,
    pub minimum_value_nodes: Option<usize>,
    pub maximum_value_nodes: Option<usize>,
    pub key_type: Option<KeyType>,
    pub value_type: Option<ValueType>,
}

impl TreeConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Options for the tree file at `path`.
    pub fn options<K, V>(&self, path: &Path) -> BPlusTreeOptions<K, V>
    where
        K: KeyCodec + Ord,
        V: ValCodec,
    {
        let mut options = BPlusTreeOptions::new().disk(path);
        if let Some(block_size) = self.block_size {
            options = options.file_block_size(block_size);
        }
        if let Some(policy) = self.cache_policy {
            options = options.cache_policy(policy);
        }
        let children = (
            self.minimum_child_nodes.unwrap_or(options.minimum_child_nodes),
            self.maximum_child_nodes.unwrap_or(options.maximum_child_nodes),
        );
        let values = (
            self.minimum_value_nodes.unwrap_or(options.minimum_value_nodes),
            self.maximum_value_nodes.unwrap_or(options.maximum_value_nodes),
        );
        options
            .child_nodes(children.0, children.1)
            .value_nodes(values.0, values.1)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config: TreeConfig = toml::from_str(
            "cache_policy = \"none\"\nmaximum_value_nodes = 16\nkey_type = \"string\"\n",
        )
        .unwrap();
        assert_eq!(config.cache_policy, Some(CachePolicy::None));
        assert_eq!(config.key_type, Some(KeyType::String));
        let options = config.options::<u64, String>(Path::new("tree.db"));
        assert_eq!(options.maximum_value_nodes, 16);
        assert_eq!(options.minimum_value_nodes, 8);
        assert_eq!(options.maximum_child_nodes, 32);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(toml::from_str::<TreeConfig>("page_size = 4096\n").is_err());
    }
}
