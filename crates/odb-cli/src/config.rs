use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use odb_store::ObjectStoreConfig;
use odb_transfer::TransferConfig;
use odb_types::{HashAlgorithm, StorageLocation};
use serde::{Deserialize, Serialize};

/// File looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "odb.toml";

/// Contents of `odb.toml`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OdbConfig {
    /// Remote used when a command gets no `--remote`.
    pub default_remote: Option<String>,
    pub cache: CacheConfig,
    pub remotes: BTreeMap<String, RemoteConfig>,
    pub transfer: TransferConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// `<scheme>://<root>` or a plain directory.
    pub url: String,
    pub algorithm: HashAlgorithm,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: ".odb/cache".into(),
            algorithm: HashAlgorithm::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub url: String,
    #[serde(default)]
    pub read_only: bool,
}

impl OdbConfig {
    /// Load `path`, or `./odb.toml` if it exists, or fall back to defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let candidate = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !candidate.exists() {
                    return Ok(Self::default());
                }
                candidate
            }
        };
        let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn cache_location(&self) -> anyhow::Result<StorageLocation> {
        Ok(StorageLocation::parse(&self.cache.url)?)
    }

    pub fn cache_store_config(&self) -> ObjectStoreConfig {
        ObjectStoreConfig {
            algorithm: self.cache.algorithm,
            read_only: false,
        }
    }

    /// Resolve a remote by name, or the default remote.
    pub fn remote(&self, name: Option<&str>) -> anyhow::Result<(StorageLocation, ObjectStoreConfig)> {
        let name = match name.or(self.default_remote.as_deref()) {
            Some(name) => name,
            None if self.remotes.len() == 1 => self.remotes.keys().next().map(String::as_str).unwrap_or_default(),
            None => bail!("no remote given and no default_remote configured"),
        };
        let remote = self
            .remotes
            .get(name)
            .with_context(|| format!("unknown remote {name:?}"))?;
        let location = StorageLocation::parse(&remote.url).with_context(|| format!("remote {name:?}"))?;
        Ok((
            location,
            ObjectStoreConfig {
                algorithm: self.cache.algorithm,
                read_only: remote.read_only,
            },
        ))
    }
}
