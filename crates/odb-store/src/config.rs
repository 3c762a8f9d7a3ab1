use odb_types::HashAlgorithm;
use serde::{Deserialize, Serialize};

/// Per-store settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectStoreConfig {
    /// Digest algorithm the store is keyed by.
    pub algorithm: HashAlgorithm,
    /// Reject `put`, `remove` and `gc`.
    pub read_only: bool,
}

impl ObjectStoreConfig {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::default()
        }
    }
}
