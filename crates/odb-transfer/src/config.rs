use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Settings for one transfer batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Tasks in flight at once. Also bounds concurrent existence checks.
    pub max_concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_concurrency(),
            retry: RetryPolicy::default(),
        }
    }
}

impl TransferConfig {
    pub fn with_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Effective concurrency; never zero.
    pub fn jobs(&self) -> usize {
        self.max_concurrency.max(1)
    }
}

/// Four workers per CPU: transfers are I/O bound.
fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 4)
        .unwrap_or(16)
}
