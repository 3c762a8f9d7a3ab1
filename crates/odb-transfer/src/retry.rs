use std::time::Duration;

use odb_store::StoreResult;
use serde::{Deserialize, Serialize};
use tokio::task::JoinError;
use tokio_retry2::strategy::{jitter, ExponentialBackoff};
use tracing::warn;

/// Backoff schedule for transient failures.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Zero disables retrying.
    pub max_retries: usize,
    /// Delay before the first retry; doubles on each further retry.
    pub initial_backoff_ms: u64,
    /// Upper bound on any single delay.
    pub max_backoff_ms: u64,
    /// Randomize each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Retry `max_retries` times without waiting.
    pub fn immediate(max_retries: usize) -> Self {
        Self {
            max_retries,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            jitter: false,
        }
    }

    /// Delays between attempts, one per allowed retry.
    pub fn delays(&self) -> Box<dyn Iterator<Item = Duration> + Send> {
        // from_millis(2) yields 2, 4, 8, ... times the factor; halving
        // afterwards makes the first delay exactly `initial_backoff_ms`.
        let backoff = ExponentialBackoff::from_millis(2)
            .factor(self.initial_backoff_ms)
            .max_delay(Duration::from_millis(self.max_backoff_ms.saturating_mul(2)))
            .map(|d| d / 2);
        if self.jitter {
            Box::new(backoff.map(jitter).take(self.max_retries))
        } else {
            Box::new(backoff.take(self.max_retries))
        }
    }
}

/// Run `op` on the blocking pool, retrying transient store errors on
/// `policy`'s schedule. Returns the last attempt's result.
pub(crate) async fn retry_blocking<T, F>(policy: &RetryPolicy, what: &'static str, op: F) -> Result<StoreResult<T>, JoinError>
where
    T: Send + 'static,
    F: Fn() -> StoreResult<T> + Clone + Send + 'static,
{
    let mut delays = policy.delays();
    let mut attempt = 1usize;
    loop {
        let result = tokio::task::spawn_blocking(op.clone()).await?;
        let err = match result {
            Err(err) if err.is_transient() => err,
            other => return Ok(other),
        };
        let Some(delay) = delays.next() else {
            return Ok(Err(err));
        };
        warn!(what, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
