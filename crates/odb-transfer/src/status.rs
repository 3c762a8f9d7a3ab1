use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use odb_store::{ErrorKind, Layout, ObjectStore, StoreError, StoreResult};
use odb_types::ObjectReference;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::BatchResult;
use crate::progress::{Progress, ProgressEvent};
use crate::retry::{retry_blocking, RetryPolicy};
use crate::types::Diff;

/// Entries a backend returns per listing page.
pub const LIST_OBJECT_PAGE_SIZE: u64 = 1000;
/// Extra cost of listing very large remotes.
pub const TRAVERSE_WEIGHT_MULTIPLIER: u64 = 5;
/// Remote size above which traversal is weighted.
pub const TRAVERSE_THRESHOLD_SIZE: u64 = 500_000;
/// Shard sampled to estimate a store's size.
pub const ESTIMATE_SHARD: &str = "00";
/// Number of shard directories in the layout.
pub const TOTAL_SHARDS: u64 = 256;

/// Computes which references exist where, without reading content.
///
/// An object present on both sides is in sync; sizes and timestamps are never
/// compared.
///
/// Transient backend errors are retried with the engine's [`RetryPolicy`].
/// A listing that still fails falls back to per-object checks for the
/// references it covered, and a per-object check that still fails counts as
/// absent, so the object is simply transferred again. Only an unreachable
/// backend fails the query.
#[derive(Clone, Debug)]
pub struct StatusEngine {
    jobs: usize,
    retry: RetryPolicy,
    progress: Progress,
}

/// Size estimate from sampling [`ESTIMATE_SHARD`].
#[derive(Debug)]
struct Estimate {
    size: u64,
    sample: HashSet<ObjectReference>,
    /// The sample holds the whole shard.
    complete: bool,
}

impl StatusEngine {
    /// `jobs` bounds the concurrent existence checks and shard listings.
    pub fn new(jobs: usize) -> Self {
        Self {
            jobs: jobs.max(1),
            retry: RetryPolicy::default(),
            progress: Progress::none(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    /// Classify `refs` by presence in `local` and `remote`.
    pub async fn diff(
        &self,
        local: &Arc<ObjectStore>,
        remote: &Arc<ObjectStore>,
        refs: &BTreeSet<ObjectReference>,
    ) -> BatchResult<Diff> {
        let (in_local, in_remote) = tokio::try_join!(self.present_in(local, refs), self.present_in(remote, refs))?;

        let mut diff = Diff::default();
        for reference in refs {
            let bucket = match (in_local.contains(reference), in_remote.contains(reference)) {
                (true, true) => &mut diff.present_both,
                (true, false) => &mut diff.missing_on_remote,
                (false, true) => &mut diff.missing_on_local,
                (false, false) => &mut diff.missing_both,
            };
            bucket.insert(*reference);
        }
        debug!(
            queried = refs.len(),
            missing_on_remote = diff.missing_on_remote.len(),
            missing_on_local = diff.missing_on_local.len(),
            missing_both = diff.missing_both.len(),
            "computed status"
        );
        Ok(diff)
    }

    /// Status of references known to be present locally against `remote`.
    pub async fn remote_status(
        &self,
        local_refs: &BTreeSet<ObjectReference>,
        remote: &Arc<ObjectStore>,
    ) -> BatchResult<Diff> {
        let in_remote = self.present_in(remote, local_refs).await?;
        let (present_both, missing_on_remote): (BTreeSet<_>, BTreeSet<_>) =
            local_refs.iter().partition(|r| in_remote.contains(*r));
        Ok(Diff {
            missing_on_remote,
            present_both,
            ..Diff::default()
        })
    }

    /// The subset of `refs` that `store` holds.
    ///
    /// Uses per-object checks when the backend cannot traverse, when a single
    /// reference is asked for, or when the store looks large compared with
    /// the query. Otherwise lists the store, one shard per job when the
    /// listing spans enough pages to split.
    pub async fn present_in(
        &self,
        store: &Arc<ObjectStore>,
        refs: &BTreeSet<ObjectReference>,
    ) -> BatchResult<BTreeSet<ObjectReference>> {
        if refs.is_empty() {
            return Ok(BTreeSet::new());
        }
        if refs.len() == 1 || !store.backend().capabilities().can_traverse {
            return self.contains_each(store, refs.iter().copied().collect()).await;
        }

        let limit = max_estimation_size(refs.len()).div_ceil(TOTAL_SHARDS) as usize;
        let estimate = {
            let store = Arc::clone(store);
            retry_blocking(&self.retry, "estimate store size", move || estimate_size(&store, limit)).await?
        };
        let estimate = match estimate {
            Ok(estimate) => estimate,
            Err(err) if is_fatal(&err) => return Err(err.into()),
            Err(err) => {
                warn!(location = %store.location(), error = %err, "size estimate failed, checking objects individually");
                return self.contains_each(store, refs.iter().copied().collect()).await;
            }
        };
        debug!(location = %store.location(), remote_size = estimate.size, "estimated store size");
        self.progress.emit(ProgressEvent::Estimating {
            estimated: estimate.size,
        });

        if !prefers_traversal(refs.len(), estimate.size) {
            debug!(queried = refs.len(), "large store, checking objects individually");
            let mut present: BTreeSet<ObjectReference> =
                refs.iter().filter(|r| estimate.sample.contains(*r)).copied().collect();
            let remaining = refs.iter().filter(|r| !estimate.sample.contains(*r)).copied().collect();
            present.extend(self.contains_each(store, remaining).await?);
            return Ok(present);
        }

        if splits_traversal(estimate.size, self.jobs) {
            debug!(queried = refs.len(), jobs = self.jobs, "querying via parallel shard traversal");
            self.traverse_shards(store, refs, &estimate).await
        } else {
            debug!(queried = refs.len(), "querying via traversal");
            self.traverse_whole(store, refs).await
        }
    }

    /// One listing of the whole store, filtered while it streams.
    async fn traverse_whole(
        &self,
        store: &Arc<ObjectStore>,
        refs: &BTreeSet<ObjectReference>,
    ) -> BatchResult<BTreeSet<ObjectReference>> {
        let wanted: Arc<HashSet<ObjectReference>> = Arc::new(refs.iter().copied().collect());
        let listed = {
            let store = Arc::clone(store);
            retry_blocking(&self.retry, "list store", move || {
                store
                    .all()?
                    .filter(|r| r.as_ref().map_or(true, |r| wanted.contains(r)))
                    .collect::<StoreResult<BTreeSet<_>>>()
            })
            .await?
        };
        self.progress.emit(ProgressEvent::Querying { done: 1, total: 1 });
        match listed {
            Ok(present) => Ok(present),
            Err(err) if is_fatal(&err) => Err(err.into()),
            Err(err) => {
                warn!(location = %store.location(), error = %err, "listing failed, checking objects individually");
                self.contains_each(store, refs.iter().copied().collect()).await
            }
        }
    }

    /// Lists shards concurrently, `jobs` at a time.
    ///
    /// Shard `00` is reused from the estimate when the sample covered it.
    /// References in a shard whose listing fails are checked individually.
    async fn traverse_shards(
        &self,
        store: &Arc<ObjectStore>,
        refs: &BTreeSet<ObjectReference>,
        estimate: &Estimate,
    ) -> BatchResult<BTreeSet<ObjectReference>> {
        let mut present: BTreeSet<ObjectReference> =
            refs.iter().filter(|r| estimate.sample.contains(*r)).copied().collect();
        let first = if estimate.complete { 1 } else { 0 };
        let shards: Vec<String> = (first..TOTAL_SHARDS).map(|i| format!("{i:02x}")).collect();
        let total = shards.len() as u64;

        let wanted: Arc<HashSet<ObjectReference>> = Arc::new(refs.iter().copied().collect());
        let semaphore = Arc::new(Semaphore::new(self.jobs));
        let mut set = JoinSet::new();
        for shard in shards {
            let store = Arc::clone(store);
            let wanted = Arc::clone(&wanted);
            let semaphore = Arc::clone(&semaphore);
            let retry = self.retry.clone();
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let listing = {
                    let shard = shard.clone();
                    retry_blocking(&retry, "list shard", move || {
                        store
                            .list_prefix(&shard)?
                            .filter(|r| r.as_ref().map_or(true, |r| wanted.contains(r)))
                            .collect::<StoreResult<Vec<_>>>()
                    })
                    .await
                };
                listing.map(|found| (shard, found))
            });
        }

        let mut failed_shards = HashSet::new();
        let mut done = 0u64;
        while let Some(joined) = set.join_next().await {
            let (shard, found) = joined??;
            match found {
                Ok(found) => present.extend(found),
                Err(err) if is_fatal(&err) => return Err(err.into()),
                Err(err) => {
                    warn!(location = %store.location(), shard = %shard, error = %err, "shard listing failed, checking its objects individually");
                    failed_shards.insert(shard);
                }
            }
            done += 1;
            self.progress.emit(ProgressEvent::Querying { done, total });
        }

        if !failed_shards.is_empty() {
            let unresolved = refs
                .iter()
                .filter(|r| failed_shards.contains(&Layout::shard_of(r)))
                .copied()
                .collect();
            present.extend(self.contains_each(store, unresolved).await?);
        }
        Ok(present)
    }

    async fn contains_each(
        &self,
        store: &Arc<ObjectStore>,
        refs: Vec<ObjectReference>,
    ) -> BatchResult<BTreeSet<ObjectReference>> {
        let total = refs.len() as u64;
        let semaphore = Arc::new(Semaphore::new(self.jobs));
        let mut set = JoinSet::new();
        for reference in refs {
            let store = Arc::clone(store);
            let semaphore = Arc::clone(&semaphore);
            let retry = self.retry.clone();
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                retry_blocking(&retry, "check existence", move || store.contains(&reference))
                    .await
                    .map(|found| (reference, found))
            });
        }

        let mut present = BTreeSet::new();
        let mut done = 0u64;
        while let Some(joined) = set.join_next().await {
            let (reference, found) = joined??;
            match found {
                Ok(true) => {
                    present.insert(reference);
                }
                Ok(false) => {}
                Err(err) if is_fatal(&err) => return Err(err.into()),
                Err(err) => {
                    warn!(location = %store.location(), reference = %reference, error = %err, "existence check failed, treating as missing");
                }
            }
            done += 1;
            self.progress.emit(ProgressEvent::Querying { done, total });
        }
        Ok(present)
    }
}

impl Default for StatusEngine {
    fn default() -> Self {
        Self::new(crate::config::TransferConfig::default().jobs())
    }
}

/// An unreachable backend fails the whole query.
fn is_fatal(err: &StoreError) -> bool {
    err.kind() == ErrorKind::BackendUnavailable
}

/// Largest store size for which sampling is still worthwhile.
fn max_estimation_size(query_len: usize) -> u64 {
    let scaled = query_len as u64 * LIST_OBJECT_PAGE_SIZE / TRAVERSE_WEIGHT_MULTIPLIER;
    TRAVERSE_THRESHOLD_SIZE.max(scaled)
}

/// Sample one shard and extrapolate to the whole store.
///
/// Reads at most `limit + 1` entries: one past the limit shows the shard was
/// cut short, in which case the traversal lists it again.
fn estimate_size(store: &ObjectStore, limit: usize) -> StoreResult<Estimate> {
    let sample = store
        .list_prefix(ESTIMATE_SHARD)?
        .take(limit.saturating_add(1))
        .collect::<StoreResult<HashSet<_>>>()?;
    Ok(Estimate {
        size: TOTAL_SHARDS * (sample.len() as u64).max(1),
        complete: sample.len() <= limit,
        sample,
    })
}

/// Whether listing everything beats `query_len` individual checks.
fn prefers_traversal(query_len: usize, remote_size: u64) -> bool {
    let pages = remote_size as f64 / LIST_OBJECT_PAGE_SIZE as f64;
    let weight = if remote_size > TRAVERSE_THRESHOLD_SIZE {
        pages * TRAVERSE_WEIGHT_MULTIPLIER as f64
    } else {
        pages
    };
    query_len as f64 >= weight
}

/// Whether a listing of `remote_size` entries is worth splitting per shard.
///
/// Below one page per job a single listing is cheaper than 255 requests.
fn splits_traversal(remote_size: u64, jobs: usize) -> bool {
    let pages = remote_size as f64 / LIST_OBJECT_PAGE_SIZE as f64;
    pages >= TOTAL_SHARDS as f64 / jobs.max(1) as f64
}
