use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use odb_store::{ErrorKind, ObjectStore, StoreResult};
use odb_types::{ObjectReference, StorageLocation};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cancel::{CancelToken, CancellableReader};
use crate::config::TransferConfig;
use crate::error::{BatchResult, TransferError};
use crate::progress::{Progress, ProgressEvent, ProgressReader};
use crate::retry::RetryPolicy;
use crate::status::StatusEngine;
use crate::types::{BatchReport, Outcome, SyncSummary, TransferFailure, TransferResult, TransferTask};

/// Stores taking part in a batch, looked up by location.
#[derive(Clone, Debug, Default)]
pub struct StoreSet {
    stores: HashMap<StorageLocation, Arc<ObjectStore>>,
}

impl StoreSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, store: Arc<ObjectStore>) {
        self.stores.insert(store.location().clone(), store);
    }

    pub fn with(mut self, store: Arc<ObjectStore>) -> Self {
        self.insert(store);
        self
    }

    pub fn get(&self, location: &StorageLocation) -> Option<&Arc<ObjectStore>> {
        self.stores.get(location)
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}

impl FromIterator<Arc<ObjectStore>> for StoreSet {
    fn from_iter<I: IntoIterator<Item = Arc<ObjectStore>>>(iter: I) -> Self {
        let mut set = Self::new();
        for store in iter {
            set.insert(store);
        }
        set
    }
}

/// What one successful attempt did.
enum Moved {
    Bytes(u64),
    AlreadyPresent,
}

/// Concurrent batch transfer between stores.
///
/// Tasks are deduplicated by `(reference, destination)`, admitted through a
/// semaphore of `max_concurrency` permits, and run on tokio's blocking pool.
/// Transient failures are retried per task; any other failure is recorded
/// and the batch moves on.
#[derive(Clone, Debug, Default)]
pub struct Transfer {
    config: TransferConfig,
    progress: Progress,
}

impl Transfer {
    pub fn new(config: TransferConfig) -> Self {
        Self {
            config,
            progress: Progress::none(),
        }
    }

    /// Report bytes read and finished tasks to `progress`.
    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Run `tasks` to completion or until `cancel` fires.
    ///
    /// Every input task gets one result, in input order. Only a batch where
    /// every task failed with `backend_unavailable` is an error.
    pub async fn run(
        &self,
        stores: &StoreSet,
        tasks: Vec<TransferTask>,
        cancel: &CancelToken,
    ) -> BatchResult<BatchReport> {
        let (unique, slots) = dedup(tasks);
        if unique.len() < slots.len() {
            debug!(tasks = slots.len(), unique = unique.len(), "deduplicated transfer tasks");
        }

        let mut results: Vec<Option<TransferResult>> = vec![None; unique.len()];
        let total = unique.len() as u64;
        let mut done = 0u64;
        let semaphore = Arc::new(Semaphore::new(self.config.jobs()));
        let mut set = JoinSet::new();

        for (index, task) in unique.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            let (src, dst) = match (stores.get(&task.source), stores.get(&task.destination)) {
                (Some(src), Some(dst)) => (Arc::clone(src), Arc::clone(dst)),
                (src, _) => {
                    let missing = if src.is_none() { &task.source } else { &task.destination };
                    warn!(location = %missing, reference = %task.reference, "no store for location");
                    results[index] = Some(failed(
                        task,
                        TransferFailure::new(ErrorKind::BackendUnavailable, format!("no store open at {missing}")),
                        0,
                    ));
                    done += 1;
                    self.progress.emit(ProgressEvent::TaskFinished {
                        reference: task.reference,
                        done,
                        total,
                    });
                    continue;
                }
            };

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let task = task.clone();
            let policy = self.config.retry.clone();
            let cancel = cancel.clone();
            let progress = self.progress.clone();
            set.spawn(async move {
                let _permit = permit;
                (index, run_task(src, dst, task, policy, cancel, progress).await)
            });
        }

        while let Some(joined) = set.join_next().await {
            let (index, result) = joined?;
            done += 1;
            self.progress.emit(ProgressEvent::TaskFinished {
                reference: result.reference,
                done,
                total,
            });
            results[index] = Some(result);
        }

        // Tasks never admitted because the batch was cancelled.
        let unique_results: Vec<TransferResult> = results
            .into_iter()
            .zip(&unique)
            .map(|(result, task)| result.unwrap_or_else(|| failed(task, TransferFailure::cancelled(), 0)))
            .collect();

        let report = build_report(&unique_results, &slots, cancel.is_cancelled());
        info!(
            tasks = report.results.len(),
            failed = report.failed_count,
            bytes = report.total_bytes,
            cancelled = report.cancelled,
            "transfer batch finished"
        );

        let all_unavailable = !report.results.is_empty()
            && report
                .results
                .iter()
                .all(|r| r.failure_kind() == Some(ErrorKind::BackendUnavailable));
        if all_unavailable {
            return Err(TransferError::BackendUnavailable {
                report: Box::new(report),
            });
        }
        Ok(report)
    }

    /// Copy `refs` from `src` to `dst`.
    pub async fn between(
        &self,
        src: &Arc<ObjectStore>,
        dst: &Arc<ObjectStore>,
        refs: impl IntoIterator<Item = ObjectReference>,
        cancel: &CancelToken,
    ) -> BatchResult<BatchReport> {
        let stores = StoreSet::new().with(Arc::clone(src)).with(Arc::clone(dst));
        let tasks = refs
            .into_iter()
            .map(|r| TransferTask::new(r, src.location().clone(), dst.location().clone()))
            .collect();
        self.run(&stores, tasks, cancel).await
    }

    /// Diff `refs` between `src` and `dst`, then copy what `dst` lacks.
    ///
    /// References found in neither store are reported in the summary's diff
    /// and never scheduled. The diff shares this transfer's retry policy and
    /// progress handle.
    pub async fn sync(
        &self,
        src: &Arc<ObjectStore>,
        dst: &Arc<ObjectStore>,
        refs: &BTreeSet<ObjectReference>,
        cancel: &CancelToken,
    ) -> BatchResult<SyncSummary> {
        let diff = StatusEngine::new(self.config.jobs())
            .with_retry(self.config.retry.clone())
            .with_progress(self.progress.clone())
            .diff(src, dst, refs)
            .await?;
        if !diff.missing_both.is_empty() {
            warn!(count = diff.missing_both.len(), "objects missing from both stores");
        }
        let report = self.between(src, dst, diff.missing_on_remote.iter().copied(), cancel).await?;
        Ok(SyncSummary { diff, report })
    }
}

/// Collapse tasks sharing `(reference, destination)`.
///
/// Returns the unique tasks in first-seen order and, for every input task,
/// the index of the unique task that stands for it.
fn dedup(tasks: Vec<TransferTask>) -> (Vec<TransferTask>, Vec<usize>) {
    let mut seen: HashMap<(ObjectReference, StorageLocation), usize> = HashMap::new();
    let mut unique = Vec::new();
    let mut slots = Vec::with_capacity(tasks.len());
    for task in tasks {
        let key = (task.reference, task.destination.clone());
        let slot = *seen.entry(key).or_insert_with(|| {
            unique.push(task);
            unique.len() - 1
        });
        slots.push(slot);
    }
    (unique, slots)
}

fn build_report(unique: &[TransferResult], slots: &[usize], cancelled: bool) -> BatchReport {
    let results: Vec<TransferResult> = slots.iter().map(|&slot| unique[slot].clone()).collect();
    BatchReport {
        failed_count: results.iter().filter(|r| r.is_failed()).count(),
        total_bytes: unique.iter().map(|r| r.bytes_moved).sum(),
        results,
        cancelled,
    }
}

fn failed(task: &TransferTask, failure: TransferFailure, attempts: u32) -> TransferResult {
    TransferResult {
        reference: task.reference,
        destination: task.destination.clone(),
        outcome: Outcome::Failed(failure),
        bytes_moved: 0,
        attempts,
    }
}

/// One task with its retry loop.
async fn run_task(
    src: Arc<ObjectStore>,
    dst: Arc<ObjectStore>,
    task: TransferTask,
    policy: RetryPolicy,
    cancel: CancelToken,
    progress: Progress,
) -> TransferResult {
    let mut delays = policy.delays();
    let mut attempts = 0u32;
    loop {
        if cancel.is_cancelled() {
            return failed(&task, TransferFailure::cancelled(), attempts);
        }
        attempts += 1;

        let joined = {
            let (src, dst, cancel, progress) = (Arc::clone(&src), Arc::clone(&dst), cancel.clone(), progress.clone());
            let (reference, size) = (task.reference, task.size);
            tokio::task::spawn_blocking(move || attempt(&src, &dst, &reference, size, &cancel, progress)).await
        };
        let err = match joined {
            Ok(Ok(moved)) => {
                let (outcome, bytes_moved) = match moved {
                    Moved::Bytes(n) => (Outcome::Succeeded, n),
                    Moved::AlreadyPresent => (Outcome::SkippedAlreadyPresent, 0),
                };
                debug!(reference = %task.reference, destination = %task.destination, bytes_moved, attempts, "transfer done");
                return TransferResult {
                    reference: task.reference,
                    destination: task.destination,
                    outcome,
                    bytes_moved,
                    attempts,
                };
            }
            Ok(Err(err)) => err,
            Err(join) => {
                return failed(
                    &task,
                    TransferFailure::new(ErrorKind::Io, format!("transfer worker failed: {join}")),
                    attempts,
                );
            }
        };

        if cancel.is_cancelled() {
            return failed(&task, TransferFailure::cancelled(), attempts);
        }
        if err.is_transient() {
            if let Some(delay) = delays.next() {
                warn!(reference = %task.reference, attempt = attempts, delay_ms = delay.as_millis() as u64, error = %err, "transient failure, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => continue,
                    _ = cancel.cancelled() => return failed(&task, TransferFailure::cancelled(), attempts),
                }
            }
        }
        warn!(reference = %task.reference, attempts, error = %err, "transfer failed");
        return failed(&task, TransferFailure::from(&err), attempts);
    }
}

/// A single blocking attempt: skip if present, else stream source into destination.
///
/// The source's metadata is checked against `expected_size` and any backend
/// checksum first, so a known-bad object is refused before any bytes move.
fn attempt(
    src: &ObjectStore,
    dst: &ObjectStore,
    reference: &ObjectReference,
    expected_size: Option<u64>,
    cancel: &CancelToken,
    progress: Progress,
) -> StoreResult<Moved> {
    if dst.contains(reference)? {
        return Ok(Moved::AlreadyPresent);
    }
    src.check_metadata(reference, expected_size)?;
    let reader = ProgressReader::new(
        CancellableReader::new(src.get(reference)?, cancel.clone()),
        *reference,
        progress,
    );
    let info = dst.put(reader, Some(reference))?;
    Ok(if info.created {
        Moved::Bytes(info.size)
    } else {
        Moved::AlreadyPresent
    })
}

/// Copy `refs` from `src` to `dst` without progress reporting.
pub async fn transfer_between(
    src: &Arc<ObjectStore>,
    dst: &Arc<ObjectStore>,
    refs: impl IntoIterator<Item = ObjectReference>,
    config: &TransferConfig,
    cancel: &CancelToken,
) -> BatchResult<BatchReport> {
    Transfer::new(config.clone()).between(src, dst, refs, cancel).await
}

/// [`Transfer::sync`] without progress reporting.
pub async fn sync(
    src: &Arc<ObjectStore>,
    dst: &Arc<ObjectStore>,
    refs: &BTreeSet<ObjectReference>,
    config: &TransferConfig,
    cancel: &CancelToken,
) -> BatchResult<SyncSummary> {
    Transfer::new(config.clone()).sync(src, dst, refs, cancel).await
}
