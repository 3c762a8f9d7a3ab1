use std::collections::BTreeSet;
use std::fmt;

use odb_store::{ErrorKind, StoreError};
use odb_types::{ObjectReference, StorageLocation};
use serde::{Deserialize, Serialize};

/// Move one object from `source` to `destination`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTask {
    pub reference: ObjectReference,
    pub source: StorageLocation,
    pub destination: StorageLocation,
    /// Size, when the caller already knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl TransferTask {
    pub fn new(reference: ObjectReference, source: StorageLocation, destination: StorageLocation) -> Self {
        Self {
            reference,
            source,
            destination,
            size: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }
}

/// Why a task failed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl TransferFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "transfer cancelled")
    }
}

impl From<&StoreError> for TransferFailure {
    fn from(err: &StoreError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl fmt::Display for TransferFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    SkippedAlreadyPresent,
    Failed(TransferFailure),
}

/// Per-task result. Every input task gets exactly one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    pub reference: ObjectReference,
    pub destination: StorageLocation,
    pub outcome: Outcome,
    pub bytes_moved: u64,
    pub attempts: u32,
}

impl TransferResult {
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, Outcome::Failed(_))
    }

    pub fn failure(&self) -> Option<&TransferFailure> {
        match &self.outcome {
            Outcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn failure_kind(&self) -> Option<ErrorKind> {
        self.failure().map(|f| f.kind)
    }
}

/// Aggregate outcome of one batch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub results: Vec<TransferResult>,
    /// Failed entries in `results`, duplicates included.
    pub failed_count: usize,
    /// Bytes physically moved; a deduplicated transfer counts once.
    pub total_bytes: u64,
    pub cancelled: bool,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed_count == 0 && !self.cancelled
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &TransferResult> {
        self.results.iter().filter(|r| r.outcome == Outcome::Succeeded)
    }

    pub fn skipped(&self) -> impl Iterator<Item = &TransferResult> {
        self.results
            .iter()
            .filter(|r| r.outcome == Outcome::SkippedAlreadyPresent)
    }

    pub fn failed(&self) -> impl Iterator<Item = &TransferResult> {
        self.results.iter().filter(|r| r.is_failed())
    }
}

/// Where each queried reference exists, across two stores.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff {
    pub missing_on_remote: BTreeSet<ObjectReference>,
    pub missing_on_local: BTreeSet<ObjectReference>,
    pub present_both: BTreeSet<ObjectReference>,
    pub missing_both: BTreeSet<ObjectReference>,
}

impl Diff {
    /// Nothing needs to move in either direction.
    pub fn is_in_sync(&self) -> bool {
        self.missing_on_remote.is_empty() && self.missing_on_local.is_empty()
    }

    /// Tasks that copy everything `missing_on_remote` from `source` to `destination`.
    pub fn tasks(&self, source: &StorageLocation, destination: &StorageLocation) -> Vec<TransferTask> {
        self.missing_on_remote
            .iter()
            .map(|r| TransferTask::new(*r, source.clone(), destination.clone()))
            .collect()
    }
}

/// Result of [`sync`](crate::sync): what the diff found and what moved.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub diff: Diff,
    pub report: BatchReport,
}

#[cfg(test)]
mod tests {
    use super::*;
    use odb_types::HashAlgorithm;

    fn reference(byte: u8) -> ObjectReference {
        ObjectReference::new(HashAlgorithm::Blake3, &[byte; 32]).unwrap()
    }

    fn result(outcome: Outcome) -> TransferResult {
        TransferResult {
            reference: reference(1),
            destination: StorageLocation::memory("remote"),
            outcome,
            bytes_moved: 0,
            attempts: 1,
        }
    }

    #[test]
    fn report_filters() {
        let report = BatchReport {
            results: vec![
                result(Outcome::Succeeded),
                result(Outcome::SkippedAlreadyPresent),
                result(Outcome::Failed(TransferFailure::cancelled())),
            ],
            failed_count: 1,
            total_bytes: 0,
            cancelled: true,
        };
        assert_eq!(report.succeeded().count(), 1);
        assert_eq!(report.skipped().count(), 1);
        assert_eq!(report.failed().count(), 1);
        assert!(!report.is_success());
    }

    #[test]
    fn diff_tasks_cover_missing_on_remote() {
        let diff = Diff {
            missing_on_remote: BTreeSet::from([reference(1), reference(2)]),
            present_both: BTreeSet::from([reference(3)]),
            ..Diff::default()
        };
        let src = StorageLocation::memory("local");
        let dst = StorageLocation::memory("remote");
        let tasks = diff.tasks(&src, &dst);
        assert_eq!(tasks.len(), 2);
        assert!(tasks.iter().all(|t| t.source == src && t.destination == dst));
        assert!(!diff.is_in_sync());
    }

    #[test]
    fn outcome_json_shape() {
        let failed = result(Outcome::Failed(TransferFailure::new(ErrorKind::HashMismatch, "bad bytes")));
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["outcome"]["status"], "failed");
        assert_eq!(json["outcome"]["kind"], "hash_mismatch");

        let ok = serde_json::to_value(result(Outcome::SkippedAlreadyPresent)).unwrap();
        assert_eq!(ok["outcome"]["status"], "skipped_already_present");
    }
}
