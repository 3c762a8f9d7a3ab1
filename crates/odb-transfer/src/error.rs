use odb_store::StoreError;

use crate::types::BatchReport;

/// Errors that end a whole batch. Single-object failures never do; they are
/// recorded in the [`BatchReport`] instead.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// Every task failed because a backend could not be reached.
    #[error("backend unavailable: all {} transfers failed", report.results.len())]
    BackendUnavailable { report: Box<BatchReport> },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("transfer worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl TransferError {
    /// The per-task report, when the batch got far enough to produce one.
    pub fn report(&self) -> Option<&BatchReport> {
        match self {
            Self::BackendUnavailable { report } => Some(report),
            _ => None,
        }
    }
}

/// Result alias for batch-level operations.
pub type BatchResult<T> = Result<T, TransferError>;
