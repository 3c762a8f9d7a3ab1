//! Status diffing and batch transfer between ODB object stores.
//!
//! The [`StatusEngine`] works out which references each side holds; the
//! [`Transfer`] orchestrator then moves objects concurrently, verifying each
//! one's hash at the destination.
//!
//! # Guarantees
//!
//! - One physical transfer per `(reference, destination)`, however many
//!   tasks name it; every task still gets its own result.
//! - Only transient failures are retried, with exponential backoff. Status
//!   queries retry too, and a check that keeps failing counts as missing.
//! - A failing object never aborts the batch. The batch as a whole fails
//!   only when every task failed with `backend_unavailable`.
//! - Cancellation is cooperative: nothing new is admitted, in-flight copies
//!   stop at the next chunk, completed results are kept.
//!
//! Callers observe long runs through a [`Progress`] callback.

pub mod cancel;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod progress;
pub mod retry;
pub mod status;
pub mod types;

#[cfg(test)]
mod testing;

pub use cancel::{CancelToken, CancellableReader};
pub use config::TransferConfig;
pub use error::{BatchResult, TransferError};
pub use orchestrator::{sync, transfer_between, StoreSet, Transfer};
pub use progress::{Progress, ProgressCallback, ProgressEvent, ProgressReader};
pub use retry::RetryPolicy;
pub use status::StatusEngine;
pub use types::{BatchReport, Diff, Outcome, SyncSummary, TransferFailure, TransferResult, TransferTask};
