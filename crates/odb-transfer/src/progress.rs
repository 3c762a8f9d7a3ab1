//! Progress events for status queries and transfers.
//!
//! Callers register a [`ProgressCallback`]; engines emit [`ProgressEvent`]s
//! through a [`Progress`] handle, which is a no-op when nothing is
//! registered. Callbacks run on worker threads and must not block.

use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;

use odb_types::ObjectReference;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgressEvent {
    /// A store's size was estimated from one shard.
    Estimating { estimated: u64 },
    /// `done` of `total` existence checks or shard listings finished.
    Querying { done: u64, total: u64 },
    /// Bytes read from the source for `reference` since the last event.
    Bytes { reference: ObjectReference, delta: u64 },
    /// A transfer task reached its final outcome.
    TaskFinished {
        reference: ObjectReference,
        done: u64,
        total: u64,
    },
}

pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Cloneable handle to an optional callback.
#[derive(Clone, Default)]
pub struct Progress {
    callback: Option<ProgressCallback>,
}

impl Progress {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        Self {
            callback: Some(Arc::new(callback)),
        }
    }

    /// A handle that drops every event.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.callback.is_some()
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(callback) = &self.callback {
            callback(&event);
        }
    }
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Progress").field("enabled", &self.is_enabled()).finish()
    }
}

/// Reports every successful read of an object's content as a
/// [`ProgressEvent::Bytes`].
pub struct ProgressReader<R> {
    inner: R,
    reference: ObjectReference,
    progress: Progress,
}

impl<R: Read> ProgressReader<R> {
    pub fn new(inner: R, reference: ObjectReference, progress: Progress) -> Self {
        Self {
            inner,
            reference,
            progress,
        }
    }
}

impl<R: Read> Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.progress.emit(ProgressEvent::Bytes {
                reference: self.reference,
                delta: n as u64,
            });
        }
        Ok(n)
    }
}
