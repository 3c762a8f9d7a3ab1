use std::fmt;
use std::io;

use odb_fs::BackendError;
use odb_types::{ObjectReference, TypeError};
use serde::{Deserialize, Serialize};

/// Failure taxonomy shared by the store and the transfer layer.
///
/// Only [`ErrorKind::Transient`] is ever worth retrying.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    HashMismatch,
    Transient,
    PermissionDenied,
    BackendUnavailable,
    InvalidHash,
    Io,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::HashMismatch => "hash_mismatch",
            Self::Transient => "transient",
            Self::PermissionDenied => "permission_denied",
            Self::BackendUnavailable => "backend_unavailable",
            Self::InvalidHash => "invalid_hash",
            Self::Io => "io",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from object store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested object was not found.
    #[error("object not found: {0}")]
    NotFound(ObjectReference),

    /// No stored object matches an abbreviated digest.
    #[error("no object matches prefix {0}")]
    PrefixNotFound(String),

    /// Content does not hash to the reference it was written under.
    #[error("hash mismatch: expected {expected}, computed {computed}")]
    HashMismatch {
        expected: ObjectReference,
        computed: ObjectReference,
    },

    /// Stored size disagrees with the size the caller expected.
    #[error("size mismatch for {reference}: expected {expected} bytes, found {actual}")]
    SizeMismatch {
        reference: ObjectReference,
        expected: u64,
        actual: u64,
    },

    #[error(transparent)]
    InvalidHash(#[from] TypeError),

    #[error("prefix {prefix} is ambiguous ({} candidates)", candidates.len())]
    AmbiguousPrefix {
        prefix: String,
        candidates: Vec<ObjectReference>,
    },

    /// The store was opened read-only.
    #[error("store is read-only")]
    ReadOnly,

    #[error(transparent)]
    Backend(#[from] BackendError),

    /// I/O error raised by a caller-supplied reader.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    /// Where this error falls in the failure taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) | Self::PrefixNotFound(_) => ErrorKind::NotFound,
            Self::HashMismatch { .. } | Self::SizeMismatch { .. } => ErrorKind::HashMismatch,
            Self::InvalidHash(_) | Self::AmbiguousPrefix { .. } => ErrorKind::InvalidHash,
            Self::ReadOnly => ErrorKind::PermissionDenied,
            Self::Backend(e) => match e {
                BackendError::NotFound(_) => ErrorKind::NotFound,
                BackendError::PermissionDenied(_) => ErrorKind::PermissionDenied,
                BackendError::Unavailable(_) => ErrorKind::BackendUnavailable,
                BackendError::Transient(_) => ErrorKind::Transient,
                BackendError::CrossDevice { .. } | BackendError::Io { .. } => ErrorKind::Io,
            },
            Self::Io(e) => match e.kind() {
                io::ErrorKind::NotFound => ErrorKind::NotFound,
                io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
                io::ErrorKind::TimedOut
                | io::ErrorKind::Interrupted
                | io::ErrorKind::WouldBlock
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted => ErrorKind::Transient,
                _ => ErrorKind::Io,
            },
        }
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
