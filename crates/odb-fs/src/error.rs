use std::io;

/// Errors surfaced by backend drivers.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Nothing exists at the path.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The backend cannot be reached at all.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Timeout, rate limiting, dropped connection. Safe to retry.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Rename across devices; the caller must copy instead.
    #[error("cannot rename {from} to {to} atomically across devices")]
    CrossDevice { from: String, to: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl BackendError {
    /// Classify an I/O error raised while operating on `path`.
    pub fn from_io(path: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path.to_string()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_string()),
            io::ErrorKind::TimedOut
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted => Self::Transient(format!("{path}: {err}")),
            io::ErrorKind::ConnectionRefused | io::ErrorKind::NotConnected => {
                Self::Unavailable(format!("{path}: {err}"))
            }
            _ => Self::Io {
                path: path.to_string(),
                source: err,
            },
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;
