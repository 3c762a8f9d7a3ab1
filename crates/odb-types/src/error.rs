use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    /// The string cannot be decoded as a recognized hash format.
    #[error("invalid hash {input:?}: {reason}")]
    InvalidHash { input: String, reason: String },

    #[error("unknown hash algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("invalid storage location {input:?}: {reason}")]
    InvalidLocation { input: String, reason: String },
}

impl TypeError {
    pub fn invalid_hash(input: &str, reason: impl Into<String>) -> Self {
        Self::InvalidHash {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}
