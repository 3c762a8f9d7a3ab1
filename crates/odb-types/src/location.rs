use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Backend kind, selected at store construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Local disk.
    Local,
    /// Process-local in-memory backend.
    Memory,
    /// S3-compatible object store.
    S3,
    /// Google Cloud Storage.
    Gs,
    /// SFTP-like remote.
    Ssh,
    /// Plain HTTP(S) remote.
    Http,
    /// Google Drive.
    Gdrive,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Memory => "memory",
            Self::S3 => "s3",
            Self::Gs => "gs",
            Self::Ssh => "ssh",
            Self::Http => "http",
            Self::Gdrive => "gdrive",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" | "file" => Ok(Self::Local),
            "memory" | "mem" => Ok(Self::Memory),
            "s3" => Ok(Self::S3),
            "gs" | "gcs" => Ok(Self::Gs),
            "ssh" | "sftp" => Ok(Self::Ssh),
            "http" | "https" => Ok(Self::Http),
            "gdrive" => Ok(Self::Gdrive),
            other => Err(TypeError::InvalidLocation {
                input: s.to_string(),
                reason: format!("unknown scheme {other:?}"),
            }),
        }
    }
}

/// Opaque handle to credentials owned by the backend driver.
///
/// The contents are never printed.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialsHandle(String);

impl CredentialsHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    /// The raw handle, for backend drivers only.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CredentialsHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CredentialsHandle(<redacted>)")
    }
}

/// Where a store lives: backend scheme, root path or bucket, credentials.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StorageLocation {
    pub scheme: Scheme,
    pub root: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<CredentialsHandle>,
}

impl StorageLocation {
    pub fn new(scheme: Scheme, root: impl Into<String>) -> Self {
        Self {
            scheme,
            root: normalize_root(&root.into()),
            credentials: None,
        }
    }

    /// Local-disk location rooted at `path`.
    pub fn local(path: impl Into<String>) -> Self {
        Self::new(Scheme::Local, path)
    }

    /// In-memory location rooted at `root`.
    pub fn memory(root: impl Into<String>) -> Self {
        Self::new(Scheme::Memory, root)
    }

    pub fn with_credentials(mut self, credentials: CredentialsHandle) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Parse `"<scheme>://<root>"`. A string without `://` is a local path.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        let (scheme, root) = match s.split_once("://") {
            Some((scheme, root)) => (scheme.parse::<Scheme>()?, root),
            None => (Scheme::Local, s),
        };
        if root.is_empty() && scheme != Scheme::Memory {
            return Err(TypeError::InvalidLocation {
                input: s.to_string(),
                reason: "empty root".into(),
            });
        }
        Ok(Self::new(scheme, root))
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.root)
    }
}

impl FromStr for StorageLocation {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn normalize_root(root: &str) -> String {
    let trimmed = root.trim_end_matches('/');
    if trimmed.is_empty() && root.starts_with('/') {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}
