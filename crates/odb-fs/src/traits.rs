use std::io::{Read, Write};

use chrono::{DateTime, Utc};
use odb_types::Scheme;

use crate::error::{BackendError, BackendResult};

/// Suffix carried by every temp object name.
pub const TEMP_SUFFIX: &str = ".tmp";

/// Lazy listing of paths. Each call to [`Backend::list`] starts a fresh one.
pub type PathIter<'a> = Box<dyn Iterator<Item = BackendResult<String>> + Send + 'a>;

/// Metadata returned by [`Backend::stat`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stat {
    pub size: u64,
    /// Backend-native checksum, when the backend exposes one cheaply.
    pub checksum: Option<String>,
    pub modified: Option<DateTime<Utc>>,
}

/// What a backend can do beyond the mandatory primitives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capabilities {
    /// `rename` within the backend is atomic.
    pub atomic_rename: bool,
    /// Listing a whole prefix is cheaper than many `exists` calls.
    pub can_traverse: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            atomic_rename: true,
            can_traverse: true,
        }
    }
}

/// Writer for a temp object.
///
/// Bytes become durable only after [`finish`](Self::finish). Dropping the
/// writer without finishing leaves an incomplete temp object behind; it is
/// never visible at a canonical path.
pub trait ObjectWriter: Write + Send {
    fn finish(self: Box<Self>) -> BackendResult<()>;
}

/// A freshly created temp object and the writer that fills it.
pub struct TempObject {
    pub path: String,
    pub writer: Box<dyn ObjectWriter>,
}

impl std::fmt::Debug for TempObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TempObject").field("path", &self.path).finish()
    }
}

/// Capability interface every storage backend implements.
///
/// All implementations must satisfy these invariants:
/// - `open_write_temp` creates the temp object on the same backend and
///   device as `dir`, so `rename` into a sibling path is cheap.
/// - `rename` either moves the object completely or not at all when
///   [`Capabilities::atomic_rename`] is set; otherwise it may fail with
///   [`BackendError::CrossDevice`].
/// - `list` is lazy and restartable: every call begins a new listing.
/// - Handles are safe to share across threads.
pub trait Backend: Send + Sync + std::fmt::Debug {
    fn scheme(&self) -> Scheme;

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Open an object for streaming reads.
    fn open_read(&self, path: &str) -> BackendResult<Box<dyn Read + Send>>;

    /// Create a uniquely named temp object inside `dir`.
    fn open_write_temp(&self, dir: &str) -> BackendResult<TempObject>;

    /// Every object path below `prefix`, recursively.
    fn list(&self, prefix: &str) -> BackendResult<PathIter<'_>>;

    fn stat(&self, path: &str) -> BackendResult<Stat>;

    /// Copy `src` to `dst`, creating parents. `dst` never appears partially written.
    fn copy(&self, src: &str, dst: &str) -> BackendResult<()>;

    /// Move `from` to `to`, creating parents.
    fn rename(&self, from: &str, to: &str) -> BackendResult<()>;

    fn delete(&self, path: &str) -> BackendResult<()>;

    fn exists(&self, path: &str) -> BackendResult<bool>;

    /// Read a whole object into memory.
    ///
    /// Default implementation drains [`open_read`](Self::open_read).
    fn read_all(&self, path: &str) -> BackendResult<Vec<u8>> {
        let mut reader = self.open_read(path)?;
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .map_err(|e| BackendError::from_io(path, e))?;
        Ok(buf)
    }
}

/// Join path components with `/`, ignoring empty parts.
pub fn join_path(base: &str, rest: &[&str]) -> String {
    let mut out = base.trim_end_matches('/').to_string();
    if base.starts_with('/') && out.is_empty() {
        out.push('/');
    }
    for part in rest.iter().filter(|p| !p.is_empty()) {
        if !out.is_empty() && !out.ends_with('/') {
            out.push('/');
        }
        out.push_str(part.trim_matches('/'));
    }
    out
}

/// Temp object name with a fresh unique stem.
pub(crate) fn temp_name() -> String {
    format!(".{}{TEMP_SUFFIX}", uuid::Uuid::now_v7().simple())
}
