//! Storage capability interface for ODB.
//!
//! A [`Backend`] is the minimal operation set every storage driver must
//! provide: open-for-read, open-for-write-to-temp, list, stat, copy,
//! rename, delete, exists. The object database core is written entirely
//! against this trait and never against a concrete driver.
//!
//! # Backends
//!
//! - [`LocalBackend`] -- local disk, atomic same-filesystem rename
//! - [`MemoryBackend`] -- `BTreeMap`-based backend for tests and embedding
//!
//! Remote drivers (object stores, SFTP-like remotes, cloud drives) live
//! outside this crate and plug in through [`BackendRegistry`].
//!
//! # Contract
//!
//! 1. Paths are `/`-separated strings; the backend interprets them.
//! 2. Temp objects are created next to their destination, on the same
//!    backend, so committing them is a local operation.
//! 3. Handles are shared read-only across threads (`Send + Sync`).
//! 4. Retryable conditions are reported as [`BackendError::Transient`].

pub mod error;
pub mod local;
pub mod memory;
pub mod registry;
pub mod traits;

pub use error::{BackendError, BackendResult};
pub use local::LocalBackend;
pub use memory::MemoryBackend;
pub use registry::{BackendFactory, BackendRegistry};
pub use traits::{join_path, Backend, Capabilities, ObjectWriter, PathIter, Stat, TempObject, TEMP_SUFFIX};
