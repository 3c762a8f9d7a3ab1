//! Content-addressed object store for ODB.
//!
//! An [`ObjectStore`] maps file content to an address derived from its
//! hash, on top of any [`Backend`](odb_fs::Backend). Objects live at
//! `root/<2-hex shard>/<rest of digest>`; nothing else is persisted.
//!
//! # Design Rules
//!
//! 1. Objects are immutable once written (content-addressing guarantees this).
//! 2. Write-then-link: stream into a temp object, verify the hash, then
//!    rename into place. Partial writes are never visible at a canonical path.
//! 3. Concurrent reads are always safe.
//! 4. The store never interprets object contents.
//! 5. All backend errors are propagated, classified by [`ErrorKind`].

pub mod config;
pub mod error;
pub mod layout;
pub mod store;

pub use config::ObjectStoreConfig;
pub use error::{ErrorKind, StoreError, StoreResult};
pub use layout::Layout;
pub use store::{GcReport, ObjectInfo, ObjectStore, ReferenceIter, MIN_PREFIX_LEN};
