//! Foundation types for ODB, a storage-backend-agnostic object database.
//!
//! Every other ODB crate depends on `odb-types`.
//!
//! # Key Types
//!
//! - [`ObjectReference`]: Content hash (algorithm tag + digest) addressing an object
//! - [`HashAlgorithm`]: Digest algorithm an object store is keyed by
//! - [`StorageLocation`]: Backend scheme + root + opaque credentials handle
//! - [`Scheme`]: Backend kind selected at store construction

pub mod error;
pub mod location;
pub mod object;

pub use error::TypeError;
pub use location::{CredentialsHandle, Scheme, StorageLocation};
pub use object::{HashAlgorithm, ObjectReference, MAX_DIGEST_LEN};
