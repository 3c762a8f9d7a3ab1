//! Content hashing for ODB.
//!
//! Wraps the `blake3`, `sha2` and `md-5` digests behind one streaming
//! [`ContentHasher`] that yields [`ObjectReference`](odb_types::ObjectReference)s.
//! Input is consumed in fixed-size chunks so large objects never sit in
//! memory whole.

pub mod hasher;

pub use hasher::{hash_reader, ContentHasher, HashingWriter, CHUNK_SIZE};
