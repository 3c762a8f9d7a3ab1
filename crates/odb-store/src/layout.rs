use odb_fs::join_path;
use odb_types::{HashAlgorithm, ObjectReference, TypeError};

/// Hex characters used for the shard directory.
pub const SHARD_LEN: usize = 2;

/// Maps references to canonical paths and back.
///
/// An object lives at `root/<hex[0..2]>/<hex[2..]>`: a two-character shard
/// directory followed by the remaining digest characters. The mapping is a
/// pure function of the reference.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Layout {
    algorithm: HashAlgorithm,
}

impl Layout {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Canonical path of `reference` under `root`.
    pub fn path_for(&self, root: &str, reference: &ObjectReference) -> String {
        let hex = reference.to_hex();
        let (shard, rest) = hex.split_at(SHARD_LEN);
        join_path(root, &[shard, rest])
    }

    /// Shard directory of `reference` under `root`.
    pub fn shard_dir(&self, root: &str, reference: &ObjectReference) -> String {
        join_path(root, &[Self::shard_of(reference).as_str()])
    }

    pub fn shard_of(reference: &ObjectReference) -> String {
        reference.to_hex()[..SHARD_LEN].to_string()
    }

    /// Recover the reference from a canonical path.
    ///
    /// Only the last two components are inspected: a shard of exactly two
    /// lowercase hex characters and the rest of the digest.
    pub fn reference_for(&self, path: &str) -> Result<ObjectReference, TypeError> {
        let mut parts = path.rsplit('/');
        let (rest, shard) = match (parts.next(), parts.next()) {
            (Some(rest), Some(shard)) => (rest, shard),
            _ => return Err(TypeError::invalid_hash(path, "expected <shard>/<rest>")),
        };
        if shard.len() != SHARD_LEN || !is_lower_hex(shard) {
            return Err(TypeError::invalid_hash(path, format!("bad shard directory {shard:?}")));
        }
        if !is_lower_hex(rest) {
            return Err(TypeError::invalid_hash(path, "object name is not lowercase hex"));
        }
        ObjectReference::from_hex(self.algorithm, &format!("{shard}{rest}"))
    }
}

/// Whether `s` is non-empty and made only of `0-9a-f`.
pub(crate) fn is_lower_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
