use std::io::{self, Read, Write};

use odb_types::{HashAlgorithm, ObjectReference};
use sha2::Digest;

/// Chunk size used when streaming content through a digest (64 KiB).
pub const CHUNK_SIZE: usize = 64 * 1024;

enum State {
    Blake3(Box<blake3::Hasher>),
    Sha256(sha2::Sha256),
    Md5(md5::Md5),
}

/// Incremental content hasher.
///
/// Feed bytes with [`update`](Self::update) and call
/// [`finalize`](Self::finalize) to get the reference. Hashing is pure: the
/// same algorithm and bytes always produce the same reference.
pub struct ContentHasher {
    algorithm: HashAlgorithm,
    state: State,
    bytes: u64,
}

impl ContentHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let state = match algorithm {
            HashAlgorithm::Blake3 => State::Blake3(Box::new(blake3::Hasher::new())),
            HashAlgorithm::Sha256 => State::Sha256(sha2::Sha256::new()),
            HashAlgorithm::Md5 => State::Md5(md5::Md5::new()),
        };
        Self {
            algorithm,
            state,
            bytes: 0,
        }
    }

    /// One-shot hash of an in-memory buffer.
    pub fn hash(algorithm: HashAlgorithm, data: &[u8]) -> ObjectReference {
        let mut hasher = Self::new(algorithm);
        hasher.update(data);
        hasher.finalize()
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            State::Blake3(h) => {
                h.update(data);
            }
            State::Sha256(h) => h.update(data),
            State::Md5(h) => h.update(data),
        }
        self.bytes += data.len() as u64;
    }

    /// Number of bytes fed so far.
    pub fn bytes_hashed(&self) -> u64 {
        self.bytes
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn finalize(self) -> ObjectReference {
        let digest: Vec<u8> = match self.state {
            State::Blake3(h) => h.finalize().as_bytes().to_vec(),
            State::Sha256(h) => h.finalize().to_vec(),
            State::Md5(h) => h.finalize().to_vec(),
        };
        match ObjectReference::new(self.algorithm, &digest) {
            Ok(reference) => reference,
            // Each state produces exactly its algorithm's digest length.
            Err(e) => unreachable!("{e}"),
        }
    }

    /// Verify that `data` hashes to `expected`.
    pub fn verify(data: &[u8], expected: &ObjectReference) -> bool {
        Self::hash(expected.algorithm(), data) == *expected
    }
}

impl std::fmt::Debug for ContentHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentHasher")
            .field("algorithm", &self.algorithm)
            .field("bytes", &self.bytes)
            .finish()
    }
}

/// Hash everything `reader` yields, in [`CHUNK_SIZE`] chunks.
///
/// Returns the reference and the number of bytes read.
pub fn hash_reader<R: Read>(algorithm: HashAlgorithm, mut reader: R) -> io::Result<(ObjectReference, u64)> {
    let mut hasher = ContentHasher::new(algorithm);
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    let bytes = hasher.bytes_hashed();
    Ok((hasher.finalize(), bytes))
}

/// Writer adapter that hashes every byte accepted by the inner writer.
pub struct HashingWriter<W> {
    inner: W,
    hasher: ContentHasher,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(algorithm: HashAlgorithm, inner: W) -> Self {
        Self {
            inner,
            hasher: ContentHasher::new(algorithm),
        }
    }

    /// Bytes written through so far.
    pub fn bytes_written(&self) -> u64 {
        self.hasher.bytes_hashed()
    }

    /// Split into the inner writer, the computed reference, and the byte count.
    pub fn finish(self) -> (W, ObjectReference, u64) {
        let bytes = self.hasher.bytes_hashed();
        (self.inner, self.hasher.finalize(), bytes)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
