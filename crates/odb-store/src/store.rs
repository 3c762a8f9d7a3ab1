use std::collections::HashSet;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use odb_crypto::{hash_reader, ContentHasher, HashingWriter, CHUNK_SIZE};
use odb_fs::{Backend, BackendError, BackendRegistry, ObjectWriter, TempObject, TEMP_SUFFIX};
use odb_types::{HashAlgorithm, ObjectReference, StorageLocation, TypeError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::config::ObjectStoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::layout::{is_lower_hex, Layout, SHARD_LEN};

/// Shortest abbreviated digest accepted by [`ObjectStore::resolve_prefix`].
pub const MIN_PREFIX_LEN: usize = 3;

/// What `put` did with an object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub reference: ObjectReference,
    pub size: u64,
    /// `false` when the object was already present and nothing was written.
    pub created: bool,
}

/// Result of a garbage collection pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcReport {
    pub objects_removed: usize,
    pub temps_removed: usize,
    pub bytes_freed: u64,
}

/// Lazy iterator over stored references.
pub type ReferenceIter<'a> = Box<dyn Iterator<Item = StoreResult<ObjectReference>> + Send + 'a>;

/// A content-addressed object store on top of one [`Backend`].
///
/// The store owns no object data. It binds a [`StorageLocation`] to a
/// backend handle and a [`Layout`], and implements the write protocol:
/// content is streamed into a temp object next to the store root, hashed on
/// the way, and only then moved to its canonical address. Readers never see
/// a partially written object at a canonical path.
#[derive(Clone, Debug)]
pub struct ObjectStore {
    location: StorageLocation,
    backend: Arc<dyn Backend>,
    layout: Layout,
    config: ObjectStoreConfig,
}

impl ObjectStore {
    pub fn new(location: StorageLocation, backend: Arc<dyn Backend>, config: ObjectStoreConfig) -> Self {
        Self {
            location,
            backend,
            layout: Layout::new(config.algorithm),
            config,
        }
    }

    /// Open a store, picking the backend driver by the location's scheme.
    pub fn open(
        location: StorageLocation,
        registry: &BackendRegistry,
        config: ObjectStoreConfig,
    ) -> StoreResult<Self> {
        let backend = registry.open(&location)?;
        Ok(Self::new(location, backend, config))
    }

    pub fn location(&self) -> &StorageLocation {
        &self.location
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.config.algorithm
    }

    pub fn is_read_only(&self) -> bool {
        self.config.read_only
    }

    /// Canonical path of `reference` in this store.
    pub fn path_for(&self, reference: &ObjectReference) -> String {
        self.layout.path_for(&self.location.root, reference)
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Store everything `reader` yields.
    ///
    /// With `expected`, the write is skipped when that object already exists,
    /// and content that hashes to anything else is rejected with
    /// [`StoreError::HashMismatch`].
    pub fn put<R: Read>(&self, reader: R, expected: Option<&ObjectReference>) -> StoreResult<ObjectInfo> {
        self.ensure_writable()?;
        if let Some(expected) = expected {
            self.check_algorithm(expected)?;
            if let Some(size) = self.existing_size(expected)? {
                trace!(reference = %expected, "object already present, skipping write");
                return Ok(ObjectInfo {
                    reference: *expected,
                    size,
                    created: false,
                });
            }
        }
        self.write_new(reader, expected)
    }

    /// Store an in-memory buffer. Hashes first, so existing objects cost no I/O
    /// beyond an existence check.
    pub fn put_bytes(&self, data: &[u8]) -> StoreResult<ObjectInfo> {
        self.ensure_writable()?;
        let reference = ContentHasher::hash(self.algorithm(), data);
        if self.contains(&reference)? {
            return Ok(ObjectInfo {
                reference,
                size: data.len() as u64,
                created: false,
            });
        }
        self.write_new(data, Some(&reference))
    }

    /// Delete an object. Returns `false` if it was not there.
    pub fn remove(&self, reference: &ObjectReference) -> StoreResult<bool> {
        self.ensure_writable()?;
        let removed = self.delete_path(&self.path_for(reference))?;
        if removed {
            debug!(reference = %reference, "removed object");
        }
        Ok(removed)
    }

    fn write_new<R: Read>(&self, reader: R, expected: Option<&ObjectReference>) -> StoreResult<ObjectInfo> {
        let TempObject { path: temp, writer } = self.backend.open_write_temp(&self.location.root)?;
        trace!(temp = %temp, "streaming into temp object");
        let result = self
            .fill_temp(reader, writer, &temp)
            .and_then(|(computed, size)| self.commit(&temp, computed, size, expected));
        if result.is_err() {
            self.discard(&temp);
        }
        result
    }

    fn fill_temp<R: Read>(
        &self,
        mut reader: R,
        writer: Box<dyn ObjectWriter>,
        temp: &str,
    ) -> StoreResult<(ObjectReference, u64)> {
        let mut hashing = HashingWriter::new(self.algorithm(), writer);
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            hashing
                .write_all(&buf[..n])
                .map_err(|e| BackendError::from_io(temp, e))?;
        }
        let (writer, computed, size) = hashing.finish();
        writer.finish()?;
        Ok((computed, size))
    }

    fn commit(
        &self,
        temp: &str,
        computed: ObjectReference,
        size: u64,
        expected: Option<&ObjectReference>,
    ) -> StoreResult<ObjectInfo> {
        if let Some(expected) = expected {
            if *expected != computed {
                warn!(expected = %expected, computed = %computed, "content does not match its reference");
                return Err(StoreError::HashMismatch {
                    expected: *expected,
                    computed,
                });
            }
        }

        let canonical = self.path_for(&computed);
        if self.backend.exists(&canonical)? {
            self.discard(temp);
            debug!(reference = %computed, "object already present");
            return Ok(ObjectInfo {
                reference: computed,
                size,
                created: false,
            });
        }

        self.place(temp, &canonical)?;
        debug!(reference = %computed, size, "committed object");
        Ok(ObjectInfo {
            reference: computed,
            size,
            created: true,
        })
    }

    /// Move a finished temp object to its canonical path.
    ///
    /// Renames when the backend can do so atomically, otherwise copies and
    /// drops the temp.
    fn place(&self, temp: &str, canonical: &str) -> StoreResult<()> {
        if self.backend.capabilities().atomic_rename {
            match self.backend.rename(temp, canonical) {
                Ok(()) => return Ok(()),
                Err(BackendError::CrossDevice { .. }) => {
                    debug!(temp = %temp, "rename crossed devices, copying instead");
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.backend.copy(temp, canonical)?;
        self.discard(temp);
        Ok(())
    }

    fn discard(&self, temp: &str) {
        match self.backend.delete(temp) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(temp = %temp, error = %e, "failed to remove temp object"),
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Open an object for streaming reads.
    pub fn get(&self, reference: &ObjectReference) -> StoreResult<Box<dyn Read + Send>> {
        self.backend
            .open_read(&self.path_for(reference))
            .map_err(|e| missing(reference, e))
    }

    pub fn get_bytes(&self, reference: &ObjectReference) -> StoreResult<Vec<u8>> {
        self.backend
            .read_all(&self.path_for(reference))
            .map_err(|e| missing(reference, e))
    }

    /// Existence check only; content is not read.
    pub fn contains(&self, reference: &ObjectReference) -> StoreResult<bool> {
        Ok(self.backend.exists(&self.path_for(reference))?)
    }

    /// Size of a stored object in bytes.
    pub fn stat(&self, reference: &ObjectReference) -> StoreResult<u64> {
        self.backend
            .stat(&self.path_for(reference))
            .map(|s| s.size)
            .map_err(|e| missing(reference, e))
    }

    /// Check an object from backend metadata alone, without reading content.
    ///
    /// Fails with [`StoreError::SizeMismatch`] when the stored size differs
    /// from `expected_size`, and with [`StoreError::HashMismatch`] when the
    /// backend reports a native checksum in the reference's algorithm that
    /// names different content. Returns the stored size.
    pub fn check_metadata(&self, reference: &ObjectReference, expected_size: Option<u64>) -> StoreResult<u64> {
        let stat = self
            .backend
            .stat(&self.path_for(reference))
            .map_err(|e| missing(reference, e))?;
        if let Some(expected) = expected_size {
            if stat.size != expected {
                return Err(StoreError::SizeMismatch {
                    reference: *reference,
                    expected,
                    actual: stat.size,
                });
            }
        }
        let reported = stat
            .checksum
            .as_deref()
            .and_then(|c| ObjectReference::from_hex(reference.algorithm(), &c.to_ascii_lowercase()).ok());
        if let Some(reported) = reported {
            if reported != *reference {
                warn!(reference = %reference, reported = %reported, "backend checksum disagrees with address");
                return Err(StoreError::HashMismatch {
                    expected: *reference,
                    computed: reported,
                });
            }
        }
        Ok(stat.size)
    }

    /// Re-hash stored content and compare it with its address.
    pub fn verify(&self, reference: &ObjectReference) -> StoreResult<bool> {
        let reader = self.get(reference)?;
        let (computed, _) = hash_reader(reference.algorithm(), reader)?;
        if computed != *reference {
            warn!(reference = %reference, computed = %computed, "stored object is corrupt");
        }
        Ok(computed == *reference)
    }

    // -----------------------------------------------------------------------
    // Listing
    // -----------------------------------------------------------------------

    /// Every stored reference. Paths that do not follow the layout are skipped.
    pub fn all(&self) -> StoreResult<ReferenceIter<'_>> {
        self.references_under(&self.location.root)
    }

    /// References in one shard directory (`"00"` to `"ff"`).
    pub fn list_prefix(&self, shard: &str) -> StoreResult<ReferenceIter<'_>> {
        if shard.len() != SHARD_LEN || !is_lower_hex(shard) {
            return Err(TypeError::invalid_hash(shard, "shard must be two lowercase hex characters").into());
        }
        let dir = odb_fs::join_path(&self.location.root, &[shard]);
        self.references_under(&dir)
    }

    /// Resolve an abbreviated hex digest to the one stored reference it names.
    pub fn resolve_prefix(&self, prefix: &str) -> StoreResult<ObjectReference> {
        let prefix = prefix.to_ascii_lowercase();
        if prefix.len() < MIN_PREFIX_LEN || prefix.len() > self.algorithm().hex_len() || !is_lower_hex(&prefix) {
            return Err(TypeError::invalid_hash(
                &prefix,
                format!("expected {MIN_PREFIX_LEN} to {} hex characters", self.algorithm().hex_len()),
            )
            .into());
        }
        let mut candidates = Vec::new();
        for reference in self.list_prefix(&prefix[..SHARD_LEN])? {
            let reference = reference?;
            if reference.to_hex().starts_with(&prefix) {
                candidates.push(reference);
            }
        }
        match candidates.len() {
            0 => Err(StoreError::PrefixNotFound(prefix)),
            1 => Ok(candidates[0]),
            _ => {
                candidates.sort();
                Err(StoreError::AmbiguousPrefix { prefix, candidates })
            }
        }
    }

    fn references_under(&self, dir: &str) -> StoreResult<ReferenceIter<'_>> {
        let paths = self.backend.list(dir)?;
        Ok(Box::new(paths.filter_map(move |path| match path {
            Ok(path) => self.object_at(&path).map(Ok),
            Err(e) => Some(Err(e.into())),
        })))
    }

    fn object_at(&self, path: &str) -> Option<ObjectReference> {
        match self.layout.reference_for(path) {
            Ok(reference) if self.path_for(&reference) == path => Some(reference),
            _ => {
                if !is_temp(path) {
                    debug!(path = %path, "skipping path outside the object layout");
                }
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // Garbage collection
    // -----------------------------------------------------------------------

    /// Remove every object not in `keep`, plus temp objects older than
    /// `temp_grace` left behind by interrupted writes.
    pub fn gc(&self, keep: &HashSet<ObjectReference>, temp_grace: Duration) -> StoreResult<GcReport> {
        self.ensure_writable()?;
        let paths = self
            .backend
            .list(&self.location.root)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut report = GcReport::default();
        for path in paths {
            let is_temp = is_temp(&path);
            if !is_temp && self.object_at(&path).map_or(true, |r| keep.contains(&r)) {
                continue;
            }
            let stat = match self.backend.stat(&path) {
                Ok(stat) => stat,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            };
            if is_temp && !older_than(stat.modified, temp_grace) {
                continue;
            }
            if self.delete_path(&path)? {
                if is_temp {
                    report.temps_removed += 1;
                } else {
                    report.objects_removed += 1;
                }
                report.bytes_freed += stat.size;
            }
        }
        info!(
            objects_removed = report.objects_removed,
            temps_removed = report.temps_removed,
            bytes_freed = report.bytes_freed,
            "garbage collection finished"
        );
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn ensure_writable(&self) -> StoreResult<()> {
        if self.config.read_only {
            return Err(StoreError::ReadOnly);
        }
        Ok(())
    }

    fn check_algorithm(&self, reference: &ObjectReference) -> StoreResult<()> {
        if reference.algorithm() != self.algorithm() {
            return Err(TypeError::invalid_hash(
                &reference.to_string(),
                format!("store is keyed by {}", self.algorithm()),
            )
            .into());
        }
        Ok(())
    }

    fn existing_size(&self, reference: &ObjectReference) -> StoreResult<Option<u64>> {
        match self.backend.stat(&self.path_for(reference)) {
            Ok(stat) => Ok(Some(stat.size)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete_path(&self, path: &str) -> StoreResult<bool> {
        match self.backend.delete(path) {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn missing(reference: &ObjectReference, err: BackendError) -> StoreError {
    if err.is_not_found() {
        StoreError::NotFound(*reference)
    } else {
        err.into()
    }
}

fn is_temp(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.starts_with('.') && name.ends_with(TEMP_SUFFIX)
}

fn older_than(modified: Option<DateTime<Utc>>, grace: Duration) -> bool {
    match modified {
        // No timestamp: nothing can prove the temp is still in use.
        None => true,
        Some(modified) => Utc::now()
            .signed_duration_since(modified)
            .to_std()
            .map(|age| age >= grace)
            .unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odb_fs::{Capabilities, MemoryBackend, PathIter, Stat};

    fn memory_store() -> (MemoryBackend, ObjectStore) {
        let backend = MemoryBackend::new();
        let store = ObjectStore::new(
            StorageLocation::memory("odb"),
            Arc::new(backend.clone()),
            ObjectStoreConfig::default(),
        );
        (backend, store)
    }

    fn blake3(data: &[u8]) -> ObjectReference {
        ContentHasher::hash(HashAlgorithm::Blake3, data)
    }

    /// Delegates to a memory backend but refuses to commit temp objects.
    #[derive(Debug)]
    struct BrokenCommit(MemoryBackend);

    impl Backend for BrokenCommit {
        fn scheme(&self) -> odb_types::Scheme {
            self.0.scheme()
        }
        fn open_read(&self, path: &str) -> odb_fs::BackendResult<Box<dyn Read + Send>> {
            self.0.open_read(path)
        }
        fn open_write_temp(&self, dir: &str) -> odb_fs::BackendResult<TempObject> {
            self.0.open_write_temp(dir)
        }
        fn list(&self, prefix: &str) -> odb_fs::BackendResult<PathIter<'_>> {
            self.0.list(prefix)
        }
        fn stat(&self, path: &str) -> odb_fs::BackendResult<Stat> {
            self.0.stat(path)
        }
        fn copy(&self, _src: &str, dst: &str) -> odb_fs::BackendResult<()> {
            Err(BackendError::from_io(dst, io::Error::new(io::ErrorKind::Other, "disk full")))
        }
        fn rename(&self, _from: &str, to: &str) -> odb_fs::BackendResult<()> {
            Err(BackendError::from_io(to, io::Error::new(io::ErrorKind::Other, "disk full")))
        }
        fn delete(&self, path: &str) -> odb_fs::BackendResult<()> {
            self.0.delete(path)
        }
        fn exists(&self, path: &str) -> odb_fs::BackendResult<bool> {
            self.0.exists(path)
        }
    }

    /// Claims atomic rename but every rename crosses a device boundary.
    #[derive(Debug)]
    struct CrossDeviceRename {
        inner: MemoryBackend,
        renames: std::sync::atomic::AtomicUsize,
    }

    impl Backend for CrossDeviceRename {
        fn scheme(&self) -> odb_types::Scheme {
            self.inner.scheme()
        }
        fn open_read(&self, path: &str) -> odb_fs::BackendResult<Box<dyn Read + Send>> {
            self.inner.open_read(path)
        }
        fn open_write_temp(&self, dir: &str) -> odb_fs::BackendResult<TempObject> {
            self.inner.open_write_temp(dir)
        }
        fn list(&self, prefix: &str) -> odb_fs::BackendResult<PathIter<'_>> {
            self.inner.list(prefix)
        }
        fn stat(&self, path: &str) -> odb_fs::BackendResult<Stat> {
            self.inner.stat(path)
        }
        fn copy(&self, src: &str, dst: &str) -> odb_fs::BackendResult<()> {
            self.inner.copy(src, dst)
        }
        fn rename(&self, from: &str, to: &str) -> odb_fs::BackendResult<()> {
            self.renames.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Err(BackendError::CrossDevice {
                from: from.to_string(),
                to: to.to_string(),
            })
        }
        fn delete(&self, path: &str) -> odb_fs::BackendResult<()> {
            self.inner.delete(path)
        }
        fn exists(&self, path: &str) -> odb_fs::BackendResult<bool> {
            self.inner.exists(path)
        }
    }

    /// Reports a fixed checksum for every object.
    #[derive(Debug)]
    struct Checksummed(MemoryBackend, String);

    impl Backend for Checksummed {
        fn scheme(&self) -> odb_types::Scheme {
            self.0.scheme()
        }
        fn open_read(&self, path: &str) -> odb_fs::BackendResult<Box<dyn Read + Send>> {
            self.0.open_read(path)
        }
        fn open_write_temp(&self, dir: &str) -> odb_fs::BackendResult<TempObject> {
            self.0.open_write_temp(dir)
        }
        fn list(&self, prefix: &str) -> odb_fs::BackendResult<PathIter<'_>> {
            self.0.list(prefix)
        }
        fn stat(&self, path: &str) -> odb_fs::BackendResult<Stat> {
            let mut stat = self.0.stat(path)?;
            stat.checksum = Some(self.1.clone());
            Ok(stat)
        }
        fn copy(&self, src: &str, dst: &str) -> odb_fs::BackendResult<()> {
            self.0.copy(src, dst)
        }
        fn rename(&self, from: &str, to: &str) -> odb_fs::BackendResult<()> {
            self.0.rename(from, to)
        }
        fn delete(&self, path: &str) -> odb_fs::BackendResult<()> {
            self.0.delete(path)
        }
        fn exists(&self, path: &str) -> odb_fs::BackendResult<bool> {
            self.0.exists(path)
        }
    }

    /// Yields some bytes, then fails.
    struct FailingReader {
        sent: bool,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.sent {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer went away"));
            }
            self.sent = true;
            buf[..4].copy_from_slice(b"part");
            Ok(4)
        }
    }

    // -----------------------------------------------------------------------
    // Put / get
    // -----------------------------------------------------------------------

    #[test]
    fn put_then_get() {
        let (_, store) = memory_store();
        let info = store.put(&b"hello world"[..], None).unwrap();
        assert!(info.created);
        assert_eq!(info.size, 11);
        assert_eq!(info.reference, blake3(b"hello world"));
        assert_eq!(store.get_bytes(&info.reference).unwrap(), b"hello world");

        let mut streamed = Vec::new();
        store.get(&info.reference).unwrap().read_to_end(&mut streamed).unwrap();
        assert_eq!(streamed, b"hello world");
    }

    #[test]
    fn empty_content_is_an_object() {
        let (_, store) = memory_store();
        let info = store.put_bytes(b"").unwrap();
        assert_eq!(info.size, 0);
        assert!(store.contains(&info.reference).unwrap());
        assert!(store.get_bytes(&info.reference).unwrap().is_empty());
    }

    #[test]
    fn object_lands_at_canonical_path() {
        let (backend, store) = memory_store();
        let info = store.put_bytes(b"addressed").unwrap();
        let hex = info.reference.to_hex();
        assert_eq!(backend.paths(), vec![format!("odb/{}/{}", &hex[..2], &hex[2..])]);
    }

    #[test]
    fn put_is_idempotent() {
        let (backend, store) = memory_store();
        let first = store.put(&b"same"[..], None).unwrap();
        let second = store.put(&b"same"[..], None).unwrap();
        assert_eq!(first.reference, second.reference);
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(backend.len(), 1);

        let third = store.put_bytes(b"same").unwrap();
        assert!(!third.created);
        assert_eq!(backend.len(), 1);
    }

    #[test]
    fn known_reference_skips_the_write() {
        let (_, store) = memory_store();
        let info = store.put_bytes(b"present").unwrap();
        // The reader is never touched.
        let out = store
            .put(FailingReader { sent: true }, Some(&info.reference))
            .unwrap();
        assert!(!out.created);
        assert_eq!(out.size, 7);
    }

    #[test]
    fn hash_mismatch_leaves_nothing_behind() {
        let (backend, store) = memory_store();
        let claimed = blake3(b"what the caller promised");
        let err = store.put(&b"what actually arrived"[..], Some(&claimed)).unwrap_err();
        assert!(matches!(err, StoreError::HashMismatch { expected, .. } if expected == claimed));
        assert!(!store.contains(&claimed).unwrap());
        assert!(!store.contains(&blake3(b"what actually arrived")).unwrap());
        assert!(backend.is_empty());
    }

    #[test]
    fn failed_commit_leaves_nothing_at_canonical_path() {
        let memory = MemoryBackend::new();
        let store = ObjectStore::new(
            StorageLocation::memory("odb"),
            Arc::new(BrokenCommit(memory.clone())),
            ObjectStoreConfig::default(),
        );
        let err = store.put(&b"never committed"[..], None).unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        assert!(!store.contains(&blake3(b"never committed")).unwrap());
        assert!(memory.is_empty(), "temp object left behind: {:?}", memory.paths());
    }

    #[test]
    fn failing_reader_leaves_nothing_behind() {
        let (backend, store) = memory_store();
        let err = store.put(FailingReader { sent: false }, None).unwrap_err();
        assert!(err.is_transient());
        assert!(backend.is_empty());
    }

    #[test]
    fn non_atomic_backend_falls_back_to_copy() {
        let backend = MemoryBackend::with_capabilities(Capabilities {
            atomic_rename: false,
            can_traverse: true,
        });
        let store = ObjectStore::new(
            StorageLocation::memory("odb"),
            Arc::new(backend.clone()),
            ObjectStoreConfig::default(),
        );
        let info = store.put_bytes(b"copied into place").unwrap();
        assert!(info.created);
        assert_eq!(store.get_bytes(&info.reference).unwrap(), b"copied into place");
        assert_eq!(backend.len(), 1);
    }

    #[test]
    fn cross_device_rename_falls_back_to_copy() {
        let memory = MemoryBackend::new();
        let backend = Arc::new(CrossDeviceRename {
            inner: memory.clone(),
            renames: Default::default(),
        });
        assert!(backend.capabilities().atomic_rename);
        let store = ObjectStore::new(
            StorageLocation::memory("odb"),
            backend.clone(),
            ObjectStoreConfig::default(),
        );

        let info = store.put(&b"moved across devices"[..], None).unwrap();
        assert!(info.created);
        assert_eq!(backend.renames.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(memory.paths(), vec![store.path_for(&info.reference)]);
        assert_eq!(store.get_bytes(&info.reference).unwrap(), b"moved across devices");
    }

    #[test]
    fn sha256_store() {
        let store = ObjectStore::new(
            StorageLocation::memory("odb"),
            Arc::new(MemoryBackend::new()),
            ObjectStoreConfig {
                algorithm: HashAlgorithm::Sha256,
                read_only: false,
            },
        );
        let info = store.put_bytes(b"abc").unwrap();
        assert_eq!(info.reference.algorithm(), HashAlgorithm::Sha256);
        assert!(store.verify(&info.reference).unwrap());
        assert_eq!(store.all().unwrap().count(), 1);
    }

    #[test]
    fn md5_store_uses_short_names() {
        let backend = MemoryBackend::new();
        let store = ObjectStore::new(
            StorageLocation::memory("odb"),
            Arc::new(backend.clone()),
            ObjectStoreConfig {
                algorithm: HashAlgorithm::Md5,
                read_only: false,
            },
        );
        let info = store.put(&b"abc"[..], None).unwrap();
        assert_eq!(info.reference.to_hex(), "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(backend.paths(), vec!["odb/90/0150983cd24fb0d6963f7d28e17f72".to_string()]);
        assert_eq!(store.all().unwrap().map(|r| r.unwrap()).collect::<Vec<_>>(), vec![info.reference]);
        assert_eq!(store.resolve_prefix("900150").unwrap(), info.reference);
        assert!(store.verify(&info.reference).unwrap());
    }

    #[test]
    fn foreign_algorithm_rejected() {
        let (_, store) = memory_store();
        let sha = ContentHasher::hash(HashAlgorithm::Sha256, b"x");
        let err = store.put(&b"x"[..], Some(&sha)).unwrap_err();
        assert!(matches!(err, StoreError::InvalidHash(_)));
    }

    #[test]
    fn missing_object_is_not_found() {
        let (_, store) = memory_store();
        let r = blake3(b"absent");
        assert!(matches!(store.get(&r), Err(StoreError::NotFound(x)) if x == r));
        assert!(matches!(store.get_bytes(&r), Err(StoreError::NotFound(_))));
        assert!(matches!(store.stat(&r), Err(StoreError::NotFound(_))));
        assert!(!store.contains(&r).unwrap());
    }

    #[test]
    fn remove_is_idempotent() {
        let (_, store) = memory_store();
        let info = store.put_bytes(b"short lived").unwrap();
        assert!(store.remove(&info.reference).unwrap());
        assert!(!store.remove(&info.reference).unwrap());
        assert!(!store.contains(&info.reference).unwrap());
    }

    #[test]
    fn read_only_rejects_writes() {
        let backend = MemoryBackend::new();
        let writable = ObjectStore::new(
            StorageLocation::memory("odb"),
            Arc::new(backend.clone()),
            ObjectStoreConfig::default(),
        );
        let info = writable.put_bytes(b"frozen").unwrap();

        let store = ObjectStore::new(
            StorageLocation::memory("odb"),
            Arc::new(backend),
            ObjectStoreConfig::read_only(),
        );
        assert!(matches!(store.put_bytes(b"new"), Err(StoreError::ReadOnly)));
        assert!(matches!(store.remove(&info.reference), Err(StoreError::ReadOnly)));
        assert!(matches!(store.gc(&HashSet::new(), Duration::ZERO), Err(StoreError::ReadOnly)));
        assert_eq!(store.get_bytes(&info.reference).unwrap(), b"frozen");
    }

    #[test]
    fn check_metadata_compares_size() {
        let (_, store) = memory_store();
        let r = store.put_bytes(b"twelve bytes").unwrap().reference;
        assert_eq!(store.check_metadata(&r, None).unwrap(), 12);
        assert_eq!(store.check_metadata(&r, Some(12)).unwrap(), 12);
        let err = store.check_metadata(&r, Some(13)).unwrap_err();
        assert!(matches!(err, StoreError::SizeMismatch { expected: 13, actual: 12, .. }));
        assert!(matches!(store.check_metadata(&blake3(b"absent"), None), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn check_metadata_trusts_matching_backend_checksum_only() {
        let memory = MemoryBackend::new();
        let md5 = ObjectStoreConfig {
            algorithm: HashAlgorithm::Md5,
            read_only: false,
        };
        let r = ObjectStore::new(StorageLocation::memory("odb"), Arc::new(memory.clone()), md5.clone())
            .put_bytes(b"abc")
            .unwrap()
            .reference;

        let honest = ObjectStore::new(
            StorageLocation::memory("odb"),
            Arc::new(Checksummed(memory.clone(), "900150983CD24FB0D6963F7D28E17F72".into())),
            md5.clone(),
        );
        assert_eq!(honest.check_metadata(&r, None).unwrap(), 3);

        let stale = ObjectStore::new(
            StorageLocation::memory("odb"),
            Arc::new(Checksummed(memory.clone(), "d41d8cd98f00b204e9800998ecf8427e".into())),
            md5,
        );
        assert!(matches!(stale.check_metadata(&r, None), Err(StoreError::HashMismatch { .. })));

        // An etag-style value that is not a digest is ignored.
        let opaque = ObjectStore::new(
            StorageLocation::memory("odb"),
            Arc::new(Checksummed(memory, "\"3-abcdef\"".into())),
            ObjectStoreConfig {
                algorithm: HashAlgorithm::Md5,
                read_only: false,
            },
        );
        assert!(opaque.check_metadata(&r, None).is_ok());
    }

    #[test]
    fn verify_detects_corruption() {
        let (backend, store) = memory_store();
        let info = store.put_bytes(b"pristine").unwrap();
        assert!(store.verify(&info.reference).unwrap());
        backend.insert(&store.path_for(&info.reference), "tampered");
        assert!(!store.verify(&info.reference).unwrap());
    }

    #[test]
    fn local_disk_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(
            StorageLocation::local(dir.path().to_string_lossy()),
            &BackendRegistry::default(),
            ObjectStoreConfig::default(),
        )
        .unwrap();
        let info = store.put(&b"on disk"[..], None).unwrap();
        assert!(info.created);
        assert!(std::path::Path::new(&store.path_for(&info.reference)).is_file());
        assert_eq!(store.get_bytes(&info.reference).unwrap(), b"on disk");
        assert!(!store.put_bytes(b"on disk").unwrap().created);

        let listed: Vec<_> = store.all().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(listed, vec![info.reference]);
    }

    // -----------------------------------------------------------------------
    // Listing
    // -----------------------------------------------------------------------

    #[test]
    fn all_skips_foreign_paths_and_temps() {
        let (backend, store) = memory_store();
        let a = store.put_bytes(b"a").unwrap().reference;
        let b = store.put_bytes(b"b").unwrap().reference;
        backend.insert("odb/README", "not an object");
        backend.insert("odb/zz/notahash", "nope");
        backend.insert("odb/.0190.tmp", "partial");

        let mut listed: Vec<_> = store.all().unwrap().map(|r| r.unwrap()).collect();
        listed.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(listed, expected);
    }

    #[test]
    fn list_prefix_reads_one_shard() {
        let (_, store) = memory_store();
        let r = store.put_bytes(b"sharded").unwrap().reference;
        let shard = Layout::shard_of(&r);
        let listed: Vec<_> = store.list_prefix(&shard).unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(listed, vec![r]);
        assert!(store.list_prefix("xyz").is_err());
    }

    #[test]
    fn resolve_prefix_cases() {
        let (backend, store) = memory_store();
        let tail0 = format!("c0{}", "0".repeat(60));
        let tail1 = format!("c1{}", "1".repeat(60));
        backend.insert(&format!("odb/ab/{tail0}"), "x");
        backend.insert(&format!("odb/ab/{tail1}"), "y");

        let unique = store.resolve_prefix("ABC0").unwrap();
        assert_eq!(unique.to_hex(), format!("ab{tail0}"));

        match store.resolve_prefix("abc").unwrap_err() {
            StoreError::AmbiguousPrefix { candidates, .. } => assert_eq!(candidates.len(), 2),
            other => panic!("expected ambiguity, got {other:?}"),
        }
        assert!(matches!(store.resolve_prefix("abd"), Err(StoreError::PrefixNotFound(_))));
        assert!(matches!(store.resolve_prefix("ab"), Err(StoreError::InvalidHash(_))));
        assert!(matches!(store.resolve_prefix("abq"), Err(StoreError::InvalidHash(_))));
    }

    // -----------------------------------------------------------------------
    // Garbage collection
    // -----------------------------------------------------------------------

    #[test]
    fn gc_removes_unreferenced_objects_and_stale_temps() {
        let (backend, store) = memory_store();
        let keep = store.put_bytes(b"keep me").unwrap().reference;
        let unreferenced = store.put_bytes(b"drop me").unwrap().reference;
        backend.insert("odb/.0190stale.tmp", "abandoned");

        let report = store.gc(&HashSet::from([keep]), Duration::ZERO).unwrap();
        assert_eq!(report.objects_removed, 1);
        assert_eq!(report.temps_removed, 1);
        assert_eq!(report.bytes_freed, 7 + 9);
        assert!(store.contains(&keep).unwrap());
        assert!(!store.contains(&unreferenced).unwrap());
        assert_eq!(backend.len(), 1);
    }

    #[test]
    fn gc_spares_fresh_temps_and_foreign_files() {
        let (backend, store) = memory_store();
        backend.insert("odb/.0190fresh.tmp", "in flight");
        backend.insert("odb/README", "docs");

        let report = store.gc(&HashSet::new(), Duration::from_secs(3600)).unwrap();
        assert_eq!(report, GcReport::default());
        assert_eq!(backend.len(), 2);
    }

    #[test]
    fn gc_report_serializes() {
        let report = GcReport {
            objects_removed: 2,
            temps_removed: 1,
            bytes_freed: 42,
        };
        let json = serde_json::to_value(report).unwrap();
        assert_eq!(json["bytes_freed"], 42);
    }
}
