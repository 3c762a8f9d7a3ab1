use std::collections::BTreeMap;
use std::io::{self, Cursor, Read, Write};
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use odb_types::Scheme;

use crate::error::{BackendError, BackendResult};
use crate::traits::{join_path, temp_name, Backend, Capabilities, ObjectWriter, PathIter, Stat, TempObject};

#[derive(Clone, Debug)]
struct Entry {
    data: Bytes,
    modified: DateTime<Utc>,
}

impl Entry {
    fn new(data: Bytes) -> Self {
        Self {
            data,
            modified: Utc::now(),
        }
    }
}

type Objects = Arc<RwLock<BTreeMap<String, Entry>>>;

/// In-memory, `BTreeMap`-based backend.
///
/// Intended for tests and embedding. Clones share the same object map, so
/// several stores rooted at different prefixes can live on one backend.
/// Payloads are `Bytes`, so reads never copy the stored data.
#[derive(Clone)]
pub struct MemoryBackend {
    objects: Objects,
    capabilities: Capabilities,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            objects: Arc::new(RwLock::new(BTreeMap::new())),
            capabilities: Capabilities::default(),
        }
    }

    /// Backend advertising the given capabilities.
    ///
    /// Without `atomic_rename`, [`rename`](Backend::rename) fails with
    /// [`BackendError::CrossDevice`], like a driver whose move is not atomic.
    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            ..Self::new()
        }
    }

    /// Number of stored objects, temp objects included.
    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().expect("lock poisoned").is_empty()
    }

    /// Sorted list of every stored path.
    pub fn paths(&self) -> Vec<String> {
        self.objects.read().expect("lock poisoned").keys().cloned().collect()
    }

    /// Store `data` at `path` directly, bypassing the temp protocol.
    pub fn insert(&self, path: &str, data: impl Into<Bytes>) {
        self.objects
            .write()
            .expect("lock poisoned")
            .insert(path.to_string(), Entry::new(data.into()));
    }

    fn get(&self, path: &str) -> BackendResult<Entry> {
        self.objects
            .read()
            .expect("lock poisoned")
            .get(path)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(path.to_string()))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("object_count", &self.len())
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

struct MemoryWriter {
    objects: Objects,
    path: String,
    buf: Vec<u8>,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ObjectWriter for MemoryWriter {
    fn finish(self: Box<Self>) -> BackendResult<()> {
        let MemoryWriter { objects, path, buf } = *self;
        objects
            .write()
            .expect("lock poisoned")
            .insert(path, Entry::new(Bytes::from(buf)));
        Ok(())
    }
}

fn under(prefix: &str, path: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    prefix.is_empty() || path == prefix || path.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('/'))
}

impl Backend for MemoryBackend {
    fn scheme(&self) -> Scheme {
        Scheme::Memory
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn open_read(&self, path: &str) -> BackendResult<Box<dyn Read + Send>> {
        let entry = self.get(path)?;
        Ok(Box::new(Cursor::new(entry.data)))
    }

    fn open_write_temp(&self, dir: &str) -> BackendResult<TempObject> {
        let path = join_path(dir, &[&temp_name()]);
        // Temp objects are visible to listings from the moment they exist.
        self.insert(&path, Bytes::new());
        Ok(TempObject {
            path: path.clone(),
            writer: Box::new(MemoryWriter {
                objects: Arc::clone(&self.objects),
                path,
                buf: Vec::new(),
            }),
        })
    }

    fn list(&self, prefix: &str) -> BackendResult<PathIter<'_>> {
        let map = self.objects.read().expect("lock poisoned");
        let paths: Vec<String> = map.keys().filter(|k| under(prefix, k)).cloned().collect();
        Ok(Box::new(paths.into_iter().map(Ok)))
    }

    fn stat(&self, path: &str) -> BackendResult<Stat> {
        let entry = self.get(path)?;
        Ok(Stat {
            size: entry.data.len() as u64,
            checksum: None,
            modified: Some(entry.modified),
        })
    }

    fn copy(&self, src: &str, dst: &str) -> BackendResult<()> {
        let mut map = self.objects.write().expect("lock poisoned");
        let entry = map
            .get(src)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(src.to_string()))?;
        map.insert(dst.to_string(), Entry::new(entry.data));
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> BackendResult<()> {
        if !self.capabilities.atomic_rename {
            return Err(BackendError::CrossDevice {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        let mut map = self.objects.write().expect("lock poisoned");
        let entry = map
            .remove(from)
            .ok_or_else(|| BackendError::NotFound(from.to_string()))?;
        map.insert(to.to_string(), entry);
        Ok(())
    }

    fn delete(&self, path: &str) -> BackendResult<()> {
        self.objects
            .write()
            .expect("lock poisoned")
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| BackendError::NotFound(path.to_string()))
    }

    fn exists(&self, path: &str) -> BackendResult<bool> {
        Ok(self.objects.read().expect("lock poisoned").contains_key(path))
    }

    fn read_all(&self, path: &str) -> BackendResult<Vec<u8>> {
        Ok(self.get(path)?.data.to_vec())
    }
}
