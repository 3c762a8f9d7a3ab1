//! Fault-injecting backend for orchestrator tests.

use std::collections::HashMap;
use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use odb_fs::{Backend, BackendError, BackendResult, Capabilities, MemoryBackend, PathIter, Stat, TempObject};
use odb_store::{ObjectStore, ObjectStoreConfig};
use odb_types::{Scheme, StorageLocation};

use crate::cancel::CancelToken;

#[derive(Clone, Copy, Debug)]
pub(crate) enum Fault {
    /// Fail this many calls, then recover.
    Transient(usize),
    AlwaysTransient,
}

/// Wraps a [`MemoryBackend`], failing chosen calls and counting temp writes.
#[derive(Debug)]
pub(crate) struct FaultyBackend {
    inner: MemoryBackend,
    read_faults: Mutex<HashMap<String, Fault>>,
    cancel_on_read: Mutex<Option<(String, CancelToken)>>,
    exists_fault: Mutex<Option<Fault>>,
    list_fault: Mutex<Option<Fault>>,
    checksums: Mutex<HashMap<String, String>>,
    unavailable: AtomicBool,
    temp_writes: AtomicUsize,
    lists: AtomicUsize,
}

impl FaultyBackend {
    pub(crate) fn new(inner: MemoryBackend) -> Self {
        Self {
            inner,
            read_faults: Mutex::new(HashMap::new()),
            cancel_on_read: Mutex::new(None),
            exists_fault: Mutex::new(None),
            list_fault: Mutex::new(None),
            checksums: Mutex::new(HashMap::new()),
            lists: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
            temp_writes: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_capabilities(capabilities: Capabilities) -> Self {
        Self::new(MemoryBackend::with_capabilities(capabilities))
    }

    pub(crate) fn fail_reads(&self, path: &str, fault: Fault) {
        self.read_faults.lock().unwrap().insert(path.to_string(), fault);
    }

    /// Fail `exists` calls on any path.
    pub(crate) fn fail_exists(&self, fault: Fault) {
        *self.exists_fault.lock().unwrap() = Some(fault);
    }

    /// Fail `list` calls under any prefix.
    pub(crate) fn fail_lists(&self, fault: Fault) {
        *self.list_fault.lock().unwrap() = Some(fault);
    }

    /// Report `checksum` from `stat` on `path`.
    pub(crate) fn report_checksum(&self, path: &str, checksum: &str) {
        self.checksums.lock().unwrap().insert(path.to_string(), checksum.to_string());
    }

    /// Number of `list` calls, failed ones included.
    pub(crate) fn lists(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    /// Cancel `token` when `path` is opened for reading.
    pub(crate) fn cancel_on_read(&self, path: &str, token: CancelToken) {
        *self.cancel_on_read.lock().unwrap() = Some((path.to_string(), token));
    }

    pub(crate) fn set_unavailable(&self) {
        self.unavailable.store(true, Ordering::SeqCst);
    }

    /// Number of temp objects opened, i.e. physical writes attempted.
    pub(crate) fn temp_writes(&self) -> usize {
        self.temp_writes.load(Ordering::SeqCst)
    }

    fn check(&self) -> BackendResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("connection refused".into()));
        }
        Ok(())
    }
}

impl Backend for FaultyBackend {
    fn scheme(&self) -> Scheme {
        self.inner.scheme()
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    fn open_read(&self, path: &str) -> BackendResult<Box<dyn Read + Send>> {
        self.check()?;
        if let Some((trigger, token)) = self.cancel_on_read.lock().unwrap().as_ref() {
            if trigger == path {
                token.cancel();
            }
        }
        trip(self.read_faults.lock().unwrap().get_mut(path), path)?;
        self.inner.open_read(path)
    }

    fn open_write_temp(&self, dir: &str) -> BackendResult<TempObject> {
        self.check()?;
        self.temp_writes.fetch_add(1, Ordering::SeqCst);
        self.inner.open_write_temp(dir)
    }

    fn list(&self, prefix: &str) -> BackendResult<PathIter<'_>> {
        self.check()?;
        self.lists.fetch_add(1, Ordering::SeqCst);
        trip(self.list_fault.lock().unwrap().as_mut(), prefix)?;
        self.inner.list(prefix)
    }

    fn stat(&self, path: &str) -> BackendResult<Stat> {
        self.check()?;
        let mut stat = self.inner.stat(path)?;
        if let Some(checksum) = self.checksums.lock().unwrap().get(path) {
            stat.checksum = Some(checksum.clone());
        }
        Ok(stat)
    }

    fn copy(&self, src: &str, dst: &str) -> BackendResult<()> {
        self.check()?;
        self.inner.copy(src, dst)
    }

    fn rename(&self, from: &str, to: &str) -> BackendResult<()> {
        self.check()?;
        self.inner.rename(from, to)
    }

    fn delete(&self, path: &str) -> BackendResult<()> {
        self.check()?;
        self.inner.delete(path)
    }

    fn exists(&self, path: &str) -> BackendResult<bool> {
        self.check()?;
        trip(self.exists_fault.lock().unwrap().as_mut(), path)?;
        self.inner.exists(path)
    }
}

/// Apply `fault`, consuming one failure from a counted fault.
fn trip(fault: Option<&mut Fault>, path: &str) -> BackendResult<()> {
    match fault {
        Some(Fault::AlwaysTransient) => Err(BackendError::Transient(format!("{path}: throttled"))),
        Some(Fault::Transient(remaining)) if *remaining > 0 => {
            *remaining -= 1;
            Err(BackendError::Transient(format!("{path}: timed out")))
        }
        _ => Ok(()),
    }
}

/// A memory-rooted store over `backend`.
pub(crate) fn store_on(backend: Arc<dyn Backend>, root: &str) -> Arc<ObjectStore> {
    Arc::new(ObjectStore::new(
        StorageLocation::memory(root),
        backend,
        ObjectStoreConfig::default(),
    ))
}

/// A fresh faulty backend and a store rooted at `root` on it.
pub(crate) fn faulty_store(root: &str) -> (Arc<FaultyBackend>, Arc<ObjectStore>) {
    let backend = Arc::new(FaultyBackend::new(MemoryBackend::new()));
    let store = store_on(backend.clone(), root);
    (backend, store)
}
