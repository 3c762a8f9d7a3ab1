use std::collections::HashMap;
use std::sync::Arc;

use odb_types::{Scheme, StorageLocation};
use tracing::debug;

use crate::error::{BackendError, BackendResult};
use crate::local::LocalBackend;
use crate::memory::MemoryBackend;
use crate::traits::Backend;

/// Builds a backend handle for a location of one scheme.
pub type BackendFactory = Box<dyn Fn(&StorageLocation) -> BackendResult<Arc<dyn Backend>> + Send + Sync>;

/// Maps a [`Scheme`] to the driver that serves it.
///
/// The default registry knows `local` and `memory`. All `memory://`
/// locations opened through one registry share a single object map, so two
/// stores with different roots can be compared in-process.
pub struct BackendRegistry {
    factories: HashMap<Scheme, BackendFactory>,
}

impl BackendRegistry {
    /// Registry with no drivers at all.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Install or replace the driver for `scheme`.
    pub fn register<F>(&mut self, scheme: Scheme, factory: F)
    where
        F: Fn(&StorageLocation) -> BackendResult<Arc<dyn Backend>> + Send + Sync + 'static,
    {
        self.factories.insert(scheme, Box::new(factory));
    }

    pub fn supports(&self, scheme: Scheme) -> bool {
        self.factories.contains_key(&scheme)
    }

    /// Open a backend handle for `location`.
    pub fn open(&self, location: &StorageLocation) -> BackendResult<Arc<dyn Backend>> {
        let factory = self.factories.get(&location.scheme).ok_or_else(|| {
            BackendError::Unavailable(format!("no driver registered for scheme {}", location.scheme))
        })?;
        debug!(location = %location, "opening backend");
        factory(location)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(Scheme::Local, |_| Ok(Arc::new(LocalBackend::new()) as Arc<dyn Backend>));
        let memory = MemoryBackend::new();
        registry.register(Scheme::Memory, move |_| Ok(Arc::new(memory.clone()) as Arc<dyn Backend>));
        registry
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut schemes: Vec<_> = self.factories.keys().collect();
        schemes.sort();
        f.debug_struct("BackendRegistry").field("schemes", &schemes).finish()
    }
}
