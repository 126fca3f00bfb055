//! Backend registries
//!
//! Two implementations of the same reader contract: an immutable
//! snapshot built once from discovery output, and a dynamic registry
//! mutated by the reconciler. The dynamic registry rotates copy-on-write
//! snapshots so readers never block writers, and bumps a strictly
//! monotonic version on every successful mutation. The version is the
//! sole cache-invalidation signal for consumers of the aggregated view.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use super::Backend;
use crate::{Error, Result};

/// Reader contract shared by both registry implementations
pub trait BackendRegistry: Send + Sync {
    /// Look up a backend by ID
    fn get(&self, id: &str) -> Option<Backend>;
    /// All backends, sorted by name then ID for deterministic rendering
    fn list(&self) -> Vec<Backend>;
    /// Number of registered backends
    fn count(&self) -> usize;
}

fn sorted(mut backends: Vec<Backend>) -> Vec<Backend> {
    backends.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
    backends
}

/// Immutable registry built once from a discovery result
#[derive(Debug, Clone, Default)]
pub struct ImmutableRegistry {
    backends: Arc<HashMap<String, Backend>>,
}

impl ImmutableRegistry {
    /// Build a registry over the given backends
    #[must_use]
    pub fn new(backends: Vec<Backend>) -> Self {
        Self {
            backends: Arc::new(backends.into_iter().map(|b| (b.id.clone(), b)).collect()),
        }
    }
}

impl BackendRegistry for ImmutableRegistry {
    fn get(&self, id: &str) -> Option<Backend> {
        self.backends.get(id).cloned()
    }

    fn list(&self) -> Vec<Backend> {
        sorted(self.backends.values().cloned().collect())
    }

    fn count(&self) -> usize {
        self.backends.len()
    }
}

/// Mutable registry driven by the reconciler
///
/// Every successful `upsert` or `remove` installs a fresh snapshot and
/// bumps the version under the write lock. Readers clone the current
/// snapshot `Arc` and observe a consistent view at some version.
#[derive(Debug, Default)]
pub struct DynamicRegistry {
    snapshot: RwLock<Arc<HashMap<String, Backend>>>,
    version: AtomicU64,
}

impl DynamicRegistry {
    /// Create an empty registry at version 0
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-populated with the given backends
    #[must_use]
    pub fn with_backends(backends: Vec<Backend>) -> Self {
        let registry = Self::new();
        let map: HashMap<String, Backend> =
            backends.into_iter().map(|b| (b.id.clone(), b)).collect();
        *registry.snapshot.write() = Arc::new(map);
        registry
    }

    /// Current registry version; strictly monotonic across successful
    /// mutations
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Insert or replace a backend, returning the new version
    ///
    /// # Errors
    ///
    /// Returns [`Error::Registry`] if the backend has an empty ID.
    pub fn upsert(&self, backend: Backend) -> Result<u64> {
        if backend.id.is_empty() {
            return Err(Error::Registry("backend id must not be empty".to_string()));
        }

        let mut guard = self.snapshot.write();
        let mut next = HashMap::clone(&guard);
        next.insert(backend.id.clone(), backend);
        *guard = Arc::new(next);
        Ok(self.version.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Remove a backend by ID, returning the current version
    ///
    /// Removing an absent ID is a no-op and does not bump the version.
    pub fn remove(&self, id: &str) -> Result<u64> {
        let mut guard = self.snapshot.write();
        if !guard.contains_key(id) {
            return Ok(self.version.load(Ordering::Acquire));
        }

        let mut next = HashMap::clone(&guard);
        next.remove(id);
        *guard = Arc::new(next);
        Ok(self.version.fetch_add(1, Ordering::AcqRel) + 1)
    }
}

impl BackendRegistry for DynamicRegistry {
    fn get(&self, id: &str) -> Option<Backend> {
        let snapshot = Arc::clone(&self.snapshot.read());
        snapshot.get(id).cloned()
    }

    fn list(&self) -> Vec<Backend> {
        let snapshot = Arc::clone(&self.snapshot.read());
        sorted(snapshot.values().cloned().collect())
    }

    fn count(&self) -> usize {
        self.snapshot.read().len()
    }
}
