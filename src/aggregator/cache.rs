//! Version-keyed cache for aggregated capability views
//!
//! The dynamic registry's version counter is the sole invalidation
//! signal: a cached view is served only while the registry still
//! reports the version it was built at. No TTLs, no subscriptions.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use super::types::AggregatedCapabilities;

struct CachedView {
    version: u64,
    view: Arc<AggregatedCapabilities>,
}

/// Cache of aggregated views keyed by group
pub struct CapabilityCache {
    entries: DashMap<String, CachedView>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CapabilityCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Fetch the cached view for `group` if it was built at
    /// `registry_version`; stale entries are evicted
    pub fn get(&self, group: &str, registry_version: u64) -> Option<Arc<AggregatedCapabilities>> {
        if let Some(entry) = self.entries.get(group) {
            if entry.version == registry_version {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(Arc::clone(&entry.view));
            }
            drop(entry);
            self.entries.remove(group);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store the view built at `registry_version`
    pub fn insert(
        &self,
        group: impl Into<String>,
        registry_version: u64,
        view: Arc<AggregatedCapabilities>,
    ) {
        self.entries.insert(
            group.into(),
            CachedView {
                version: registry_version,
                view,
            },
        );
    }

    /// Drop the cached view for `group`
    pub fn invalidate(&self, group: &str) {
        self.entries.remove(group);
    }

    /// Served-from-cache count
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Miss count (absent or stale)
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl Default for CapabilityCache {
    fn default() -> Self {
        Self::new()
    }
}
