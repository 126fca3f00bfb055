//! Cluster-mode reconciliation
//!
//! Keeps a [`DynamicRegistry`] in step with the workload resources of
//! one group in one namespace. Events on `MCPServer`, `MCPRemoteProxy`
//! and `MCPExternalAuthConfig` resources map to reconcile requests; the
//! reconciler fetches current state and drives the registry toward it.
//! Secrets are not watched directly; credential rotation reaches
//! backends through `MCPExternalAuthConfig` updates or pod restarts.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{AuthResolver, apply_auth_config_to_backend};
use crate::backend::{Backend, BackendRegistry, DynamicRegistry};
use crate::config::OutgoingAuthConfig;
use crate::discovery::{ClusterClient, TypedWorkload, WorkloadDiscoverer};
use crate::{Error, Result};

/// Reconcile retry attempts before an event is dropped
const MAX_RECONCILE_ATTEMPTS: u32 = 3;

/// Watched resource kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// An `MCPServer` workload
    McpServer,
    /// An `MCPRemoteProxy` workload
    McpRemoteProxy,
    /// An `MCPExternalAuthConfig` credential document
    McpExternalAuthConfig,
}

/// Namespace-qualified resource name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamespacedName {
    /// Resource namespace
    pub namespace: String,
    /// Resource name
    pub name: String,
}

impl NamespacedName {
    /// Build a namespaced name
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A change notification for one watched resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// Kind of the changed resource
    pub kind: ResourceKind,
    /// Identity of the changed resource
    pub name: NamespacedName,
}

/// Optional health monitor notified of registry membership changes
#[async_trait]
pub trait HealthMonitor: Send + Sync {
    /// Start monitoring a backend
    async fn add_backend(&self, backend: &Backend) -> Result<()>;

    /// Stop monitoring a backend
    async fn remove_backend(&self, id: &str) -> Result<()>;
}

/// Drives the dynamic registry from cluster resource state
pub struct BackendReconciler {
    client: Arc<dyn ClusterClient>,
    discoverer: Arc<dyn WorkloadDiscoverer>,
    registry: Arc<DynamicRegistry>,
    group_ref: String,
    auth_config: Option<OutgoingAuthConfig>,
    auth_resolver: Option<Arc<dyn AuthResolver>>,
    health: Option<Arc<dyn HealthMonitor>>,
}

impl BackendReconciler {
    /// Create a reconciler for one group
    #[must_use]
    pub fn new(
        client: Arc<dyn ClusterClient>,
        discoverer: Arc<dyn WorkloadDiscoverer>,
        registry: Arc<DynamicRegistry>,
        group_ref: impl Into<String>,
    ) -> Self {
        Self {
            client,
            discoverer,
            registry,
            group_ref: group_ref.into(),
            auth_config: None,
            auth_resolver: None,
            health: None,
        }
    }

    /// Apply an outgoing auth policy during materialization
    #[must_use]
    pub fn with_auth(
        mut self,
        auth_config: Option<OutgoingAuthConfig>,
        auth_resolver: Option<Arc<dyn AuthResolver>>,
    ) -> Self {
        self.auth_config = auth_config;
        self.auth_resolver = auth_resolver;
        self
    }

    /// Notify a health monitor of membership changes
    #[must_use]
    pub fn with_health_monitor(mut self, health: Arc<dyn HealthMonitor>) -> Self {
        self.health = Some(health);
        self
    }

    /// The registry this reconciler mutates
    #[must_use]
    pub fn registry(&self) -> &Arc<DynamicRegistry> {
        &self.registry
    }

    /// Reconcile one workload resource
    ///
    /// # Errors
    ///
    /// Returns the underlying error when the cluster fetch or the
    /// registry mutation fails; the event loop requeues on error.
    pub async fn reconcile(&self, name: &NamespacedName) -> Result<()> {
        // Fetch: try MCPServer first, then MCPRemoteProxy.
        let workload = match self.client.get_mcp_server(&name.name).await? {
            Some(found) => Some(found),
            None => self.client.get_mcp_remote_proxy(&name.name).await?,
        };

        let Some(workload) = workload else {
            // Both kinds gone: the workload was deleted.
            debug!(resource = %name, "Workload deleted");
            return self.remove_backend(&name.name).await;
        };

        // Filter: a group mismatch means the backend moved away from
        // this reconciler's group.
        if workload.group_ref.as_deref() != Some(self.group_ref.as_str()) {
            debug!(
                resource = %name,
                group = ?workload.group_ref,
                "Workload no longer in group, removing"
            );
            return self.remove_backend(&name.name).await;
        }

        // Materialize through the same path discovery uses.
        let typed = TypedWorkload {
            name: workload.name.clone(),
            kind: workload.kind,
        };
        let backend = match self.discoverer.get_workload_as_backend(&typed).await {
            Ok(backend) => backend,
            Err(e) => {
                // Requeue the original error; drop the stale entry
                // regardless of whether removal succeeds.
                let _ = self.registry.remove(&name.name);
                return Err(e);
            }
        };

        let Some(mut backend) = backend else {
            return self.remove_backend(&name.name).await;
        };

        if let Err(e) = apply_auth_config_to_backend(
            &mut backend,
            &workload.name,
            self.auth_config.as_ref(),
            self.auth_resolver.as_deref(),
        )
        .await
        {
            warn!(resource = %name, error = %e, "Backend auth unresolved, removing from registry");
            return self.remove_backend(&name.name).await;
        }

        backend.set_group(&self.group_ref);

        self.registry
            .upsert(backend.clone())
            .map_err(|e| Error::Registry(format!("upsert of '{}' failed: {e}", name.name)))?;
        debug!(resource = %name, version = self.registry.version(), "Backend upserted");

        if let Some(health) = &self.health {
            if let Err(e) = health.add_backend(&backend).await {
                warn!(backend = %backend.id, error = %e, "Health monitor add failed");
            }
        }

        Ok(())
    }

    async fn remove_backend(&self, id: &str) -> Result<()> {
        if let Err(e) = self.registry.remove(id) {
            warn!(backend = %id, error = %e, "Registry removal failed");
        }

        if let Some(health) = &self.health {
            if let Err(e) = health.remove_backend(id).await {
                warn!(backend = %id, error = %e, "Health monitor remove failed");
            }
        }

        Ok(())
    }

    /// Map a watch event to the reconcile requests it triggers
    ///
    /// Workload events enqueue the resource itself when its group
    /// matches, when it disappeared, or when the registry still holds
    /// it (group drift). An `MCPExternalAuthConfig` event enqueues
    /// every workload in the group whose auth ref names the changed
    /// config; credential rotation must not be missed.
    ///
    /// # Errors
    ///
    /// Propagates cluster API errors; the event loop requeues.
    pub async fn requests_for_event(&self, event: &WatchEvent) -> Result<Vec<NamespacedName>> {
        match event.kind {
            ResourceKind::McpServer | ResourceKind::McpRemoteProxy => {
                let workload = match event.kind {
                    ResourceKind::McpServer => {
                        self.client.get_mcp_server(&event.name.name).await?
                    }
                    _ => self.client.get_mcp_remote_proxy(&event.name.name).await?,
                };

                let relevant = match workload {
                    None => true,
                    Some(w) => {
                        w.group_ref.as_deref() == Some(self.group_ref.as_str())
                            || self.registry.get(&event.name.name).is_some()
                    }
                };

                Ok(if relevant { vec![event.name.clone()] } else { Vec::new() })
            }
            ResourceKind::McpExternalAuthConfig => {
                let workloads = self.client.list_workloads().await?;
                Ok(workloads
                    .into_iter()
                    .filter(|w| {
                        w.group_ref.as_deref() == Some(self.group_ref.as_str())
                            && w.external_auth_config_ref.as_deref() == Some(event.name.name.as_str())
                    })
                    .map(|w| NamespacedName::new(event.name.namespace.clone(), w.name))
                    .collect())
            }
        }
    }

    /// Reconcile every workload currently in the group (initial sync)
    async fn sync_all(&self, namespace: &str) -> Result<()> {
        let workloads = self.client.list_workloads().await?;
        for workload in workloads
            .iter()
            .filter(|w| w.group_ref.as_deref() == Some(self.group_ref.as_str()))
        {
            let name = NamespacedName::new(namespace, workload.name.clone());
            if let Err(e) = self.reconcile(&name).await {
                warn!(resource = %name, error = %e, "Initial reconcile failed");
            }
        }
        Ok(())
    }
}

/// Owns the reconciliation event loop for one group in one namespace
pub struct BackendWatcher {
    reconciler: Arc<BackendReconciler>,
    namespace: String,
    events: Mutex<Option<mpsc::Receiver<WatchEvent>>>,
    started: AtomicBool,
    ready_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
}

impl BackendWatcher {
    /// Create a watcher consuming the given event stream
    #[must_use]
    pub fn new(
        reconciler: Arc<BackendReconciler>,
        namespace: impl Into<String>,
        events: mpsc::Receiver<WatchEvent>,
    ) -> Self {
        let (ready_tx, ready_rx) = watch::channel(false);
        Self {
            reconciler,
            namespace: namespace.into(),
            events: Mutex::new(Some(events)),
            started: AtomicBool::new(false),
            ready_tx,
            ready_rx,
        }
    }

    /// Run the event loop until the token is cancelled
    ///
    /// Performs an initial sync of the group before consuming events;
    /// readiness flips once the sync completes.
    ///
    /// # Errors
    ///
    /// Returns an error on a second `start` call or when the initial
    /// sync cannot list the cluster.
    pub async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(Error::Internal("watcher already started".to_string()));
        }

        let mut events = self
            .events
            .lock()
            .take()
            .ok_or_else(|| Error::Internal("watcher event stream already consumed".to_string()))?;

        info!(group = %self.reconciler.group_ref, namespace = %self.namespace, "Backend watcher starting");

        self.reconciler.sync_all(&self.namespace).await?;
        let _ = self.ready_tx.send(true);

        let mut pending: VecDeque<(NamespacedName, u32)> = VecDeque::new();

        loop {
            while let Some((request, attempt)) = pending.pop_front() {
                if shutdown.is_cancelled() {
                    break;
                }
                if let Err(e) = self.reconciler.reconcile(&request).await {
                    if attempt + 1 < MAX_RECONCILE_ATTEMPTS {
                        warn!(resource = %request, attempt, error = %e, "Reconcile failed, requeueing");
                        tokio::time::sleep(Duration::from_millis(100 << attempt)).await;
                        pending.push_back((request, attempt + 1));
                    } else {
                        warn!(resource = %request, error = %e, "Reconcile failed permanently, dropping");
                    }
                }
            }

            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("Backend watcher stopping");
                    return Ok(());
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        info!("Watch event stream closed");
                        return Ok(());
                    };

                    match self.reconciler.requests_for_event(&event).await {
                        Ok(requests) => {
                            for request in requests {
                                pending.push_back((request, 0));
                            }
                        }
                        Err(e) => {
                            warn!(resource = %event.name, error = %e, "Event mapping failed, requeueing resource");
                            if matches!(event.kind, ResourceKind::McpServer | ResourceKind::McpRemoteProxy) {
                                pending.push_back((event.name, 0));
                            }
                        }
                    }
                }
            }
        }
    }

    /// Wait until the initial cache sync completed
    ///
    /// Returns `false` when the timeout elapses first; readiness probes
    /// wrap this with a short timeout and report not-ready on `false`.
    pub async fn wait_for_cache_sync(&self, timeout: Duration) -> bool {
        let mut ready = self.ready_rx.clone();
        tokio::time::timeout(timeout, async {
            while !*ready.borrow_and_update() {
                if ready.changed().await.is_err() {
                    return false;
                }
            }
            true
        })
        .await
        .unwrap_or(false)
    }
}
