//! Backend discovery
//!
//! Turns a group reference into a deterministic set of [`Backend`]
//! records. The platform supplies workloads through a
//! [`WorkloadDiscoverer`]; the orchestration here applies the outgoing
//! auth policy (fail-closed), stamps the group metadata and sorts the
//! result. A static variant materializes configured backends without
//! touching any platform.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::auth::{AuthResolver, apply_auth_config_to_backend};
use crate::backend::{Backend, HealthStatus};
use crate::config::{OutgoingAuthConfig, StaticBackendConfig};
use crate::{Error, Result};

pub mod cluster;
pub mod runtime;

pub use cluster::{ClusterClient, ClusterWorkload, ClusterWorkloadDiscoverer};
pub use runtime::{RuntimeWorkload, RuntimeWorkloadDiscoverer, WorkloadRuntime};

/// Kind of workload backing a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkloadKind {
    /// A directly managed MCP server
    #[serde(rename = "MCPServer")]
    McpServer,
    /// A proxy to a remote MCP server
    #[serde(rename = "MCPRemoteProxy")]
    McpRemoteProxy,
}

impl std::fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::McpServer => write!(f, "MCPServer"),
            Self::McpRemoteProxy => write!(f, "MCPRemoteProxy"),
        }
    }
}

/// A workload identifier paired with its kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedWorkload {
    /// Workload name
    pub name: String,
    /// Workload kind
    pub kind: WorkloadKind,
}

/// Lifecycle state a platform reports for a workload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadStatus {
    /// Workload is running
    Running,
    /// Workload is starting up
    #[default]
    Pending,
    /// Workload is stopped
    Stopped,
    /// Workload failed
    Failed,
    /// Workload is being torn down
    Terminating,
}

impl WorkloadStatus {
    /// Map platform status to backend health
    #[must_use]
    pub fn health(self) -> HealthStatus {
        match self {
            Self::Running => HealthStatus::Healthy,
            Self::Pending => HealthStatus::Unknown,
            Self::Stopped | Self::Failed | Self::Terminating => HealthStatus::Unhealthy,
        }
    }
}

/// Answers group existence queries
#[async_trait]
pub trait GroupsManager: Send + Sync {
    /// Whether the group exists
    async fn exists(&self, group_ref: &str) -> Result<bool>;
}

/// Platform abstraction listing workloads and materializing backends
#[async_trait]
pub trait WorkloadDiscoverer: Send + Sync {
    /// Workload identifiers belonging to the group
    async fn list_workloads_in_group(&self, group_ref: &str) -> Result<Vec<TypedWorkload>>;

    /// Materialize one workload into a backend record
    ///
    /// `Ok(None)` means the workload is known but not addressable
    /// (typically no URL) and must be skipped without error.
    async fn get_workload_as_backend(&self, workload: &TypedWorkload) -> Result<Option<Backend>>;
}

enum DiscoverySource {
    Platform {
        groups: Arc<dyn GroupsManager>,
        workloads: Arc<dyn WorkloadDiscoverer>,
    },
    Static {
        backends: Vec<StaticBackendConfig>,
    },
}

/// Orchestrates backend discovery for one group
pub struct BackendDiscoverer {
    source: DiscoverySource,
    auth_config: Option<OutgoingAuthConfig>,
    auth_resolver: Option<Arc<dyn AuthResolver>>,
}

impl BackendDiscoverer {
    /// Discoverer backed by a platform workload source
    #[must_use]
    pub fn new(
        groups: Arc<dyn GroupsManager>,
        workloads: Arc<dyn WorkloadDiscoverer>,
        auth_config: Option<OutgoingAuthConfig>,
        auth_resolver: Option<Arc<dyn AuthResolver>>,
    ) -> Self {
        Self {
            source: DiscoverySource::Platform { groups, workloads },
            auth_config,
            auth_resolver,
        }
    }

    /// Discoverer over a static backend list; never consults a groups
    /// manager or platform
    #[must_use]
    pub fn with_static_backends(
        backends: Vec<StaticBackendConfig>,
        auth_config: Option<OutgoingAuthConfig>,
        auth_resolver: Option<Arc<dyn AuthResolver>>,
    ) -> Self {
        Self {
            source: DiscoverySource::Static { backends },
            auth_config,
            auth_resolver,
        }
    }

    /// Discover the backends of `group_ref`
    ///
    /// Inaccessible workloads are skipped; a backend whose auth cannot
    /// be resolved is excluded (fail-closed). The result is sorted by
    /// name so downstream renderings never churn spuriously.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GroupNotFound`] for an unknown group, or the
    /// underlying error when the group/workload listing itself fails.
    pub async fn discover(&self, group_ref: &str) -> Result<Vec<Backend>> {
        let mut backends = match &self.source {
            DiscoverySource::Platform { groups, workloads } => {
                self.discover_platform(groups, workloads, group_ref).await?
            }
            DiscoverySource::Static { backends } => self.materialize_static(backends, group_ref).await,
        };

        backends.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(backends)
    }

    async fn discover_platform(
        &self,
        groups: &Arc<dyn GroupsManager>,
        workloads: &Arc<dyn WorkloadDiscoverer>,
        group_ref: &str,
    ) -> Result<Vec<Backend>> {
        let exists = groups
            .exists(group_ref)
            .await
            .map_err(|e| Error::Internal(format!("group lookup failed for '{group_ref}': {e}")))?;
        if !exists {
            return Err(Error::GroupNotFound(group_ref.to_string()));
        }

        let listed = workloads.list_workloads_in_group(group_ref).await?;
        if listed.is_empty() {
            debug!(group = %group_ref, "No workloads in group");
            return Ok(Vec::new());
        }

        let mut backends = Vec::with_capacity(listed.len());
        for workload in &listed {
            let backend = match workloads.get_workload_as_backend(workload).await {
                Ok(Some(backend)) => backend,
                Ok(None) => {
                    debug!(workload = %workload.name, "Workload not addressable, skipping");
                    continue;
                }
                Err(e) => {
                    warn!(workload = %workload.name, error = %e, "Failed to materialize workload, skipping");
                    continue;
                }
            };

            if let Some(backend) = self.finish_backend(backend, group_ref).await {
                backends.push(backend);
            }
        }

        Ok(backends)
    }

    async fn materialize_static(
        &self,
        configs: &[StaticBackendConfig],
        group_ref: &str,
    ) -> Vec<Backend> {
        let mut backends = Vec::with_capacity(configs.len());
        for config in configs {
            let backend = Backend {
                id: config.name.clone(),
                name: config.name.clone(),
                base_url: config.url.clone(),
                transport: config.transport,
                health: HealthStatus::Unknown,
                auth: config.auth.clone(),
                metadata: config.metadata.clone(),
            };

            if let Some(backend) = self.finish_backend(backend, group_ref).await {
                backends.push(backend);
            }
        }
        backends
    }

    /// Apply the auth policy (excluding the backend on failure) and
    /// stamp the group metadata
    async fn finish_backend(&self, mut backend: Backend, group_ref: &str) -> Option<Backend> {
        let name = backend.name.clone();
        if let Err(e) = apply_auth_config_to_backend(
            &mut backend,
            &name,
            self.auth_config.as_ref(),
            self.auth_resolver.as_deref(),
        )
        .await
        {
            warn!(backend = %name, error = %e, "Excluding backend with unresolved auth");
            return None;
        }

        backend.set_group(group_ref);
        Some(backend)
    }
}
