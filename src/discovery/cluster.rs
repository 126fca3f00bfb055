//! Cluster-mode workload discovery
//!
//! Backends come from two custom resource kinds, `MCPServer` and
//! `MCPRemoteProxy`, matched to a group by their group reference. The
//! cluster API mechanics (informers, caches, CRD schemas) are external;
//! [`ClusterClient`] is the narrow surface this module and the
//! reconciler consume.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{TypedWorkload, WorkloadDiscoverer, WorkloadKind, WorkloadStatus};
use crate::Result;
use crate::backend::{Backend, BackendAuthStrategy, TransportType};

/// A workload resource as read from the cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterWorkload {
    /// Resource name
    pub name: String,
    /// Resource kind
    pub kind: WorkloadKind,
    /// Group the resource belongs to, from its spec
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_ref: Option<String>,
    /// URL the workload serves MCP at, from its status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Transport token from the spec
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
    /// Lifecycle phase mapped from the resource status
    #[serde(default)]
    pub status: WorkloadStatus,
    /// Name of the `MCPExternalAuthConfig` the spec references, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_auth_config_ref: Option<String>,
    /// Resource labels, carried into backend metadata
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

/// Namespace-scoped read access to the workload resources
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch an `MCPServer` by name; `None` when not found
    async fn get_mcp_server(&self, name: &str) -> Result<Option<ClusterWorkload>>;

    /// Fetch an `MCPRemoteProxy` by name; `None` when not found
    async fn get_mcp_remote_proxy(&self, name: &str) -> Result<Option<ClusterWorkload>>;

    /// All workload resources in the namespace, both kinds
    async fn list_workloads(&self) -> Result<Vec<ClusterWorkload>>;
}

/// [`WorkloadDiscoverer`] over the cluster API
pub struct ClusterWorkloadDiscoverer {
    client: Arc<dyn ClusterClient>,
}

impl ClusterWorkloadDiscoverer {
    /// Create a discoverer over the given cluster client
    #[must_use]
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self { client }
    }
}

/// Materialize a cluster workload into a backend record
///
/// The resource's external auth config reference is carried as
/// discovered auth; the outgoing auth policy decides whether to use it.
pub(crate) fn workload_to_backend(workload: &ClusterWorkload) -> Option<Backend> {
    let Some(url) = workload.url.clone().filter(|u| !u.is_empty()) else {
        debug!(workload = %workload.name, "Workload has no URL in status");
        return None;
    };

    Some(Backend {
        id: workload.name.clone(),
        name: workload.name.clone(),
        base_url: url,
        transport: workload
            .transport
            .as_deref()
            .and_then(TransportType::parse)
            .unwrap_or_default(),
        health: workload.status.health(),
        auth: workload
            .external_auth_config_ref
            .clone()
            .map(|name| BackendAuthStrategy::ExternalAuthConfigRef { name }),
        metadata: workload.labels.clone(),
    })
}

#[async_trait]
impl WorkloadDiscoverer for ClusterWorkloadDiscoverer {
    async fn list_workloads_in_group(&self, group_ref: &str) -> Result<Vec<TypedWorkload>> {
        let workloads = self.client.list_workloads().await?;
        Ok(workloads
            .into_iter()
            .filter(|w| w.group_ref.as_deref() == Some(group_ref))
            .map(|w| TypedWorkload {
                name: w.name,
                kind: w.kind,
            })
            .collect())
    }

    async fn get_workload_as_backend(&self, workload: &TypedWorkload) -> Result<Option<Backend>> {
        let resource = match workload.kind {
            WorkloadKind::McpServer => self.client.get_mcp_server(&workload.name).await?,
            WorkloadKind::McpRemoteProxy => {
                self.client.get_mcp_remote_proxy(&workload.name).await?
            }
        };

        Ok(resource.as_ref().and_then(workload_to_backend))
    }
}
