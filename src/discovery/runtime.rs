//! CLI-mode workload discovery over a local container runtime
//!
//! The runtime itself is an external collaborator; this module only
//! maps its workload records onto backend records. Transport selection
//! follows the workload's proxy mode first, then its transport type.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{TypedWorkload, WorkloadDiscoverer, WorkloadKind, WorkloadStatus};
use crate::Result;
use crate::backend::{Backend, BackendAuthStrategy, TransportType};

/// Snapshot of a workload as reported by the container runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeWorkload {
    /// Workload name
    pub name: String,
    /// Workload kind
    pub kind: WorkloadKind,
    /// URL the workload is reachable at, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Proxy mode token; takes precedence for transport selection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_mode: Option<String>,
    /// Transport type token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_type: Option<String>,
    /// Lifecycle status
    #[serde(default)]
    pub status: WorkloadStatus,
    /// Runtime labels, carried into backend metadata
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
    /// Auth from the workload's own spec (discovered auth)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<BackendAuthStrategy>,
}

impl RuntimeWorkload {
    fn transport(&self) -> TransportType {
        self.proxy_mode
            .as_deref()
            .and_then(TransportType::parse)
            .or_else(|| self.transport_type.as_deref().and_then(TransportType::parse))
            .unwrap_or_default()
    }
}

/// Container runtime surface needed for discovery
#[async_trait]
pub trait WorkloadRuntime: Send + Sync {
    /// Workloads labelled into the group
    async fn list_group_workloads(&self, group_ref: &str) -> Result<Vec<RuntimeWorkload>>;

    /// Current state of one workload; `None` when it no longer exists
    async fn inspect(&self, name: &str) -> Result<Option<RuntimeWorkload>>;
}

/// [`WorkloadDiscoverer`] over a local container runtime
pub struct RuntimeWorkloadDiscoverer {
    runtime: Arc<dyn WorkloadRuntime>,
}

impl RuntimeWorkloadDiscoverer {
    /// Create a discoverer over the given runtime
    #[must_use]
    pub fn new(runtime: Arc<dyn WorkloadRuntime>) -> Self {
        Self { runtime }
    }
}

fn workload_to_backend(workload: RuntimeWorkload) -> Option<Backend> {
    let Some(url) = workload.url.clone().filter(|u| !u.is_empty()) else {
        debug!(workload = %workload.name, "Workload has no URL");
        return None;
    };

    Some(Backend {
        id: workload.name.clone(),
        name: workload.name.clone(),
        base_url: url,
        transport: workload.transport(),
        health: workload.status.health(),
        auth: workload.auth,
        metadata: workload.labels,
    })
}

#[async_trait]
impl WorkloadDiscoverer for RuntimeWorkloadDiscoverer {
    async fn list_workloads_in_group(&self, group_ref: &str) -> Result<Vec<TypedWorkload>> {
        let workloads = self.runtime.list_group_workloads(group_ref).await?;
        Ok(workloads
            .into_iter()
            .map(|w| TypedWorkload {
                name: w.name,
                kind: w.kind,
            })
            .collect())
    }

    async fn get_workload_as_backend(&self, workload: &TypedWorkload) -> Result<Option<Backend>> {
        let Some(record) = self.runtime.inspect(&workload.name).await? else {
            return Ok(None);
        };
        Ok(workload_to_backend(record))
    }
}
