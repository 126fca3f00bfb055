//! Capability aggregation pipeline
//!
//! Fans out capability queries to every backend with bounded
//! concurrency, resolves tool name conflicts, and merges the result
//! into a unified capability view plus a routing table. Per-backend
//! failures are isolated: a backend that cannot be queried simply drops
//! out of the view.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::{Backend, BackendRegistry, BackendTarget, ImmutableRegistry};
use crate::client::BackendClient;
use crate::config::{AggregationConfig, WorkloadToolConfig};
use crate::protocol::Tool;
use crate::{Error, Result};

pub mod cache;
pub mod conflict;
pub mod tools;
mod types;

pub use cache::CapabilityCache;
pub use conflict::{
    ConflictResolver, ManualResolver, PrefixResolver, PriorityResolver, resolver_from_config,
};
pub use tools::{process_backend_tools, should_advertise_tool};
pub use types::{
    AggregatedCapabilities, AggregationMetadata, BackendCapabilities, BackendTool,
    ResolvedCapabilities, ResolvedPrompt, ResolvedResource, ResolvedTool, RoutingTable,
};

/// Hard cap on simultaneous backend capability queries
pub const MAX_CONCURRENT_QUERIES: usize = 10;

const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Aggregates backend capabilities into one view
pub struct Aggregator {
    client: Arc<dyn BackendClient>,
    resolver: Arc<dyn ConflictResolver>,
    tool_configs: HashMap<String, WorkloadToolConfig>,
    exclude_all_tools: bool,
    query_timeout: Duration,
    shutdown: CancellationToken,
}

impl Aggregator {
    /// Create an aggregator over the given client and resolver
    #[must_use]
    pub fn new(
        client: Arc<dyn BackendClient>,
        resolver: Arc<dyn ConflictResolver>,
        config: Option<&AggregationConfig>,
    ) -> Self {
        Self {
            client,
            resolver,
            tool_configs: config.map(AggregationConfig::tool_config_map).unwrap_or_default(),
            exclude_all_tools: config.is_some_and(|c| c.exclude_all_tools),
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            shutdown: CancellationToken::new(),
        }
    }

    /// Override the per-backend query timeout
    #[must_use]
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Tie outstanding queries to a shutdown token; cancelling it
    /// aborts in-flight queries as per-backend failures
    #[must_use]
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Query one backend's capabilities and process its tools
    ///
    /// # Errors
    ///
    /// Returns [`Error::BackendQuery`] when the query fails or times
    /// out.
    #[tracing::instrument(skip(self, backend), fields(backend = %backend.id))]
    pub async fn query_capabilities(&self, backend: &Backend) -> Result<BackendCapabilities> {
        query_backend(
            Arc::clone(&self.client),
            backend.clone(),
            self.tool_configs.get(&backend.id).cloned(),
            self.query_timeout,
        )
        .await
    }

    /// Query all backends with bounded concurrency
    ///
    /// Failures are isolated per backend; a failing backend is absent
    /// from the result map.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoBackendsFound`] for an empty input and
    /// [`Error::NoBackendsReturnedCapabilities`] when every backend
    /// failed.
    #[tracing::instrument(skip_all, fields(backends = backends.len()))]
    pub async fn query_all_capabilities(
        &self,
        backends: &[Backend],
    ) -> Result<HashMap<String, BackendCapabilities>> {
        if backends.is_empty() {
            return Err(Error::NoBackendsFound);
        }

        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_QUERIES));
        let results = Arc::new(Mutex::new(HashMap::new()));
        let cancel = self.shutdown.child_token();
        let mut join_set = JoinSet::new();

        for backend in backends {
            let client = Arc::clone(&self.client);
            let backend = backend.clone();
            let config = self.tool_configs.get(&backend.id).cloned();
            let timeout = self.query_timeout;
            let semaphore = Arc::clone(&semaphore);
            let results = Arc::clone(&results);
            let cancel = cancel.clone();

            join_set.spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return;
                };

                let outcome = tokio::select! {
                    () = cancel.cancelled() => Err(Error::BackendQuery {
                        backend: backend.id.clone(),
                        message: "query cancelled".to_string(),
                    }),
                    outcome = query_backend(client, backend.clone(), config, timeout) => outcome,
                };

                match outcome {
                    Ok(capabilities) => {
                        results.lock().await.insert(backend.id.clone(), capabilities);
                    }
                    Err(e) => {
                        warn!(backend = %backend.id, error = %e, "Backend capability query failed");
                    }
                }
            });
        }

        while join_set.join_next().await.is_some() {}

        let results = Arc::try_unwrap(results)
            .map_err(|_| Error::Internal("query tasks still hold results".to_string()))?
            .into_inner();

        if results.is_empty() {
            return Err(Error::NoBackendsReturnedCapabilities);
        }

        debug!(
            queried = backends.len(),
            answered = results.len(),
            "Collected backend capabilities"
        );
        Ok(results)
    }

    /// Resolve tool name conflicts across the queried backends
    ///
    /// Resources and prompts pass through unchanged (URIs are
    /// effectively namespaced); the supports-flags are OR-combined.
    ///
    /// # Errors
    ///
    /// Propagates the configured resolver's errors.
    #[tracing::instrument(skip_all)]
    pub fn resolve_conflicts(
        &self,
        capabilities: &HashMap<String, BackendCapabilities>,
    ) -> Result<ResolvedCapabilities> {
        let tools_by_backend: HashMap<String, Vec<BackendTool>> = capabilities
            .iter()
            .map(|(id, caps)| (id.clone(), caps.tools.clone()))
            .collect();

        let tools = self.resolver.resolve(&tools_by_backend)?;

        let mut backend_ids: Vec<&String> = capabilities.keys().collect();
        backend_ids.sort();

        let mut resources = Vec::new();
        let mut prompts = Vec::new();
        let mut supports_logging = false;
        let mut supports_sampling = false;
        for backend_id in backend_ids {
            let caps = &capabilities[backend_id];
            resources.extend(caps.resources.iter().map(|r| ResolvedResource {
                resource: r.clone(),
                backend_id: backend_id.clone(),
            }));
            prompts.extend(caps.prompts.iter().map(|p| ResolvedPrompt {
                prompt: p.clone(),
                backend_id: backend_id.clone(),
            }));
            supports_logging |= caps.supports_logging;
            supports_sampling |= caps.supports_sampling;
        }

        Ok(ResolvedCapabilities {
            tools,
            resources,
            prompts,
            supports_logging,
            supports_sampling,
        })
    }

    /// Build the advertised view and routing table
    ///
    /// Every resolved entry is routable; advertising filters only trim
    /// the advertised lists. Targets are value copies of the registry's
    /// backends; a backend missing from the registry yields a minimal
    /// target and a warning.
    #[tracing::instrument(skip_all)]
    pub fn merge_capabilities(
        &self,
        resolved: &ResolvedCapabilities,
        registry: &dyn BackendRegistry,
    ) -> AggregatedCapabilities {
        let mut routing = RoutingTable::default();
        let mut advertised_tools = Vec::new();

        let mut resolved_names: Vec<&String> = resolved.tools.keys().collect();
        resolved_names.sort();

        for name in resolved_names {
            let tool = &resolved.tools[name];
            let target = self.target_for(registry, &tool.backend_id, &tool.original_name);
            routing.tools.insert(tool.resolved_name.clone(), target);

            let advertise = should_advertise_tool(
                self.exclude_all_tools,
                self.tool_configs.get(&tool.backend_id),
                &tool.original_name,
            );
            if advertise {
                advertised_tools.push(Tool {
                    name: tool.resolved_name.clone(),
                    description: tool.description.clone(),
                    input_schema: tool.input_schema.clone(),
                    backend_id: tool.backend_id.clone(),
                });
            }
        }

        let mut advertised_resources = Vec::new();
        for entry in &resolved.resources {
            let uri = entry.resource.uri.clone();
            routing
                .resources
                .entry(uri.clone())
                .or_insert_with(|| self.target_for(registry, &entry.backend_id, &uri));
            advertised_resources.push(entry.resource.clone());
        }

        let mut advertised_prompts = Vec::new();
        for entry in &resolved.prompts {
            let name = entry.prompt.name.clone();
            routing
                .prompts
                .entry(name.clone())
                .or_insert_with(|| self.target_for(registry, &entry.backend_id, &name));
            advertised_prompts.push(entry.prompt.clone());
        }

        let metadata = AggregationMetadata {
            backend_count: registry.count(),
            tool_count: advertised_tools.len(),
            resource_count: advertised_resources.len(),
            prompt_count: advertised_prompts.len(),
            conflict_strategy: self.resolver.strategy(),
            aggregated_at: chrono::Utc::now(),
        };

        AggregatedCapabilities {
            tools: advertised_tools,
            resources: advertised_resources,
            prompts: advertised_prompts,
            routing,
            supports_logging: resolved.supports_logging,
            supports_sampling: resolved.supports_sampling,
            metadata,
        }
    }

    fn target_for(
        &self,
        registry: &dyn BackendRegistry,
        backend_id: &str,
        original_name: &str,
    ) -> BackendTarget {
        match registry.get(backend_id) {
            Some(backend) => BackendTarget::from_backend(&backend, original_name),
            None => {
                warn!(backend = %backend_id, "Backend missing from registry, emitting minimal target");
                BackendTarget::minimal(backend_id, original_name)
            }
        }
    }

    /// Convenience pipeline: registry, query, resolve, merge
    ///
    /// # Errors
    ///
    /// Propagates the pipeline stage errors.
    #[tracing::instrument(skip_all, fields(backends = backends.len()))]
    pub async fn aggregate_capabilities(
        &self,
        backends: &[Backend],
    ) -> Result<AggregatedCapabilities> {
        let registry = ImmutableRegistry::new(backends.to_vec());
        let capabilities = self.query_all_capabilities(backends).await?;
        let resolved = self.resolve_conflicts(&capabilities)?;
        Ok(self.merge_capabilities(&resolved, &registry))
    }
}

/// Query one backend and process its tools; shared between the single
/// and fan-out paths
async fn query_backend(
    client: Arc<dyn BackendClient>,
    backend: Backend,
    config: Option<WorkloadToolConfig>,
    timeout: Duration,
) -> Result<BackendCapabilities> {
    let target = BackendTarget::from_backend(&backend, String::new());

    let list = tokio::time::timeout(timeout, client.list_capabilities(&target))
        .await
        .map_err(|_| Error::BackendQuery {
            backend: backend.id.clone(),
            message: format!("query timed out after {}s", timeout.as_secs()),
        })?
        .map_err(|e| Error::BackendQuery {
            backend: backend.id.clone(),
            message: e.to_string(),
        })?;

    let tools = process_backend_tools(&backend.id, list.tools, config.as_ref());

    Ok(BackendCapabilities {
        backend_id: backend.id.clone(),
        tools,
        resources: list.resources,
        prompts: list.prompts,
        supports_logging: list.supports_logging,
        supports_sampling: list.supports_sampling,
    })
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::backend::{HealthStatus, TransportType};
    use crate::protocol::CapabilityList;

    struct MockClient {
        responses: HashMap<String, CapabilityList>,
        fail: Vec<String>,
    }

    #[async_trait]
    impl BackendClient for MockClient {
        async fn list_capabilities(&self, target: &BackendTarget) -> Result<CapabilityList> {
            if self.fail.contains(&target.workload_id) {
                return Err(Error::Transport("connection refused".to_string()));
            }
            Ok(self
                .responses
                .get(&target.workload_id)
                .cloned()
                .unwrap_or_default())
        }
    }

    fn backend(id: &str) -> Backend {
        Backend {
            id: id.to_string(),
            name: id.to_string(),
            base_url: format!("http://{id}:8080/mcp"),
            transport: TransportType::StreamableHttp,
            health: HealthStatus::Healthy,
            auth: None,
            metadata: HashMap::new(),
        }
    }

    fn tool(name: &str) -> Tool {
        Tool {
            name: name.to_string(),
            description: None,
            input_schema: json!({"type": "object"}),
            backend_id: String::new(),
        }
    }

    fn caps(tools: &[&str]) -> CapabilityList {
        CapabilityList {
            tools: tools.iter().map(|n| tool(n)).collect(),
            ..Default::default()
        }
    }

    fn aggregator(client: MockClient) -> Aggregator {
        Aggregator::new(
            Arc::new(client),
            Arc::new(PrefixResolver::new("{workload}_")),
            None,
        )
    }

    #[tokio::test]
    async fn empty_input_is_no_backends_found() {
        let agg = aggregator(MockClient {
            responses: HashMap::new(),
            fail: vec![],
        });
        let err = agg.query_all_capabilities(&[]).await.unwrap_err();
        assert!(matches!(err, Error::NoBackendsFound));
    }

    #[tokio::test]
    async fn failing_backend_is_isolated() {
        let agg = aggregator(MockClient {
            responses: HashMap::from([("up".to_string(), caps(&["ping"]))]),
            fail: vec!["down".to_string()],
        });

        let results = agg
            .query_all_capabilities(&[backend("up"), backend("down")])
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(results.contains_key("up"));
    }

    #[tokio::test]
    async fn all_backends_failing_is_an_error() {
        let agg = aggregator(MockClient {
            responses: HashMap::new(),
            fail: vec!["a".to_string(), "b".to_string()],
        });

        let err = agg
            .query_all_capabilities(&[backend("a"), backend("b")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoBackendsReturnedCapabilities));
    }

    #[tokio::test]
    async fn cancelled_queries_count_as_failures() {
        let token = CancellationToken::new();
        token.cancel();

        let agg = aggregator(MockClient {
            responses: HashMap::from([("a".to_string(), caps(&["ping"]))]),
            fail: vec![],
        })
        .with_shutdown_token(token);

        // Cancellation races the mock's immediate answer; accept either
        // a cancelled-empty error or a served response, never a panic.
        match agg.query_all_capabilities(&[backend("a")]).await {
            Ok(results) => assert!(results.contains_key("a")),
            Err(e) => assert!(matches!(e, Error::NoBackendsReturnedCapabilities)),
        }
    }

    #[tokio::test]
    async fn aggregate_builds_routing_for_every_resolved_tool() {
        let agg = aggregator(MockClient {
            responses: HashMap::from([
                ("github".to_string(), caps(&["create_issue", "list_issues"])),
                ("jira".to_string(), caps(&["create_issue"])),
            ]),
            fail: vec![],
        });

        let view = agg
            .aggregate_capabilities(&[backend("github"), backend("jira")])
            .await
            .unwrap();

        // Every advertised tool routes; originals survive the rename.
        for tool in &view.tools {
            let target = view.routing.tools.get(&tool.name).expect("routable");
            assert!(tool.name.ends_with(&target.original_capability_name));
        }
        assert_eq!(view.routing.tools.len(), 3);
        assert_eq!(view.metadata.backend_count, 2);
        assert_eq!(view.metadata.conflict_strategy, crate::config::ConflictStrategy::Prefix);
    }

    #[tokio::test]
    async fn aggregation_is_deterministic_across_runs() {
        let make = || {
            aggregator(MockClient {
                responses: HashMap::from([
                    ("github".to_string(), caps(&["create_issue"])),
                    ("jira".to_string(), caps(&["create_issue"])),
                ]),
                fail: vec![],
            })
        };

        let first = make()
            .aggregate_capabilities(&[backend("github"), backend("jira")])
            .await
            .unwrap();
        let second = make()
            .aggregate_capabilities(&[backend("github"), backend("jira")])
            .await
            .unwrap();

        let names = |view: &AggregatedCapabilities| {
            let mut names: Vec<String> = view.tools.iter().map(|t| t.name.clone()).collect();
            names.sort();
            names
        };
        assert_eq!(names(&first), names(&second));
        assert_eq!(first.metadata.tool_count, second.metadata.tool_count);
    }
}
