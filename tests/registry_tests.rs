//! Dynamic registry behavior tests

use std::collections::HashMap;

use vmcp::backend::{
    Backend, BackendRegistry, DynamicRegistry, HealthStatus, ImmutableRegistry, TransportType,
};

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

#[test]
fn mutations_drive_a_strictly_monotonic_version() {
    let registry = DynamicRegistry::with_backends(vec![backend("a")]);
    let v0 = registry.version();

    registry.upsert(backend("b")).unwrap();
    let v1 = registry.version();
    assert!(v1 > v0);
    assert_eq!(registry.count(), 2);

    registry.remove("a").unwrap();
    let v2 = registry.version();
    assert!(v2 > v1);
    assert!(registry.get("a").is_none());

    // Removing again is a no-op; consumers only rely on monotonicity
    // after successful mutations.
    registry.remove("a").unwrap();
    assert_eq!(registry.version(), v2);
}

#[test]
fn upsert_replaces_whole_records() {
    let registry = DynamicRegistry::new();
    registry.upsert(backend("a")).unwrap();

    let mut changed = backend("a");
    changed.base_url = "http://moved:9000/mcp".to_string();
    changed.health = HealthStatus::Degraded;
    registry.upsert(changed).unwrap();

    let stored = registry.get("a").unwrap();
    assert_eq!(stored.base_url, "http://moved:9000/mcp");
    assert_eq!(stored.health, HealthStatus::Degraded);
    assert_eq!(registry.count(), 1);
}

#[test]
fn version_signals_cache_invalidation() {
    use std::sync::Arc;

    use vmcp::aggregator::{
        AggregatedCapabilities, AggregationMetadata, CapabilityCache, RoutingTable,
    };
    use vmcp::config::ConflictStrategy;

    let registry = DynamicRegistry::with_backends(vec![backend("a")]);
    let cache = CapabilityCache::new();

    let view = Arc::new(AggregatedCapabilities {
        tools: vec![],
        resources: vec![],
        prompts: vec![],
        routing: RoutingTable::default(),
        supports_logging: false,
        supports_sampling: false,
        metadata: AggregationMetadata {
            backend_count: 1,
            tool_count: 0,
            resource_count: 0,
            prompt_count: 0,
            conflict_strategy: ConflictStrategy::Prefix,
            aggregated_at: chrono::Utc::now(),
        },
    });

    cache.insert("dev", registry.version(), Arc::clone(&view));
    assert!(cache.get("dev", registry.version()).is_some());

    // One mutation is one atomic invalidation signal.
    registry.upsert(backend("b")).unwrap();
    assert!(cache.get("dev", registry.version()).is_none());
}

#[test]
fn immutable_registry_is_a_stable_snapshot() {
    let backends = vec![backend("b"), backend("a")];
    let registry = ImmutableRegistry::new(backends);

    assert_eq!(registry.count(), 2);
    let names: Vec<String> = registry.list().into_iter().map(|b| b.name).collect();
    assert_eq!(names, vec!["a", "b"]);
}
