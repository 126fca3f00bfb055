//! End-to-end aggregation pipeline tests

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;

use vmcp::aggregator::{Aggregator, PrefixResolver, resolver_from_config};
use vmcp::backend::{Backend, BackendTarget, HealthStatus, TransportType};
use vmcp::client::BackendClient;
use vmcp::config::{
    AggregationConfig, ConflictResolutionSettings, ConflictStrategy, ToolOverride,
    WorkloadToolConfig,
};
use vmcp::protocol::{CapabilityList, Tool};
use vmcp::{Error, Result};

struct MockClient {
    responses: HashMap<String, CapabilityList>,
}

impl MockClient {
    fn new(responses: &[(&str, &[&str])]) -> Arc<Self> {
        Arc::new(Self {
            responses: responses
                .iter()
                .map(|(backend, tools)| {
                    (
                        (*backend).to_string(),
                        CapabilityList {
                            tools: tools.iter().map(|name| tool(name)).collect(),
                            ..Default::default()
                        },
                    )
                })
                .collect(),
        })
    }
}

#[async_trait]
impl BackendClient for MockClient {
    async fn list_capabilities(&self, target: &BackendTarget) -> Result<CapabilityList> {
        self.responses
            .get(&target.workload_id)
            .cloned()
            .ok_or_else(|| Error::Transport(format!("unknown backend {}", target.workload_id)))
    }
}

fn tool(name: &str) -> Tool {
    Tool {
        name: name.to_string(),
        description: Some(format!("{name} tool")),
        input_schema: json!({"type": "object", "properties": {}}),
        backend_id: String::new(),
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

#[tokio::test]
async fn prefix_strategy_renames_collisions_and_everything_else() {
    let client = MockClient::new(&[
        ("github", &["create_issue", "list_issues"]),
        ("jira", &["create_issue", "list_projects"]),
    ]);
    let aggregator = Aggregator::new(client, Arc::new(PrefixResolver::new("{workload}_")), None);

    let view = aggregator
        .aggregate_capabilities(&[backend("github"), backend("jira")])
        .await
        .unwrap();

    let mut names: Vec<&str> = view.tools.iter().map(|t| t.name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(
        names,
        vec![
            "github_create_issue",
            "github_list_issues",
            "jira_create_issue",
            "jira_list_projects"
        ]
    );
}

#[tokio::test]
async fn priority_strategy_keeps_the_highest_priority_backend() {
    let config = AggregationConfig {
        conflict_resolution: ConflictStrategy::Priority,
        conflict_resolution_config: ConflictResolutionSettings {
            priority_order: vec!["github".to_string(), "jira".to_string()],
            ..Default::default()
        },
        ..Default::default()
    };
    let resolver = resolver_from_config(Some(&config)).unwrap();
    let client = MockClient::new(&[("github", &["create_issue"]), ("jira", &["create_issue"])]);
    let aggregator = Aggregator::new(client, resolver, Some(&config));

    let view = aggregator
        .aggregate_capabilities(&[backend("github"), backend("jira")])
        .await
        .unwrap();

    assert_eq!(view.tools.len(), 1);
    assert_eq!(view.tools[0].name, "create_issue");
    assert_eq!(view.tools[0].backend_id, "github");
    assert_eq!(view.metadata.conflict_strategy, ConflictStrategy::Priority);
}

#[tokio::test]
async fn priority_strategy_prefixes_unlisted_collisions() {
    let config = AggregationConfig {
        conflict_resolution: ConflictStrategy::Priority,
        conflict_resolution_config: ConflictResolutionSettings {
            priority_order: vec!["github".to_string()],
            ..Default::default()
        },
        ..Default::default()
    };
    let resolver = resolver_from_config(Some(&config)).unwrap();
    let client = MockClient::new(&[
        ("github", &["create_issue"]),
        ("slack", &["send_message"]),
        ("teams", &["send_message"]),
    ]);
    let aggregator = Aggregator::new(client, resolver, Some(&config));

    let view = aggregator
        .aggregate_capabilities(&[backend("github"), backend("slack"), backend("teams")])
        .await
        .unwrap();

    let mut names: Vec<&str> = view.tools.iter().map(|t| t.name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(
        names,
        vec!["create_issue", "slack_send_message", "teams_send_message"]
    );

    let create = view.routing.tools.get("create_issue").unwrap();
    assert_eq!(create.workload_id, "github");
    let slack = view.routing.tools.get("slack_send_message").unwrap();
    assert_eq!(slack.original_capability_name, "send_message");
}

#[tokio::test]
async fn manual_strategy_surfaces_unresolved_conflicts() {
    let config = AggregationConfig {
        conflict_resolution: ConflictStrategy::Manual,
        tools: vec![WorkloadToolConfig {
            workload: "github".to_string(),
            overrides: HashMap::from([(
                "create_issue".to_string(),
                ToolOverride {
                    name: Some("gh_create_issue".to_string()),
                    description: None,
                },
            )]),
            ..Default::default()
        }],
        ..Default::default()
    };
    let resolver = resolver_from_config(Some(&config)).unwrap();
    let client = MockClient::new(&[("github", &["create_issue"]), ("jira", &["create_issue"])]);
    let aggregator = Aggregator::new(client, resolver, Some(&config));

    let err = aggregator
        .aggregate_capabilities(&[backend("github"), backend("jira")])
        .await
        .unwrap_err();

    match err {
        Error::UnresolvedConflicts(conflicts) => {
            assert_eq!(conflicts.len(), 1);
            assert_eq!(conflicts[0].tool_name, "create_issue");
            assert!(conflicts[0].backend_ids.contains(&"github".to_string()));
            assert!(conflicts[0].backend_ids.contains(&"jira".to_string()));
        }
        other => panic!("expected UnresolvedConflicts, got {other}"),
    }
}

#[tokio::test]
async fn excluded_tools_stay_routable() {
    let config = AggregationConfig {
        exclude_all_tools: true,
        ..Default::default()
    };
    let resolver = resolver_from_config(Some(&config)).unwrap();
    let client = MockClient::new(&[("github", &["create_issue"]), ("jira", &["list_projects"])]);
    let aggregator = Aggregator::new(client, resolver, Some(&config));

    let view = aggregator
        .aggregate_capabilities(&[backend("github"), backend("jira")])
        .await
        .unwrap();

    // Nothing advertised, everything still addressable.
    assert!(view.tools.is_empty());
    assert_eq!(view.routing.tools.len(), 2);
    assert_eq!(
        view.routing.tools["github_create_issue"].original_capability_name,
        "create_issue"
    );
    assert_eq!(
        view.routing.tools["jira_list_projects"].original_capability_name,
        "list_projects"
    );
    assert_eq!(view.metadata.tool_count, 0);
}

#[tokio::test]
async fn per_backend_filter_trims_advertising_only() {
    let config = AggregationConfig {
        tools: vec![WorkloadToolConfig {
            workload: "github".to_string(),
            filter: vec!["create_issue".to_string()],
            ..Default::default()
        }],
        ..Default::default()
    };
    let resolver = resolver_from_config(Some(&config)).unwrap();
    let client = MockClient::new(&[("github", &["create_issue", "delete_repo"])]);
    let aggregator = Aggregator::new(client, resolver, Some(&config));

    let view = aggregator
        .aggregate_capabilities(&[backend("github")])
        .await
        .unwrap();

    let advertised: Vec<&str> = view.tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(advertised, vec!["github_create_issue"]);
    // The filtered tool remains in the routing table for composite use.
    assert!(view.routing.tools.contains_key("github_delete_repo"));
}

#[tokio::test]
async fn every_advertised_tool_is_routable() {
    let client = MockClient::new(&[
        ("github", &["create_issue", "list_issues"]),
        ("jira", &["create_issue"]),
    ]);
    let aggregator = Aggregator::new(client, Arc::new(PrefixResolver::new("{workload}_")), None);

    let view = aggregator
        .aggregate_capabilities(&[backend("github"), backend("jira")])
        .await
        .unwrap();

    for tool in &view.tools {
        let target = view
            .routing
            .tools
            .get(&tool.name)
            .unwrap_or_else(|| panic!("{} not routable", tool.name));
        assert_eq!(target.workload_id, tool.backend_id);
        assert!(!target.base_url.is_empty());
    }
}

#[tokio::test]
async fn overrides_route_back_to_the_backend_name() {
    let config = AggregationConfig {
        tools: vec![WorkloadToolConfig {
            workload: "github".to_string(),
            overrides: HashMap::from([(
                "create_issue".to_string(),
                ToolOverride {
                    name: Some("open_ticket".to_string()),
                    description: Some("Open a ticket".to_string()),
                },
            )]),
            ..Default::default()
        }],
        ..Default::default()
    };
    let resolver = resolver_from_config(Some(&config)).unwrap();
    let client = MockClient::new(&[("github", &["create_issue"])]);
    let aggregator = Aggregator::new(client, resolver, Some(&config));

    let view = aggregator
        .aggregate_capabilities(&[backend("github")])
        .await
        .unwrap();

    // Prefix applies on top of the override; the routing table still
    // carries the backend's own name for dispatch.
    let target = view.routing.tools.get("github_open_ticket").unwrap();
    assert_eq!(target.original_capability_name, "create_issue");
    assert_eq!(view.tools[0].description.as_deref(), Some("Open a ticket"));
}
