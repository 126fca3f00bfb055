//! Tool name conflict resolution
//!
//! Three strategies over the tools collected from all backends: prefix
//! every name, pick by backend priority, or apply explicit overrides.
//! Resolved names are globally unique in the output map by
//! construction; strategies log and skip (or fail, for manual) rather
//! than silently overwrite.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, warn};

use super::types::{BackendTool, ResolvedTool};
use crate::config::{
    AggregationConfig, ConflictStrategy, DEFAULT_PREFIX_FORMAT, ToolOverride, WorkloadToolConfig,
};
use crate::error::UnresolvedConflict;
use crate::{Error, Result};

/// Strategy-polymorphic conflict resolver
pub trait ConflictResolver: Send + Sync {
    /// The configured strategy; recorded in aggregation metadata
    fn strategy(&self) -> ConflictStrategy;

    /// Resolve tool name conflicts across backends
    ///
    /// # Errors
    ///
    /// The manual strategy fails with [`Error::UnresolvedConflicts`]
    /// when overrides are missing and [`Error::OverrideCollision`] when
    /// overrides collapse to the same name. The other strategies do not
    /// fail.
    fn resolve(
        &self,
        tools_by_backend: &HashMap<String, Vec<BackendTool>>,
    ) -> Result<HashMap<String, ResolvedTool>>;
}

impl std::fmt::Debug for dyn ConflictResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictResolver")
            .field("strategy", &self.strategy())
            .finish()
    }
}

/// Build the resolver named by the aggregation config
///
/// A missing config selects the prefix strategy with the default
/// format.
///
/// # Errors
///
/// Returns [`Error::InvalidConflictStrategy`] for a priority strategy
/// without a priority order. Missing manual overrides are only
/// detectable at resolution time.
pub fn resolver_from_config(config: Option<&AggregationConfig>) -> Result<Arc<dyn ConflictResolver>> {
    let Some(config) = config else {
        return Ok(Arc::new(PrefixResolver::new(DEFAULT_PREFIX_FORMAT)));
    };

    match config.conflict_resolution {
        ConflictStrategy::Prefix => {
            let format = &config.conflict_resolution_config.prefix_format;
            let format = if format.is_empty() {
                DEFAULT_PREFIX_FORMAT
            } else {
                format.as_str()
            };
            Ok(Arc::new(PrefixResolver::new(format)))
        }
        ConflictStrategy::Priority => {
            let order = &config.conflict_resolution_config.priority_order;
            if order.is_empty() {
                return Err(Error::InvalidConflictStrategy(
                    "priority strategy requires a non-empty priority_order".to_string(),
                ));
            }
            Ok(Arc::new(PriorityResolver::new(order.clone())))
        }
        ConflictStrategy::Manual => Ok(Arc::new(ManualResolver::new(&config.tools))),
    }
}

fn resolved_tool(
    entry: &BackendTool,
    backend_id: &str,
    resolved_name: String,
    applied: ConflictStrategy,
) -> ResolvedTool {
    ResolvedTool {
        resolved_name,
        original_name: entry.original_name.clone(),
        description: entry.tool.description.clone(),
        input_schema: entry.tool.input_schema.clone(),
        backend_id: backend_id.to_string(),
        conflict_resolution_applied: applied,
    }
}

/// Group every backend's tools by their current name, preserving a
/// deterministic backend order
fn group_by_name<'a>(
    tools_by_backend: &'a HashMap<String, Vec<BackendTool>>,
) -> BTreeMap<String, Vec<(&'a str, &'a BackendTool)>> {
    let mut backends: Vec<&String> = tools_by_backend.keys().collect();
    backends.sort();

    let mut grouped: BTreeMap<String, Vec<(&str, &BackendTool)>> = BTreeMap::new();
    for backend_id in backends {
        for entry in &tools_by_backend[backend_id] {
            grouped
                .entry(entry.tool.name.clone())
                .or_default()
                .push((backend_id, entry));
        }
    }
    grouped
}

/// Prefixes every tool name with a backend-derived prefix
pub struct PrefixResolver {
    format: String,
}

impl PrefixResolver {
    /// Create a resolver with the given prefix format; `{workload}` is
    /// substituted with the backend ID
    #[must_use]
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
        }
    }

    fn prefix_for(&self, backend_id: &str) -> String {
        self.format.replace("{workload}", backend_id)
    }
}

impl ConflictResolver for PrefixResolver {
    fn strategy(&self) -> ConflictStrategy {
        ConflictStrategy::Prefix
    }

    fn resolve(
        &self,
        tools_by_backend: &HashMap<String, Vec<BackendTool>>,
    ) -> Result<HashMap<String, ResolvedTool>> {
        let mut backends: Vec<&String> = tools_by_backend.keys().collect();
        backends.sort();

        let mut resolved: HashMap<String, ResolvedTool> = HashMap::new();
        for backend_id in backends {
            let prefix = self.prefix_for(backend_id);
            for entry in &tools_by_backend[backend_id] {
                let resolved_name = format!("{prefix}{}", entry.tool.name);
                if resolved.contains_key(&resolved_name) {
                    warn!(
                        backend = %backend_id,
                        name = %resolved_name,
                        "Prefixed name still collides, skipping tool"
                    );
                    continue;
                }
                resolved.insert(
                    resolved_name.clone(),
                    resolved_tool(entry, backend_id, resolved_name, ConflictStrategy::Prefix),
                );
            }
        }

        Ok(resolved)
    }
}

/// Picks the tool from the highest-priority backend on collision
///
/// Tools whose name collides only among backends absent from the
/// priority list fall back to prefixing (no data loss), so a single run
/// can expose both naming conventions; each resolved tool is tagged
/// with the rule that actually applied.
pub struct PriorityResolver {
    order: Vec<String>,
    fallback: PrefixResolver,
}

impl PriorityResolver {
    /// Create a resolver over the given backend priority order,
    /// highest first
    #[must_use]
    pub fn new(order: Vec<String>) -> Self {
        Self {
            order,
            fallback: PrefixResolver::new(DEFAULT_PREFIX_FORMAT),
        }
    }

    fn rank(&self, backend_id: &str) -> Option<usize> {
        self.order.iter().position(|b| b == backend_id)
    }
}

impl ConflictResolver for PriorityResolver {
    fn strategy(&self) -> ConflictStrategy {
        ConflictStrategy::Priority
    }

    fn resolve(
        &self,
        tools_by_backend: &HashMap<String, Vec<BackendTool>>,
    ) -> Result<HashMap<String, ResolvedTool>> {
        let mut resolved: HashMap<String, ResolvedTool> = HashMap::new();

        for (name, candidates) in group_by_name(tools_by_backend) {
            if candidates.len() == 1 {
                let (backend_id, entry) = candidates[0];
                insert_unique(
                    &mut resolved,
                    resolved_tool(entry, backend_id, name, ConflictStrategy::Priority),
                );
                continue;
            }

            let winner = candidates
                .iter()
                .filter_map(|(backend_id, entry)| {
                    self.rank(backend_id).map(|rank| (rank, *backend_id, *entry))
                })
                .min_by_key(|(rank, _, _)| *rank);

            match winner {
                Some((_, backend_id, entry)) => {
                    for (loser, _) in candidates.iter().filter(|(b, _)| *b != backend_id) {
                        warn!(
                            tool = %name,
                            winner = %backend_id,
                            dropped = %loser,
                            "Priority strategy dropped colliding tool"
                        );
                    }
                    insert_unique(
                        &mut resolved,
                        resolved_tool(entry, backend_id, name, ConflictStrategy::Priority),
                    );
                }
                None => {
                    // No candidate is in the priority list; prefix all
                    // of them rather than losing data.
                    debug!(tool = %name, "No candidate in priority order, prefixing all");
                    for (backend_id, entry) in candidates {
                        let resolved_name =
                            format!("{}{}", self.fallback.prefix_for(backend_id), entry.tool.name);
                        insert_unique(
                            &mut resolved,
                            resolved_tool(
                                entry,
                                backend_id,
                                resolved_name,
                                ConflictStrategy::Prefix,
                            ),
                        );
                    }
                }
            }
        }

        Ok(resolved)
    }
}

fn insert_unique(resolved: &mut HashMap<String, ResolvedTool>, tool: ResolvedTool) {
    if resolved.contains_key(&tool.resolved_name) {
        warn!(
            backend = %tool.backend_id,
            name = %tool.resolved_name,
            "Resolved name already taken, skipping tool"
        );
        return;
    }
    resolved.insert(tool.resolved_name.clone(), tool);
}

/// Resolves collisions through explicit per-backend overrides
///
/// Every backend participating in a collision must have an override for
/// the colliding original name; anything short of that is a
/// configuration error surfaced with the full collision list.
pub struct ManualResolver {
    overrides: HashMap<String, HashMap<String, ToolOverride>>,
}

impl ManualResolver {
    /// Create a resolver over the per-workload tool configs
    #[must_use]
    pub fn new(tool_configs: &[WorkloadToolConfig]) -> Self {
        Self {
            overrides: tool_configs
                .iter()
                .map(|c| (c.workload.clone(), c.overrides.clone()))
                .collect(),
        }
    }

    fn has_override(&self, backend_id: &str, original_name: &str) -> bool {
        self.overrides
            .get(backend_id)
            .is_some_and(|o| o.contains_key(original_name))
    }
}

impl ConflictResolver for ManualResolver {
    fn strategy(&self) -> ConflictStrategy {
        ConflictStrategy::Manual
    }

    fn resolve(
        &self,
        tools_by_backend: &HashMap<String, Vec<BackendTool>>,
    ) -> Result<HashMap<String, ResolvedTool>> {
        // Collisions are judged on the name at the backend, not the
        // (possibly already overridden) exposed name.
        let mut backends: Vec<&String> = tools_by_backend.keys().collect();
        backends.sort();

        let mut by_original: BTreeMap<&str, Vec<(&str, &BackendTool)>> = BTreeMap::new();
        for backend_id in backends {
            for entry in &tools_by_backend[backend_id] {
                by_original
                    .entry(entry.original_name.as_str())
                    .or_default()
                    .push((backend_id, entry));
            }
        }

        let mut unresolved = Vec::new();
        for (original_name, candidates) in &by_original {
            if candidates.len() < 2 {
                continue;
            }
            let missing = candidates
                .iter()
                .any(|(backend_id, _)| !self.has_override(backend_id, original_name));
            if missing {
                unresolved.push(UnresolvedConflict {
                    tool_name: (*original_name).to_string(),
                    backend_ids: candidates.iter().map(|(b, _)| (*b).to_string()).collect(),
                });
            }
        }

        if !unresolved.is_empty() {
            return Err(Error::UnresolvedConflicts(unresolved));
        }

        let mut resolved: HashMap<String, ResolvedTool> = HashMap::new();
        for candidates in by_original.values() {
            for (backend_id, entry) in candidates {
                let tool = resolved_tool(
                    entry,
                    backend_id,
                    entry.tool.name.clone(),
                    ConflictStrategy::Manual,
                );
                if let Some(existing) = resolved.get(&tool.resolved_name) {
                    return Err(Error::OverrideCollision {
                        name: tool.resolved_name.clone(),
                        backends: vec![existing.backend_id.clone(), tool.backend_id],
                    });
                }
                resolved.insert(tool.resolved_name.clone(), tool);
            }
        }

        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::aggregator::tools::process_backend_tools;
    use crate::config::ConflictResolutionSettings;
    use crate::protocol::Tool;

    fn tool(name: &str) -> Tool {
        Tool {
            name: name.to_string(),
            description: None,
            input_schema: json!({"type": "object"}),
            backend_id: String::new(),
        }
    }

    fn backend_tools(backend_id: &str, names: &[&str]) -> Vec<BackendTool> {
        process_backend_tools(backend_id, names.iter().map(|n| tool(n)).collect(), None)
    }

    fn two_backend_collision() -> HashMap<String, Vec<BackendTool>> {
        HashMap::from([
            (
                "github".to_string(),
                backend_tools("github", &["create_issue", "list_issues"]),
            ),
            (
                "jira".to_string(),
                backend_tools("jira", &["create_issue", "list_projects"]),
            ),
        ])
    }

    #[test]
    fn prefix_renames_everything() {
        let resolver = PrefixResolver::new("{workload}_");
        let resolved = resolver.resolve(&two_backend_collision()).unwrap();

        let mut names: Vec<&str> = resolved.keys().map(String::as_str).collect();
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
        assert!(
            resolved
                .values()
                .all(|t| t.conflict_resolution_applied == ConflictStrategy::Prefix)
        );
        assert_eq!(resolved["github_create_issue"].original_name, "create_issue");
    }

    #[test]
    fn prefix_supports_literal_formats() {
        let resolver = PrefixResolver::new("ext_");
        let resolved = resolver
            .resolve(&HashMap::from([(
                "github".to_string(),
                backend_tools("github", &["create_issue"]),
            )]))
            .unwrap();
        assert!(resolved.contains_key("ext_create_issue"));
    }

    #[test]
    fn priority_picks_the_earliest_backend() {
        let resolver = PriorityResolver::new(vec!["github".to_string(), "jira".to_string()]);
        let input = HashMap::from([
            ("github".to_string(), backend_tools("github", &["create_issue"])),
            ("jira".to_string(), backend_tools("jira", &["create_issue"])),
        ]);

        let resolved = resolver.resolve(&input).unwrap();
        assert_eq!(resolved.len(), 1);
        let tool = &resolved["create_issue"];
        assert_eq!(tool.backend_id, "github");
        assert_eq!(tool.conflict_resolution_applied, ConflictStrategy::Priority);
    }

    #[test]
    fn priority_falls_back_to_prefix_for_unlisted_backends() {
        let resolver = PriorityResolver::new(vec!["github".to_string()]);
        let input = HashMap::from([
            ("github".to_string(), backend_tools("github", &["create_issue"])),
            ("slack".to_string(), backend_tools("slack", &["send_message"])),
            ("teams".to_string(), backend_tools("teams", &["send_message"])),
        ]);

        let resolved = resolver.resolve(&input).unwrap();
        assert_eq!(resolved.len(), 3);

        assert_eq!(resolved["create_issue"].backend_id, "github");
        assert_eq!(
            resolved["create_issue"].conflict_resolution_applied,
            ConflictStrategy::Priority
        );

        assert_eq!(resolved["slack_send_message"].backend_id, "slack");
        assert_eq!(
            resolved["slack_send_message"].conflict_resolution_applied,
            ConflictStrategy::Prefix
        );
        assert_eq!(resolved["teams_send_message"].backend_id, "teams");
        assert_eq!(
            resolved["teams_send_message"].conflict_resolution_applied,
            ConflictStrategy::Prefix
        );
    }

    #[test]
    fn manual_requires_overrides_for_every_candidate() {
        let configs = vec![WorkloadToolConfig {
            workload: "github".to_string(),
            overrides: HashMap::from([(
                "create_issue".to_string(),
                ToolOverride {
                    name: Some("gh_create_issue".to_string()),
                    description: None,
                },
            )]),
            ..Default::default()
        }];
        let resolver = ManualResolver::new(&configs);

        // Simulate the pipeline: the processor applied the overrides.
        let input = HashMap::from([
            (
                "github".to_string(),
                process_backend_tools("github", vec![tool("create_issue")], Some(&configs[0])),
            ),
            ("jira".to_string(), backend_tools("jira", &["create_issue"])),
        ]);

        let err = resolver.resolve(&input).unwrap_err();
        match err {
            Error::UnresolvedConflicts(conflicts) => {
                assert_eq!(conflicts.len(), 1);
                assert_eq!(conflicts[0].tool_name, "create_issue");
                assert_eq!(conflicts[0].backend_ids, vec!["github", "jira"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn manual_resolves_when_all_candidates_are_overridden() {
        let github_config = WorkloadToolConfig {
            workload: "github".to_string(),
            overrides: HashMap::from([(
                "create_issue".to_string(),
                ToolOverride {
                    name: Some("gh_create_issue".to_string()),
                    description: None,
                },
            )]),
            ..Default::default()
        };
        let jira_config = WorkloadToolConfig {
            workload: "jira".to_string(),
            overrides: HashMap::from([(
                "create_issue".to_string(),
                ToolOverride {
                    name: Some("jira_create_issue".to_string()),
                    description: None,
                },
            )]),
            ..Default::default()
        };
        let configs = vec![github_config.clone(), jira_config.clone()];
        let resolver = ManualResolver::new(&configs);

        let input = HashMap::from([
            (
                "github".to_string(),
                process_backend_tools("github", vec![tool("create_issue")], Some(&github_config)),
            ),
            (
                "jira".to_string(),
                process_backend_tools("jira", vec![tool("create_issue")], Some(&jira_config)),
            ),
        ]);

        let resolved = resolver.resolve(&input).unwrap();
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved["gh_create_issue"].original_name, "create_issue");
        assert_eq!(resolved["gh_create_issue"].backend_id, "github");
        assert_eq!(resolved["jira_create_issue"].backend_id, "jira");
        assert!(
            resolved
                .values()
                .all(|t| t.conflict_resolution_applied == ConflictStrategy::Manual)
        );
    }

    #[test]
    fn manual_rejects_collapsing_overrides() {
        let github_config = WorkloadToolConfig {
            workload: "github".to_string(),
            overrides: HashMap::from([(
                "create_issue".to_string(),
                ToolOverride {
                    name: Some("create".to_string()),
                    description: None,
                },
            )]),
            ..Default::default()
        };
        let jira_config = WorkloadToolConfig {
            workload: "jira".to_string(),
            overrides: HashMap::from([(
                "create_issue".to_string(),
                ToolOverride {
                    name: Some("create".to_string()),
                    description: None,
                },
            )]),
            ..Default::default()
        };
        let configs = vec![github_config.clone(), jira_config.clone()];
        let resolver = ManualResolver::new(&configs);

        let input = HashMap::from([
            (
                "github".to_string(),
                process_backend_tools("github", vec![tool("create_issue")], Some(&github_config)),
            ),
            (
                "jira".to_string(),
                process_backend_tools("jira", vec![tool("create_issue")], Some(&jira_config)),
            ),
        ]);

        let err = resolver.resolve(&input).unwrap_err();
        assert!(matches!(err, Error::OverrideCollision { .. }));
    }

    #[test]
    fn factory_defaults_to_prefix() {
        let resolver = resolver_from_config(None).unwrap();
        assert_eq!(resolver.strategy(), ConflictStrategy::Prefix);
    }

    #[test]
    fn factory_rejects_priority_without_order() {
        let config = AggregationConfig {
            conflict_resolution: ConflictStrategy::Priority,
            conflict_resolution_config: ConflictResolutionSettings {
                priority_order: vec![],
                ..Default::default()
            },
            ..Default::default()
        };

        let err = resolver_from_config(Some(&config)).unwrap_err();
        assert!(matches!(err, Error::InvalidConflictStrategy(_)));
    }

    #[test]
    fn factory_accepts_manual_without_overrides() {
        let config = AggregationConfig {
            conflict_resolution: ConflictStrategy::Manual,
            ..Default::default()
        };
        // Missing overrides only surface at resolution time.
        let resolver = resolver_from_config(Some(&config)).unwrap();
        assert_eq!(resolver.strategy(), ConflictStrategy::Manual);
    }

    #[test]
    fn resolved_names_are_unique() {
        let resolver = PrefixResolver::new("{workload}_");
        let resolved = resolver.resolve(&two_backend_collision()).unwrap();
        // Keys are resolved names; uniqueness holds by construction.
        assert_eq!(
            resolved.len(),
            resolved
                .values()
                .map(|t| t.resolved_name.clone())
                .collect::<std::collections::HashSet<_>>()
                .len()
        );
    }
}
