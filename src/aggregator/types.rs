//! Aggregation pipeline data types

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::BackendTarget;
use crate::config::ConflictStrategy;
use crate::protocol::{Prompt, Resource, Tool};

/// A backend's tool after per-backend processing
///
/// `original_name` is the name the backend knows the tool by; the
/// embedded tool may already carry an overridden name.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendTool {
    /// The tool, possibly renamed/re-described by overrides
    pub tool: Tool,
    /// Pre-override name at the backend
    pub original_name: String,
}

/// One backend's capabilities plus feature flags
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendCapabilities {
    /// Backend these capabilities belong to
    pub backend_id: String,
    /// Processed tools
    pub tools: Vec<BackendTool>,
    /// Resources, passed through unprocessed
    pub resources: Vec<Resource>,
    /// Prompts, passed through unprocessed
    pub prompts: Vec<Prompt>,
    /// Whether the backend supports logging
    pub supports_logging: bool,
    /// Whether the backend supports sampling
    pub supports_sampling: bool,
}

/// A tool after conflict resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedTool {
    /// Name exposed to clients
    pub resolved_name: String,
    /// Name at the backend, forwarded on invocation
    pub original_name: String,
    /// Tool description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Input schema, preserved verbatim
    pub input_schema: Value,
    /// Owning backend
    pub backend_id: String,
    /// Rule that produced the resolved name
    pub conflict_resolution_applied: ConflictStrategy,
}

/// A resource with its owning backend
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedResource {
    /// The resource
    pub resource: Resource,
    /// Owning backend
    pub backend_id: String,
}

/// A prompt with its owning backend
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPrompt {
    /// The prompt
    pub prompt: Prompt,
    /// Owning backend
    pub backend_id: String,
}

/// Post-conflict capability view
#[derive(Debug, Clone, Default)]
pub struct ResolvedCapabilities {
    /// Resolved tools keyed by resolved name; keys are globally unique
    pub tools: HashMap<String, ResolvedTool>,
    /// Resources across all backends (URI-keyed, effectively namespaced)
    pub resources: Vec<ResolvedResource>,
    /// Prompts across all backends
    pub prompts: Vec<ResolvedPrompt>,
    /// Whether any backend supports logging
    pub supports_logging: bool,
    /// Whether any backend supports sampling
    pub supports_sampling: bool,
}

/// Dispatch table from resolved capability names to backend targets
///
/// Contains every resolved entry, including tools filtered from
/// advertising, so composite tools can still invoke them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingTable {
    /// Tool targets keyed by resolved name
    pub tools: HashMap<String, BackendTarget>,
    /// Resource targets keyed by URI
    pub resources: HashMap<String, BackendTarget>,
    /// Prompt targets keyed by name
    pub prompts: HashMap<String, BackendTarget>,
}

/// Aggregation run metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationMetadata {
    /// Number of backends in the aggregated registry
    pub backend_count: usize,
    /// Advertised tool count
    pub tool_count: usize,
    /// Advertised resource count
    pub resource_count: usize,
    /// Advertised prompt count
    pub prompt_count: usize,
    /// Configured conflict strategy (not sampled from tools)
    pub conflict_strategy: ConflictStrategy,
    /// When the aggregation ran
    pub aggregated_at: DateTime<Utc>,
}

/// The unified capability view handed to the vMCP server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedCapabilities {
    /// Advertised tools (post advertising filters)
    pub tools: Vec<Tool>,
    /// Advertised resources
    pub resources: Vec<Resource>,
    /// Advertised prompts
    pub prompts: Vec<Prompt>,
    /// Routing table over all resolved entries
    pub routing: RoutingTable,
    /// Whether any backend supports logging
    pub supports_logging: bool,
    /// Whether any backend supports sampling
    pub supports_sampling: bool,
    /// Run metadata
    pub metadata: AggregationMetadata,
}
