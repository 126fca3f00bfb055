//! Per-backend tool processing
//!
//! Applies configured rename/re-describe overrides before conflict
//! resolution. Advertising filters (`filter`, `exclude_all`) are NOT
//! applied here: filtered tools must stay reachable through the routing
//! table, so they are only withheld from the advertised lists during
//! merging.

use tracing::warn;

use super::types::BackendTool;
use crate::config::WorkloadToolConfig;
use crate::protocol::Tool;

/// Apply per-backend overrides to a backend's tools
///
/// Tool names and descriptions may be replaced; schemas are preserved
/// verbatim and `backend_id` is forced to the processing parameter. If
/// the overrides are inconsistent (two originals mapping to one name),
/// the input is returned unprocessed rather than dropping tools.
#[must_use]
pub fn process_backend_tools(
    backend_id: &str,
    tools: Vec<Tool>,
    config: Option<&WorkloadToolConfig>,
) -> Vec<BackendTool> {
    let overrides = config.map(|c| &c.overrides).filter(|o| !o.is_empty());

    let Some(overrides) = overrides else {
        return passthrough(backend_id, tools);
    };

    let mut reverse: std::collections::HashMap<String, String> = std::collections::HashMap::new();
    let mut processed = Vec::with_capacity(tools.len());

    for tool in &tools {
        let original_name = tool.name.clone();
        let mut renamed = tool.clone();
        renamed.backend_id = backend_id.to_string();

        if let Some(tool_override) = overrides.get(&original_name) {
            if let Some(new_name) = tool_override.new_name() {
                renamed.name = new_name.to_string();
            }
            if let Some(new_description) = tool_override.new_description() {
                renamed.description = Some(new_description.to_string());
            }
        }

        if let Some(previous) = reverse.insert(renamed.name.clone(), original_name.clone()) {
            warn!(
                backend = %backend_id,
                name = %renamed.name,
                first = %previous,
                second = %original_name,
                "Tool overrides collapse two tools to one name; returning tools unprocessed"
            );
            return passthrough(backend_id, tools);
        }

        processed.push(BackendTool {
            tool: renamed,
            original_name,
        });
    }

    processed
}

fn passthrough(backend_id: &str, tools: Vec<Tool>) -> Vec<BackendTool> {
    tools
        .into_iter()
        .map(|mut tool| {
            tool.backend_id = backend_id.to_string();
            let original_name = tool.name.clone();
            BackendTool {
                tool,
                original_name,
            }
        })
        .collect()
}

/// Whether a tool should appear in the advertised tool list
///
/// Evaluated against the *original* backend name, in order: the global
/// exclude flag, the backend's `exclude_all`, then the backend's filter
/// list (empty list admits everything).
#[must_use]
pub fn should_advertise_tool(
    exclude_all_tools: bool,
    config: Option<&WorkloadToolConfig>,
    original_name: &str,
) -> bool {
    if exclude_all_tools {
        return false;
    }

    let Some(config) = config else {
        return true;
    };

    if config.exclude_all {
        return false;
    }

    if !config.filter.is_empty() && !config.filter.iter().any(|f| f == original_name) {
        return false;
    }

    true
}
