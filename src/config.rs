//! Configuration surface for the vMCP core
//!
//! Loaded once at startup and immutable thereafter. The loader merges a
//! YAML file with `TOOLHIVE_VMCP_` prefixed environment variables.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::backend::{BackendAuthStrategy, TransportType};
use crate::{Error, Result};

/// Environment variable overriding the auth-config directory (CLI mode)
pub const AUTH_CONFIG_DIR_ENV: &str = "TOOLHIVE_VMCP_AUTH_CONFIG_DIR";

/// Default prefix format for the prefix conflict strategy
pub const DEFAULT_PREFIX_FORMAT: &str = "{workload}_";

/// Source mode for outgoing authentication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthSourceMode {
    /// Prefer auth discovered from the backend's own spec
    Discovered,
    /// Always use the inline per-backend/default strategies
    Inline,
}

/// Process-wide outgoing authentication policy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutgoingAuthConfig {
    /// Source token: `"discovered"`, `"inline"` or empty. Unknown
    /// tokens are treated as `"inline"`.
    pub source: String,
    /// Default strategy when no per-backend entry matches
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<BackendAuthStrategy>,
    /// Explicit per-backend strategies
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub backends: HashMap<String, BackendAuthStrategy>,
}

impl OutgoingAuthConfig {
    /// Interpret the source token
    #[must_use]
    pub fn source_mode(&self) -> AuthSourceMode {
        match self.source.as_str() {
            "discovered" => AuthSourceMode::Discovered,
            _ => AuthSourceMode::Inline,
        }
    }

    /// Per-backend override if present, else the default, else none
    #[must_use]
    pub fn resolve_for_backend(&self, name: &str) -> Option<BackendAuthStrategy> {
        self.backends
            .get(name)
            .cloned()
            .or_else(|| self.default.clone())
    }
}

/// Conflict resolution strategy token
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStrategy {
    /// Prefix every tool name with a backend-derived prefix
    #[default]
    Prefix,
    /// Resolve collisions by backend priority order
    Priority,
    /// Resolve collisions through explicit overrides
    Manual,
}

impl std::fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Prefix => write!(f, "prefix"),
            Self::Priority => write!(f, "priority"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Settings for the configured conflict strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictResolutionSettings {
    /// Prefix format; `{workload}` is substituted with the backend ID
    pub prefix_format: String,
    /// Backend IDs in priority order, highest first
    pub priority_order: Vec<String>,
}

impl Default for ConflictResolutionSettings {
    fn default() -> Self {
        Self {
            prefix_format: DEFAULT_PREFIX_FORMAT.to_string(),
            priority_order: Vec::new(),
        }
    }
}

/// Rename/re-describe override for one tool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolOverride {
    /// Replacement name; empty or absent keeps the original
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Replacement description; empty or absent keeps the original
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ToolOverride {
    /// Effective replacement name, ignoring empty strings
    #[must_use]
    pub fn new_name(&self) -> Option<&str> {
        self.name.as_deref().filter(|n| !n.is_empty())
    }

    /// Effective replacement description, ignoring empty strings
    #[must_use]
    pub fn new_description(&self) -> Option<&str> {
        self.description.as_deref().filter(|d| !d.is_empty())
    }
}

/// Per-workload tool configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadToolConfig {
    /// Backend ID this configuration applies to
    pub workload: String,
    /// Advertise none of this backend's tools
    pub exclude_all: bool,
    /// Advertise only these original tool names; empty means all
    pub filter: Vec<String>,
    /// Overrides keyed by original tool name
    pub overrides: HashMap<String, ToolOverride>,
}

/// Aggregation configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Configured conflict resolution strategy
    pub conflict_resolution: ConflictStrategy,
    /// Strategy settings
    pub conflict_resolution_config: ConflictResolutionSettings,
    /// Per-workload tool configuration
    pub tools: Vec<WorkloadToolConfig>,
    /// Advertise no tools at all; routing is unaffected
    pub exclude_all_tools: bool,
}

impl AggregationConfig {
    /// Per-workload configs keyed by backend ID
    #[must_use]
    pub fn tool_config_map(&self) -> HashMap<String, WorkloadToolConfig> {
        self.tools
            .iter()
            .map(|t| (t.workload.clone(), t.clone()))
            .collect()
    }
}

/// One statically configured backend (no platform lookup)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticBackendConfig {
    /// Backend name, used as its ID
    pub name: String,
    /// Base URL
    pub url: String,
    /// Transport token
    pub transport: TransportType,
    /// Auth carried with the static definition, treated as discovered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<BackendAuthStrategy>,
    /// Free-form metadata; the `group` key is overwritten at discovery
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

/// Top-level vMCP core configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmcpConfig {
    /// Group served by this instance
    pub group: String,
    /// Outgoing authentication policy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outgoing_auth: Option<OutgoingAuthConfig>,
    /// Aggregation configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<AggregationConfig>,
    /// Statically configured backends (CLI mode without a runtime)
    pub static_backends: Vec<StaticBackendConfig>,
    /// Per-backend capability query timeout in seconds
    pub query_timeout_secs: u64,
}

impl VmcpConfig {
    /// Load configuration from a YAML file merged with
    /// `TOOLHIVE_VMCP_` environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("TOOLHIVE_VMCP_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        if config.query_timeout_secs == 0 {
            config.query_timeout_secs = 30;
        }

        Ok(config)
    }
}

/// Directory holding external auth config documents (CLI mode)
///
/// `TOOLHIVE_VMCP_AUTH_CONFIG_DIR` overrides the XDG config location.
/// Resolved once at startup; treat as process-wide read-only state.
#[must_use]
pub fn auth_config_dir() -> PathBuf {
    auth_config_dir_from(env::var(AUTH_CONFIG_DIR_ENV).ok())
}

fn auth_config_dir_from(override_dir: Option<String>) -> PathBuf {
    match override_dir {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("toolhive")
            .join("vmcp")
            .join("auth"),
    }
}
