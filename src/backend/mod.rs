//! Backend domain model
//!
//! A [`Backend`] is one reachable MCP server inside a group. Records are
//! created by discovery or reconciliation and are immutable within a
//! registry snapshot; the dynamic registry replaces whole records on
//! upsert.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub mod registry;

pub use registry::{BackendRegistry, DynamicRegistry, ImmutableRegistry};

/// Reserved metadata key holding the discovery group reference.
///
/// Always set by discovery and reconciliation; overwrites any
/// user-supplied value with the same key.
pub const GROUP_METADATA_KEY: &str = "group";

/// Transport used to reach a backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportType {
    /// Streamable HTTP transport
    #[default]
    StreamableHttp,
    /// Server-Sent Events transport
    Sse,
    /// Standard I/O transport
    Stdio,
}

impl TransportType {
    /// Parse a transport token, returning `None` for unknown tokens
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "streamable-http" => Some(Self::StreamableHttp),
            "sse" => Some(Self::Sse),
            "stdio" => Some(Self::Stdio),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StreamableHttp => write!(f, "streamable-http"),
            Self::Sse => write!(f, "sse"),
            Self::Stdio => write!(f, "stdio"),
        }
    }
}

/// Health of a backend as last observed by its platform
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Backend is serving
    Healthy,
    /// Backend is not serving
    Unhealthy,
    /// Backend is serving with reduced capability
    Degraded,
    /// Backend rejected our credentials
    Unauthenticated,
    /// Health has not been determined
    #[default]
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unauthenticated => write!(f, "unauthenticated"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Outgoing authentication strategy for one backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendAuthStrategy {
    /// Inject a static header into every request
    HeaderInjection {
        /// Header name
        header_name: String,
        /// Header value; supports `env:VAR` indirection in config files
        header_value: String,
    },
    /// Exchange client credentials for a bearer token
    TokenExchange {
        /// OAuth token endpoint
        token_url: String,
        /// OAuth client ID
        client_id: String,
        /// OAuth client secret; supports `env:VAR` indirection
        client_secret: String,
        /// Requested audience
        #[serde(default, skip_serializing_if = "Option::is_none")]
        audience: Option<String>,
        /// Requested scopes
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        scopes: Vec<String>,
    },
    /// Indirect reference to an external auth config; must be resolved
    /// to one of the other variants before use
    ExternalAuthConfigRef {
        /// External auth config name
        name: String,
    },
    /// Forward the incoming client's credentials unchanged
    Passthrough,
    /// No outgoing authentication
    None,
}

impl BackendAuthStrategy {
    /// Whether this strategy is an unresolved indirect reference
    #[must_use]
    pub fn is_external_ref(&self) -> bool {
        matches!(self, Self::ExternalAuthConfigRef { .. })
    }
}

/// One reachable MCP server within a group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backend {
    /// Unique identifier within the group; stable routing key
    pub id: String,
    /// Human label, usually equal to `id`
    pub name: String,
    /// Base URL the backend is reached at
    pub base_url: String,
    /// Transport used to reach the backend
    #[serde(default)]
    pub transport: TransportType,
    /// Last observed health
    #[serde(default)]
    pub health: HealthStatus,
    /// Outgoing auth strategy, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<BackendAuthStrategy>,
    /// Free-form metadata; the `group` key is reserved
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl Backend {
    /// Group this backend was discovered for, if recorded
    #[must_use]
    pub fn group(&self) -> Option<&str> {
        self.metadata.get(GROUP_METADATA_KEY).map(String::as_str)
    }

    /// Record the discovery group, overwriting any user-supplied value
    pub fn set_group(&mut self, group_ref: &str) {
        self.metadata
            .insert(GROUP_METADATA_KEY.to_string(), group_ref.to_string());
    }
}

/// Routing target for one resolved capability.
///
/// A value copy of the registry's [`Backend`] plus the pre-rename
/// capability name, so the routing table never holds references into a
/// live registry snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendTarget {
    /// Backend workload ID
    pub workload_id: String,
    /// Backend workload name
    pub workload_name: String,
    /// Base URL to dispatch to
    pub base_url: String,
    /// Transport to dispatch over
    pub transport: TransportType,
    /// Health at aggregation time
    pub health: HealthStatus,
    /// Outgoing auth to apply on dispatch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<BackendAuthStrategy>,
    /// Name the capability has at the backend, forwarded on invocation
    pub original_capability_name: String,
}

impl BackendTarget {
    /// Build a target from a registry backend, preserving auth
    #[must_use]
    pub fn from_backend(backend: &Backend, original_capability_name: impl Into<String>) -> Self {
        Self {
            workload_id: backend.id.clone(),
            workload_name: backend.name.clone(),
            base_url: backend.base_url.clone(),
            transport: backend.transport,
            health: backend.health,
            auth: backend.auth.clone(),
            original_capability_name: original_capability_name.into(),
        }
    }

    /// Minimal target for a backend missing from the registry
    #[must_use]
    pub fn minimal(backend_id: &str, original_capability_name: impl Into<String>) -> Self {
        Self {
            workload_id: backend_id.to_string(),
            workload_name: backend_id.to_string(),
            base_url: String::new(),
            transport: TransportType::default(),
            health: HealthStatus::Unknown,
            auth: None,
            original_capability_name: original_capability_name.into(),
        }
    }
}
