//! Error types for the vMCP core

use std::io;

use thiserror::Error;

/// Result type alias for the vMCP core
pub type Result<T> = std::result::Result<T, Error>;

/// A tool name collision the manual strategy could not resolve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedConflict {
    /// Original tool name shared by several backends
    pub tool_name: String,
    /// Backends announcing a tool with that name
    pub backend_ids: Vec<String>,
}

impl std::fmt::Display for UnresolvedConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "'{}' (backends: {})", self.tool_name, self.backend_ids.join(", "))
    }
}

/// vMCP core errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The referenced group does not exist
    #[error("Group not found: {0}")]
    GroupNotFound(String),

    /// A single backend's capability query failed
    #[error("Backend query failed for '{backend}': {message}")]
    BackendQuery {
        /// Backend that failed
        backend: String,
        /// Failure detail
        message: String,
    },

    /// Every queried backend failed to return capabilities
    #[error("No backends returned capabilities")]
    NoBackendsReturnedCapabilities,

    /// The aggregation pipeline was handed an empty backend set
    #[error("No backends found")]
    NoBackendsFound,

    /// Manual conflict strategy is missing overrides for colliding tools
    #[error("Unresolved tool name conflicts: {}", format_conflicts(.0))]
    UnresolvedConflicts(Vec<UnresolvedConflict>),

    /// Two overrides collapsed to the same resolved tool name
    #[error("Overrides collapse to the same resolved name '{name}' (backends: {})", .backends.join(", "))]
    OverrideCollision {
        /// Resolved name produced more than once
        name: String,
        /// Backends whose overrides collide
        backends: Vec<String>,
    },

    /// Unknown or unusable conflict resolution strategy
    #[error("Invalid conflict strategy: {0}")]
    InvalidConflictStrategy(String),

    /// An external auth config reference could not be resolved
    #[error("Auth resolution failed: {0}")]
    AuthResolution(String),

    /// The dynamic registry rejected a mutation
    #[error("Registry error: {0}")]
    Registry(String),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

fn format_conflicts(conflicts: &[UnresolvedConflict]) -> String {
    conflicts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
