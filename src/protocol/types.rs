//! Capability type definitions
//!
//! Tools are opaque to the aggregation core beyond name, description and
//! schema; the `inputSchema` value is carried verbatim from the backend to
//! the advertised view.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool announced by a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    /// Tool name
    pub name: String,
    /// Tool description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Input JSON Schema, preserved bit-exact
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
    /// Backend the tool belongs to. Not part of the wire format; set by
    /// the aggregation pipeline.
    #[serde(skip)]
    pub backend_id: String,
}

/// Resource announced by a backend, keyed by URI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Resource URI
    pub uri: String,
    /// Resource name
    pub name: String,
    /// Resource description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// MIME type
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Prompt announced by a backend, keyed by name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    /// Prompt name
    pub name: String,
    /// Prompt description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Prompt arguments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<PromptArgument>,
}

/// Prompt argument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptArgument {
    /// Argument name
    pub name: String,
    /// Argument description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the argument is required
    #[serde(default)]
    pub required: bool,
}

/// One backend's full capability listing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityList {
    /// Tools announced by the backend
    #[serde(default)]
    pub tools: Vec<Tool>,
    /// Resources announced by the backend
    #[serde(default)]
    pub resources: Vec<Resource>,
    /// Prompts announced by the backend
    #[serde(default)]
    pub prompts: Vec<Prompt>,
    /// Whether the backend supports logging
    #[serde(default)]
    pub supports_logging: bool,
    /// Whether the backend supports sampling
    #[serde(default)]
    pub supports_sampling: bool,
}
