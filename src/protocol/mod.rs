//! MCP protocol types shared across the aggregation pipeline

mod messages;
mod types;

pub use messages::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, PromptsListResult, RequestId,
    ResourcesListResult, ToolsListResult,
};
pub use types::{CapabilityList, Prompt, PromptArgument, Resource, Tool};

/// MCP protocol version spoken to backends
pub const PROTOCOL_VERSION: &str = "2025-03-26";
