//! Backend capability client
//!
//! The aggregation pipeline only needs one operation from the MCP wire
//! layer: listing a backend's capabilities. The trait keeps the wire
//! client pluggable; [`HttpBackendClient`] is the production
//! implementation for HTTP-based transports.

use async_trait::async_trait;

use crate::backend::BackendTarget;
use crate::protocol::CapabilityList;
use crate::Result;

pub mod http;

pub use http::HttpBackendClient;

/// Capability listing RPC to a single backend
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// List the tools, resources and prompts of the targeted backend
    async fn list_capabilities(&self, target: &BackendTarget) -> Result<CapabilityList>;
}
