//! Virtual MCP Core
//!
//! Control-plane library for serving a *group* of MCP backends as one
//! virtual MCP server:
//!
//! - **Discovery**: turn a group reference into backend records, from a
//!   local container runtime, the cluster API, or static configuration
//! - **Aggregation**: query every backend's capabilities in parallel,
//!   resolve tool name conflicts (prefix / priority / manual), and
//!   build a unified view plus a routing table
//! - **Dynamic registry**: a versioned, copy-on-write backend registry
//!   kept live by an event-driven reconciler in cluster deployments
//! - **Outgoing auth**: per-backend strategies with fail-closed
//!   resolution of external auth config references
//!
//! The embedding vMCP server owns the MCP listener, request routing and
//! composite tool runtime; this crate produces the capability view and
//! routing table they consume.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aggregator;
pub mod auth;
pub mod backend;
pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod protocol;
pub mod reconciler;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
