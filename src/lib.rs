//! gadgetd - Multi-User Gadget Server
//!
//! Security kernel for a plugin-extensible local tooling server:
//!
//! - **Identity**: signed bearer tokens (HS256) with subject, roles, validity window
//! - **RBAC**: persistent (subject, object, action) rules and role grants
//! - **Sandbox**: base-root containment, deny-list, extension and size policy
//! - **Gadgets**: supervised out-of-process execution with bounded timeouts
//! - **Peers**: JSON-RPC 2.0 federation to external MCP servers over
//!   stdio, socket, and in-process transports
//!
//! The HTTP API (axum) binds token identity to policy decisions per route and
//! emits a structured access log with correlation ids on every request.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod gadget;
pub mod peer;
pub mod protocol;
pub mod rbac;
pub mod redact;
pub mod sandbox;
pub mod server;
pub mod transport;

pub use error::{Error, Result, SandboxDenial};
/// MCP protocol version spoken to peers
pub use protocol::PROTOCOL_VERSION as MCP_PROTOCOL_VERSION;

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
