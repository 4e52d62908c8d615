//! Transport implementations for MCP peers
//!
//! A transport is a framed, bidirectional pipe for JSON-RPC messages.
//! Correlation of requests to responses happens one layer up, in the peer
//! client; transports only move frames. Connection establishment is the
//! constructor of each variant. Sends are serialized (one writer at a time);
//! each transport has a single receiver.

mod inproc;
mod socket;
mod stdio;

pub use self::inproc::InProcTransport;
pub use self::socket::SocketTransport;
pub use self::stdio::StdioTransport;

use async_trait::async_trait;

use crate::{Result, protocol::JsonRpcMessage};

/// Transport trait for MCP peer communication
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one frame
    async fn send(&self, message: &JsonRpcMessage) -> Result<()>;

    /// Receive the next frame. Blocks until a frame arrives, the transport
    /// dies, or it is closed.
    async fn receive(&self) -> Result<JsonRpcMessage>;

    /// Check if the transport is connected
    fn is_connected(&self) -> bool;

    /// Close the transport
    async fn close(&self) -> Result<()>;
}
