//! Peer federation: per-peer JSON-RPC client and the peer manager.

mod client;
mod manager;

pub use client::PeerClient;
pub use manager::{PeerManager, PeerStatus};
