//! JSON-RPC 2.0 message core and MCP catalog types (version 2024-11-05)

mod messages;
mod types;

pub use messages::*;
pub use types::*;

use std::sync::atomic::{AtomicI64, Ordering};

/// MCP protocol version spoken to peers
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Strictly monotonic request id generator. Ids are integers starting at 1.
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicI64,
}

impl IdGenerator {
    /// Create a generator whose first id is 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: AtomicI64::new(1),
        }
    }

    /// Allocate the next id.
    pub fn next_id(&self) -> RequestId {
        RequestId::Number(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_start_at_one_and_increase() {
        let generator = IdGenerator::new();
        assert_eq!(generator.next_id(), RequestId::Number(1));
        assert_eq!(generator.next_id(), RequestId::Number(2));
        assert_eq!(generator.next_id(), RequestId::Number(3));
    }
}
