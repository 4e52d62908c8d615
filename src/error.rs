//! Error types for gadgetd

use std::io;

use thiserror::Error;

/// Result type alias for gadgetd
pub type Result<T> = std::result::Result<T, Error>;

/// Reason a sandbox operation was denied.
///
/// The variant names are machine-stable: they are returned verbatim in the
/// `reason` field of HTTP 400 responses and in audit records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxDenial {
    /// Path contains a parent-directory marker (`..`)
    Traversal,
    /// Path resolves outside every configured base root
    OutsideBase,
    /// Path matches a deny-list entry
    Denied,
    /// File extension is not in the configured allow-list
    ExtensionNotAllowed,
    /// File or payload exceeds the configured size cap
    TooLarge,
}

impl SandboxDenial {
    /// Stable reason string for responses and audit records
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Traversal => "traversal",
            Self::OutsideBase => "outside-base",
            Self::Denied => "denied",
            Self::ExtensionNotAllowed => "extension-not-allowed",
            Self::TooLarge => "too-large",
        }
    }
}

impl std::fmt::Display for SandboxDenial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// gadgetd errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Missing credentials on a protected route
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Credentials present but invalid (bad signature, expired, wrong issuer)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Policy denied the request
    #[error("Forbidden: {object}:{action}")]
    Forbidden {
        /// Object the rule was checked against
        object: String,
        /// Action the rule was checked against
        action: String,
    },

    /// Input failed validation before any side effect
    #[error("Validation error: {0}")]
    Validation(String),

    /// Sandbox policy denied a filesystem operation
    #[error("Sandbox denied ({reason}): {message}")]
    Sandbox {
        /// Machine-stable denial reason
        reason: SandboxDenial,
        /// Short human detail
        message: String,
    },

    /// Policy store rule already exists
    #[error("Rule already exists: ({0}, {1}, {2})")]
    RuleExists(String, String, String),

    /// Policy store rule or grant not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Gadget subprocess failed
    #[error("Gadget execution failed: {0}")]
    Gadget(String),

    /// Peer not configured or not connected
    #[error("Peer unavailable: {0}")]
    PeerUnavailable(String),

    /// Peer request timed out
    #[error("Peer timeout: {0}")]
    PeerTimeout(String),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Protocol error (handshake, framing, version)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// JSON-RPC error returned by a peer
    #[error("JSON-RPC error {code}: {message}")]
    JsonRpc {
        /// Error code
        code: i32,
        /// Error message
        message: String,
        /// Optional data
        data: Option<serde_json::Value>,
    },

    /// Operation cancelled (shutdown or peer close)
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a JSON-RPC error
    pub fn json_rpc(code: i32, message: impl Into<String>) -> Self {
        Self::JsonRpc {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Create a sandbox denial
    pub fn sandbox(reason: SandboxDenial, message: impl Into<String>) -> Self {
        Self::Sandbox {
            reason,
            message: message.into(),
        }
    }

    /// Convert to JSON-RPC error code
    #[must_use]
    pub fn to_rpc_code(&self) -> i32 {
        match self {
            Self::JsonRpc { code, .. } => *code,
            Self::Json(_) => rpc_codes::PARSE_ERROR,
            Self::Protocol(_) => rpc_codes::INVALID_REQUEST,
            Self::PeerUnavailable(_) => rpc_codes::PEER_UNAVAILABLE,
            Self::PeerTimeout(_) | Self::Transport(_) => rpc_codes::SERVER_ERROR_START,
            _ => rpc_codes::INTERNAL_ERROR,
        }
    }
}

/// Standard and extension JSON-RPC error codes
pub mod rpc_codes {
    /// Parse error - Invalid JSON
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid Request - Not a valid Request object
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid params
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Server error range start
    pub const SERVER_ERROR_START: i32 = -32000;
    /// Server error range end
    pub const SERVER_ERROR_END: i32 = -32099;
    /// Peer is configured but not connected
    pub const PEER_UNAVAILABLE: i32 = -32001;
    /// Requested resource does not exist on the peer
    pub const UNKNOWN_RESOURCE: i32 = -32002;
    /// Requested tool does not exist on the peer
    pub const UNKNOWN_TOOL: i32 = -32003;
    /// Requested prompt does not exist on the peer
    pub const UNKNOWN_PROMPT: i32 = -32004;
    /// Protocol version negotiation failed
    pub const VERSION_MISMATCH: i32 = -32005;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandbox_denial_strings_are_stable() {
        assert_eq!(SandboxDenial::Traversal.as_str(), "traversal");
        assert_eq!(SandboxDenial::OutsideBase.as_str(), "outside-base");
        assert_eq!(SandboxDenial::Denied.as_str(), "denied");
        assert_eq!(
            SandboxDenial::ExtensionNotAllowed.as_str(),
            "extension-not-allowed"
        );
        assert_eq!(SandboxDenial::TooLarge.as_str(), "too-large");
    }

    #[test]
    fn rpc_code_mapping() {
        assert_eq!(
            Error::Protocol("bad".into()).to_rpc_code(),
            rpc_codes::INVALID_REQUEST
        );
        assert_eq!(
            Error::PeerUnavailable("x".into()).to_rpc_code(),
            rpc_codes::PEER_UNAVAILABLE
        );
        assert_eq!(Error::json_rpc(-32005, "v").to_rpc_code(), -32005);
        assert_eq!(
            Error::Internal("boom".into()).to_rpc_code(),
            rpc_codes::INTERNAL_ERROR
        );
    }
}
