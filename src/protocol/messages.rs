//! JSON-RPC 2.0 message types
//!
//! A wire frame is exactly one of request (`id` + `method`), notification
//! (`method`, no `id`) or response (`id` + exactly one of `result`/`error`).
//! [`JsonRpcMessage::validate`] enforces the version and shape rules.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ClientCapabilities, Content, Info, Prompt, PromptMessage, Resource,
    ResourceContents, ServerCapabilities, Tool};
use crate::{Error, Result};

/// JSON-RPC version string
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,
    /// Request ID
    pub id: RequestId,
    /// Method name
    pub method: String,
    /// Parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a request
    #[must_use]
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC notification (no id)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,
    /// Method name
    pub method: String,
    /// Parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Create a notification
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,
    /// Request ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    /// Result (on success)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error (on failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Create a success response
    #[must_use]
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: Option<RequestId>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Create an error response with data
    pub fn error_with_data(
        id: Option<RequestId>,
        code: i32,
        message: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: Some(data),
            }),
        }
    }
}

/// JSON-RPC error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code
    pub code: i32,
    /// Error message
    pub message: String,
    /// Optional error data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Request ID (integer or string)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// String ID
    String(String),
    /// Numeric ID
    Number(i64),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

/// Generic JSON-RPC message (request, notification, or response)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    /// Request
    Request(JsonRpcRequest),
    /// Notification
    Notification(JsonRpcNotification),
    /// Response
    Response(JsonRpcResponse),
}

impl JsonRpcMessage {
    /// Check if this is a request
    #[must_use]
    pub fn is_request(&self) -> bool {
        matches!(self, Self::Request(_))
    }

    /// Check if this is a notification
    #[must_use]
    pub fn is_notification(&self) -> bool {
        matches!(self, Self::Notification(_))
    }

    /// Check if this is a response
    #[must_use]
    pub fn is_response(&self) -> bool {
        matches!(self, Self::Response(_))
    }

    /// Get the method name (for requests and notifications)
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(r) => Some(&r.method),
            Self::Notification(n) => Some(&n.method),
            Self::Response(_) => None,
        }
    }

    /// Validate version and shape rules.
    ///
    /// # Errors
    ///
    /// `Error::Protocol` when the version is not "2.0", a request or
    /// notification has an empty method, or a response does not carry
    /// exactly one of `result`/`error`.
    pub fn validate(&self) -> Result<()> {
        let version = match self {
            Self::Request(r) => &r.jsonrpc,
            Self::Notification(n) => &n.jsonrpc,
            Self::Response(r) => &r.jsonrpc,
        };
        if version != JSONRPC_VERSION {
            return Err(Error::Protocol(format!(
                "unsupported jsonrpc version: {version}"
            )));
        }

        match self {
            Self::Request(r) if r.method.is_empty() => {
                Err(Error::Protocol("request method is empty".to_string()))
            }
            Self::Notification(n) if n.method.is_empty() => {
                Err(Error::Protocol("notification method is empty".to_string()))
            }
            Self::Response(r) => match (&r.result, &r.error) {
                (Some(_), None) | (None, Some(_)) => Ok(()),
                (Some(_), Some(_)) => Err(Error::Protocol(
                    "response carries both result and error".to_string(),
                )),
                (None, None) => Err(Error::Protocol(
                    "response carries neither result nor error".to_string(),
                )),
            },
            _ => Ok(()),
        }
    }
}

// ============================================================================
// Initialize
// ============================================================================

/// Initialize request params
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeParams {
    /// Protocol version
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Client capabilities
    pub capabilities: ClientCapabilities,
    /// Client info
    #[serde(rename = "clientInfo")]
    pub client_info: Info,
}

/// Initialize result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    /// Protocol version
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Server capabilities
    pub capabilities: ServerCapabilities,
    /// Server info
    #[serde(rename = "serverInfo")]
    pub server_info: Info,
}

// ============================================================================
// Tools
// ============================================================================

/// Tools list result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsListResult {
    /// List of tools
    pub tools: Vec<Tool>,
}

/// Tools call request params
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsCallParams {
    /// Tool name
    pub name: String,
    /// Tool arguments
    #[serde(default)]
    pub arguments: Value,
}

/// Tools call result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsCallResult {
    /// Content items
    pub content: Vec<Content>,
    /// Whether result is an error
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

// ============================================================================
// Resources
// ============================================================================

/// Resources list result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesListResult {
    /// List of resources
    pub resources: Vec<Resource>,
}

/// Resources read request params
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesReadParams {
    /// URI of the resource to read
    pub uri: String,
}

/// Resources read result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesReadResult {
    /// Resource contents
    pub contents: Vec<ResourceContents>,
}

// ============================================================================
// Prompts
// ============================================================================

/// Prompts list result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptsListResult {
    /// List of prompts
    pub prompts: Vec<Prompt>,
}

/// Prompts get request params
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptsGetParams {
    /// Prompt name
    pub name: String,
    /// Prompt arguments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<std::collections::HashMap<String, String>>,
}

/// Prompts get result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptsGetResult {
    /// Prompt description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Prompt messages
    pub messages: Vec<PromptMessage>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ── classification ────────────────────────────────────────────────

    #[test]
    fn request_classifies_as_request() {
        let msg: JsonRpcMessage = serde_json::from_value(json!({
            "jsonrpc": "2.0", "id": 1, "method": "tools/list"
        }))
        .unwrap();
        assert!(msg.is_request());
        assert_eq!(msg.method(), Some("tools/list"));
    }

    #[test]
    fn notification_classifies_without_id() {
        let msg: JsonRpcMessage = serde_json::from_value(json!({
            "jsonrpc": "2.0", "method": "notifications/initialized"
        }))
        .unwrap();
        assert!(msg.is_notification());
    }

    #[test]
    fn response_classifies_with_result() {
        let msg: JsonRpcMessage = serde_json::from_value(json!({
            "jsonrpc": "2.0", "id": 7, "result": {"tools": []}
        }))
        .unwrap();
        assert!(msg.is_response());
        assert_eq!(msg.method(), None);
    }

    // ── validation ────────────────────────────────────────────────────

    #[test]
    fn validate_accepts_all_three_shapes() {
        let request =
            JsonRpcMessage::Request(JsonRpcRequest::new(RequestId::Number(1), "ping", None));
        let notification =
            JsonRpcMessage::Notification(JsonRpcNotification::new("notifications/initialized", None));
        let response =
            JsonRpcMessage::Response(JsonRpcResponse::success(RequestId::Number(1), json!({})));
        assert!(request.validate().is_ok());
        assert!(notification.validate().is_ok());
        assert!(response.validate().is_ok());
    }

    #[test]
    fn validate_rejects_wrong_version() {
        let mut request = JsonRpcRequest::new(RequestId::Number(1), "ping", None);
        request.jsonrpc = "1.0".to_string();
        assert!(JsonRpcMessage::Request(request).validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_method() {
        let request = JsonRpcRequest::new(RequestId::Number(1), "", None);
        assert!(JsonRpcMessage::Request(request).validate().is_err());
    }

    #[test]
    fn validate_rejects_response_with_both_result_and_error() {
        let response = JsonRpcResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(RequestId::Number(1)),
            result: Some(json!({})),
            error: Some(JsonRpcError {
                code: -32603,
                message: "oops".to_string(),
                data: None,
            }),
        };
        assert!(JsonRpcMessage::Response(response).validate().is_err());
    }

    #[test]
    fn validate_rejects_response_with_neither() {
        let response = JsonRpcResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(RequestId::Number(1)),
            result: None,
            error: None,
        };
        assert!(JsonRpcMessage::Response(response).validate().is_err());
    }

    // ── encode/decode identity ────────────────────────────────────────

    #[test]
    fn encode_decode_is_identity_on_valid_frames() {
        let frames = vec![
            JsonRpcMessage::Request(JsonRpcRequest::new(
                RequestId::Number(42),
                "tools/call",
                Some(json!({"name": "echo", "arguments": {"x": 1}})),
            )),
            JsonRpcMessage::Notification(JsonRpcNotification::new(
                "notifications/tools/list_changed",
                None,
            )),
            JsonRpcMessage::Response(JsonRpcResponse::error(
                Some(RequestId::String("req-9".to_string())),
                -32601,
                "Method not found",
            )),
        ];
        for frame in frames {
            let encoded = serde_json::to_string(&frame).unwrap();
            let decoded: JsonRpcMessage = serde_json::from_str(&encoded).unwrap();
            let re_encoded = serde_json::to_string(&decoded).unwrap();
            assert_eq!(encoded, re_encoded);
            decoded.validate().unwrap();
        }
    }

    // ── helpers ───────────────────────────────────────────────────────

    #[test]
    fn response_helpers_set_exactly_one_side() {
        let ok = JsonRpcResponse::success(RequestId::Number(1), json!({"ok": true}));
        assert!(ok.result.is_some() && ok.error.is_none());

        let err = JsonRpcResponse::error(Some(RequestId::Number(2)), -32602, "Invalid params");
        assert!(err.result.is_none());
        assert_eq!(err.error.as_ref().unwrap().code, -32602);

        let with_data = JsonRpcResponse::error_with_data(
            None,
            -32005,
            "Version mismatch",
            json!({"expected": "2024-11-05"}),
        );
        assert_eq!(
            with_data.error.unwrap().data.unwrap()["expected"],
            "2024-11-05"
        );
    }

    #[test]
    fn request_id_display() {
        assert_eq!(RequestId::Number(42).to_string(), "42");
        assert_eq!(RequestId::String("abc".to_string()).to_string(), "abc");
    }

    #[test]
    fn initialize_params_use_camel_case() {
        let params = InitializeParams {
            protocol_version: "2024-11-05".to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: Info {
                name: "gadgetd".to_string(),
                version: "0.4.2".to_string(),
            },
        };
        let value = serde_json::to_value(&params).unwrap();
        assert!(value.get("protocolVersion").is_some());
        assert!(value.get("clientInfo").is_some());
    }
}
