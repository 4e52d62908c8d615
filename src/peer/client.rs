//! Peer client - one JSON-RPC session over a connected transport.
//!
//! A single receive-loop task owns the inbound side of the transport and
//! routes frames: responses are matched to waiters through the pending table
//! (`request id -> one-shot channel`), `list_changed` notifications trigger a
//! background re-fetch, and inbound requests from the peer are refused with
//! method-not-found. The session is `ready` once the transport is up and the
//! `initialize` handshake has completed with a matching protocol version.
//!
//! Every pending entry is removed on exactly one of: the matched response,
//! the request timeout, or cancellation. `close` drains the table so no
//! waiter is left behind.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::rpc_codes;
use crate::protocol::{
    ClientCapabilities, IdGenerator, Info, InitializeParams, InitializeResult, JsonRpcMessage,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION, Prompt,
    PromptsGetParams, PromptsGetResult, PromptsListResult, Resource, ResourcesListResult,
    ResourcesReadParams, ResourcesReadResult, ServerCapabilities, Tool, ToolsCallParams,
    ToolsCallResult, ToolsListResult,
};
use crate::transport::Transport;
use crate::{Error, Result};

/// Default per-request timeout
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// JSON-RPC client session for one MCP peer
pub struct PeerClient {
    name: String,
    transport: Arc<dyn Transport>,
    pending: DashMap<String, oneshot::Sender<JsonRpcResponse>>,
    ids: IdGenerator,
    connected: AtomicBool,
    initialized: AtomicBool,
    cancel: CancellationToken,
    request_timeout: Duration,
    client_info: Info,
    capabilities: ClientCapabilities,
    server_info: RwLock<Option<Info>>,
    server_capabilities: RwLock<Option<ServerCapabilities>>,
}

impl PeerClient {
    /// Construct a client over an already-connected transport.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        transport: Arc<dyn Transport>,
        capabilities: ClientCapabilities,
        request_timeout: Option<Duration>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            transport,
            pending: DashMap::new(),
            ids: IdGenerator::new(),
            connected: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            request_timeout: request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            client_info: Info {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            capabilities,
            server_info: RwLock::new(None),
            server_capabilities: RwLock::new(None),
        })
    }

    /// Peer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Negotiated server identity, present once ready.
    #[must_use]
    pub fn server_info(&self) -> Option<Info> {
        self.server_info.read().clone()
    }

    /// Negotiated server capabilities, present once ready.
    #[must_use]
    pub fn server_capabilities(&self) -> Option<ServerCapabilities> {
        self.server_capabilities.read().clone()
    }

    /// Transport liveness.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed) && self.transport.is_connected()
    }

    /// Connected and handshake complete.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.is_connected() && self.initialized.load(Ordering::Relaxed)
    }

    /// Start the receive loop and perform the `initialize` handshake.
    ///
    /// On any handshake failure (request error, version mismatch, transport
    /// death) the transport is closed and the error returned; the session
    /// must be discarded.
    ///
    /// # Errors
    ///
    /// Transport, protocol, and version-mismatch errors.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        if !self.transport.is_connected() {
            return Err(Error::Transport("Transport is not connected".to_string()));
        }
        self.connected.store(true, Ordering::Relaxed);
        self.spawn_receive_loop();

        match self.initialize().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.close().await;
                Err(e)
            }
        }
    }

    async fn initialize(self: &Arc<Self>) -> Result<()> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: self.capabilities.clone(),
            client_info: self.client_info.clone(),
        };
        let response = self
            .send_request("initialize", Some(serde_json::to_value(params)?))
            .await?;

        let result: InitializeResult = parse_result(response)?;
        if result.protocol_version != PROTOCOL_VERSION {
            return Err(Error::json_rpc(
                rpc_codes::VERSION_MISMATCH,
                format!(
                    "peer speaks {}, expected {}",
                    result.protocol_version, PROTOCOL_VERSION
                ),
            ));
        }

        *self.server_info.write() = Some(result.server_info);
        *self.server_capabilities.write() = Some(result.capabilities);

        self.transport
            .send(&JsonRpcMessage::Notification(JsonRpcNotification::new(
                "notifications/initialized",
                None,
            )))
            .await?;

        self.initialized.store(true, Ordering::Relaxed);
        debug!(peer = %self.name, "Peer session ready");
        Ok(())
    }

    fn spawn_receive_loop(self: &Arc<Self>) {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            debug!(peer = %client.name, "Receive loop started");
            loop {
                tokio::select! {
                    () = client.cancel.cancelled() => break,
                    frame = client.transport.receive() => match frame {
                        Ok(message) => client.handle_frame(message).await,
                        Err(e) => {
                            debug!(peer = %client.name, error = %e, "Receive loop ending");
                            break;
                        }
                    }
                }
            }
            client.connected.store(false, Ordering::Relaxed);
            client.initialized.store(false, Ordering::Relaxed);
            client.drain_pending();
            debug!(peer = %client.name, "Receive loop ended");
        });
    }

    async fn handle_frame(self: &Arc<Self>, message: JsonRpcMessage) {
        match message {
            JsonRpcMessage::Response(response) => {
                let Some(ref id) = response.id else {
                    warn!(peer = %self.name, "Dropping response without id");
                    return;
                };
                let key = id.to_string();
                if let Some((_, sender)) = self.pending.remove(&key) {
                    let _ = sender.send(response);
                } else {
                    warn!(peer = %self.name, id = %key, "Dropping response with no pending request");
                }
            }
            JsonRpcMessage::Notification(notification) => {
                self.handle_notification(&notification);
            }
            JsonRpcMessage::Request(request) => {
                // Peers may not call us; refuse politely.
                let refusal = JsonRpcMessage::Response(JsonRpcResponse::error(
                    Some(request.id.clone()),
                    rpc_codes::METHOD_NOT_FOUND,
                    format!("client does not serve requests: {}", request.method),
                ));
                if let Err(e) = self.transport.send(&refusal).await {
                    warn!(peer = %self.name, error = %e, "Failed to refuse inbound request");
                }
            }
        }
    }

    /// Dispatch a notification. `list_changed` notifications trigger a
    /// background re-fetch so the receive loop never blocks beyond O(1).
    fn handle_notification(self: &Arc<Self>, notification: &JsonRpcNotification) {
        let refetch: Option<&'static str> = match notification.method.as_str() {
            "notifications/resources/list_changed" => Some("resources/list"),
            "notifications/tools/list_changed" => Some("tools/list"),
            "notifications/prompts/list_changed" => Some("prompts/list"),
            other => {
                debug!(peer = %self.name, method = %other, "Ignoring notification");
                None
            }
        };
        if let Some(method) = refetch {
            let client = Arc::clone(self);
            tokio::spawn(async move {
                match client.send_request(method, None).await {
                    Ok(_) => debug!(peer = %client.name, method = %method, "Re-fetched after list_changed"),
                    Err(e) => warn!(peer = %client.name, method = %method, error = %e, "Re-fetch failed"),
                }
            });
        }
    }

    /// Send a request and await its correlated response.
    ///
    /// The pending entry is removed on every exit: matched response, request
    /// timeout, or cancellation.
    ///
    /// # Errors
    ///
    /// Transport failures, `Error::PeerTimeout`, `Error::Cancelled`, and
    /// JSON-RPC errors returned by the peer.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse> {
        let id = self.ids.next_id();
        let key = id.to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(key.clone(), tx);

        let frame = JsonRpcMessage::Request(JsonRpcRequest::new(id, method, params));
        if let Err(e) = self.transport.send(&frame).await {
            self.pending.remove(&key);
            return Err(e);
        }

        let outcome = tokio::select! {
            response = rx => match response {
                Ok(response) => Ok(response),
                Err(_) => Err(Error::Cancelled(format!("peer {} closed", self.name))),
            },
            () = self.cancel.cancelled() => {
                Err(Error::Cancelled(format!("peer {} closed", self.name)))
            }
            () = tokio::time::sleep(self.request_timeout) => {
                Err(Error::PeerTimeout(format!(
                    "{method} to {} timed out after {:?}",
                    self.name, self.request_timeout
                )))
            }
        };
        self.pending.remove(&key);

        let response = outcome?;
        if let Some(error) = response.error {
            return Err(Error::JsonRpc {
                code: error.code,
                message: error.message,
                data: error.data,
            });
        }
        Ok(response)
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(Error::PeerUnavailable(self.name.clone()))
        }
    }

    /// List the peer's resources.
    pub async fn list_resources(&self) -> Result<Vec<Resource>> {
        self.ensure_ready()?;
        let response = self.send_request("resources/list", None).await?;
        let result: ResourcesListResult = parse_result(response)?;
        Ok(result.resources)
    }

    /// Read one resource by URI.
    pub async fn read_resource(&self, uri: &str) -> Result<ResourcesReadResult> {
        self.ensure_ready()?;
        let params = ResourcesReadParams {
            uri: uri.to_string(),
        };
        let response = self
            .send_request("resources/read", Some(serde_json::to_value(params)?))
            .await?;
        parse_result(response)
    }

    /// List the peer's tools.
    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        self.ensure_ready()?;
        let response = self.send_request("tools/list", None).await?;
        let result: ToolsListResult = parse_result(response)?;
        Ok(result.tools)
    }

    /// Invoke a tool.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolsCallResult> {
        self.ensure_ready()?;
        let params = ToolsCallParams {
            name: name.to_string(),
            arguments,
        };
        let response = self
            .send_request("tools/call", Some(serde_json::to_value(params)?))
            .await?;
        parse_result(response)
    }

    /// List the peer's prompts.
    pub async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        self.ensure_ready()?;
        let response = self.send_request("prompts/list", None).await?;
        let result: PromptsListResult = parse_result(response)?;
        Ok(result.prompts)
    }

    /// Fetch one prompt.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<std::collections::HashMap<String, String>>,
    ) -> Result<PromptsGetResult> {
        self.ensure_ready()?;
        let params = PromptsGetParams {
            name: name.to_string(),
            arguments,
        };
        let response = self
            .send_request("prompts/get", Some(serde_json::to_value(params)?))
            .await?;
        parse_result(response)
    }

    /// Tear the session down: stop the receive loop, close the transport,
    /// and release every in-flight waiter with a cancellation error.
    pub async fn close(&self) {
        self.cancel.cancel();
        if let Err(e) = self.transport.close().await {
            debug!(peer = %self.name, error = %e, "Transport close reported an error");
        }
        self.drain_pending();
        self.connected.store(false, Ordering::Relaxed);
        self.initialized.store(false, Ordering::Relaxed);
    }

    /// Drop every pending sender; each waiter observes cancellation.
    fn drain_pending(&self) {
        let keys: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.pending.remove(&key);
        }
    }

    /// Number of in-flight requests (test hook).
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn parse_result<T: serde::de::DeserializeOwned>(response: JsonRpcResponse) -> Result<T> {
    let result = response
        .result
        .ok_or_else(|| Error::Protocol("response carried no result".to_string()))?;
    Ok(serde_json::from_value(result)?)
}
