//! Peer manager - named registry of peer sessions with health monitoring.
//!
//! Holds the configured descriptors and the live session map. Sessions are
//! installed only after a successful handshake; a failed dial or initialize
//! leaves no session behind. The health monitor reconnects dead auto-start
//! peers on a fixed interval. All transitions go through the manager or an
//! explicit teardown; receive loops never touch the session map.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::PeerClient;
use crate::config::{HealthCheckConfig, PeerConfig, PeerTransportConfig};
use crate::protocol::{ClientCapabilities, Info, Resource, ServerCapabilities, Tool, ToolsCallResult};
use crate::transport::{SocketTransport, StdioTransport, Transport};
use crate::{Error, Result};

/// Snapshot of one configured peer.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PeerStatus {
    /// Peer name
    pub name: String,
    /// Descriptor description
    pub description: String,
    /// Transport type name
    pub transport: String,
    /// Whether the descriptor is enabled
    pub enabled: bool,
    /// Whether the peer reconnects automatically
    pub auto_start: bool,
    /// Transport liveness
    pub connected: bool,
    /// Handshake complete
    pub ready: bool,
    /// Server identity, when ready
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_info: Option<Info>,
    /// Server capabilities, when ready
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_capabilities: Option<ServerCapabilities>,
}

/// Named peer registry.
pub struct PeerManager {
    descriptors: HashMap<String, PeerConfig>,
    sessions: DashMap<String, Arc<PeerClient>>,
    health: HealthCheckConfig,
}

impl PeerManager {
    /// Create a manager over the configured descriptors.
    #[must_use]
    pub fn new(descriptors: HashMap<String, PeerConfig>, health: HealthCheckConfig) -> Arc<Self> {
        Arc::new(Self {
            descriptors,
            sessions: DashMap::new(),
            health,
        })
    }

    /// Auto-connect enabled auto-start peers and spawn the health monitor.
    pub fn start(self: &Arc<Self>, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        for (name, descriptor) in &self.descriptors {
            if descriptor.enabled && descriptor.auto_start {
                let manager = Arc::clone(self);
                let name = name.clone();
                tokio::spawn(async move {
                    if let Err(e) = manager.connect(&name).await {
                        warn!(peer = %name, error = %e, "Auto-start connect failed");
                    }
                });
            }
        }

        if !self.health.enabled {
            return;
        }
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(manager.health.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => manager.health_scan().await,
                    _ = shutdown.recv() => {
                        debug!("Health monitor shutting down");
                        break;
                    }
                }
            }
        });
    }

    /// One health pass: reconnect dead auto-start peers.
    async fn health_scan(self: &Arc<Self>) {
        for (name, descriptor) in &self.descriptors {
            if !descriptor.enabled || !descriptor.auto_start {
                continue;
            }
            let alive = self
                .sessions
                .get(name)
                .is_some_and(|session| session.is_connected());
            if alive {
                continue;
            }
            debug!(peer = %name, "Health monitor reconnecting");
            match tokio::time::timeout(self.health.timeout, self.connect(name)).await {
                Ok(Ok(())) => info!(peer = %name, "Reconnected"),
                Ok(Err(e)) => warn!(peer = %name, error = %e, "Reconnect failed"),
                Err(_) => warn!(peer = %name, "Reconnect timed out"),
            }
        }
    }

    /// Connect a configured peer and install its session.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` for unknown names, `Error::PeerUnavailable` for
    /// disabled descriptors, plus transport and handshake failures. On any
    /// failure no session is installed.
    pub async fn connect(&self, name: &str) -> Result<()> {
        let descriptor = self
            .descriptors
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("peer {name}")))?;
        if !descriptor.enabled {
            return Err(Error::PeerUnavailable(format!("{name} is disabled")));
        }

        if let Some(existing) = self.sessions.get(name) {
            if existing.is_ready() {
                return Ok(());
            }
        }
        // Replace any dead session
        if let Some((_, stale)) = self.sessions.remove(name) {
            stale.close().await;
        }

        let transport = self.dial(name, descriptor).await?;
        let client = PeerClient::new(
            name,
            transport,
            ClientCapabilities::default(),
            Some(descriptor.timeout),
        );
        client.connect().await?;

        info!(peer = %name, transport = %descriptor.transport.transport_type(), "Peer connected");
        self.sessions.insert(name.to_string(), client);
        Ok(())
    }

    /// Dial the descriptor's transport, honoring its retry hints.
    async fn dial(&self, name: &str, descriptor: &PeerConfig) -> Result<Arc<dyn Transport>> {
        let attempts = descriptor.retry_count.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.dial_once(descriptor).await {
                Ok(transport) => return Ok(transport),
                Err(e) => {
                    debug!(peer = %name, attempt, error = %e, "Dial attempt failed");
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(descriptor.retry_delay).await;
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| Error::Transport(format!("dial {name} failed"))))
    }

    async fn dial_once(&self, descriptor: &PeerConfig) -> Result<Arc<dyn Transport>> {
        let transport: Arc<dyn Transport> = match &descriptor.transport {
            PeerTransportConfig::Stdio { command, cwd } => {
                StdioTransport::spawn(command, &descriptor.environment, cwd.as_deref())?
            }
            PeerTransportConfig::Tcp { address } => SocketTransport::connect_tcp(address).await?,
            #[cfg(unix)]
            PeerTransportConfig::Unix { path } => SocketTransport::connect_unix(path).await?,
            #[cfg(not(unix))]
            PeerTransportConfig::Unix { .. } => {
                return Err(Error::Config(
                    "unix transport is not supported on this platform".to_string(),
                ));
            }
        };
        Ok(transport)
    }

    /// Disconnect a peer and remove its session.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` when no session exists.
    pub async fn disconnect(&self, name: &str) -> Result<()> {
        let Some((_, session)) = self.sessions.remove(name) else {
            return Err(Error::NotFound(format!("peer {name}")));
        };
        session.close().await;
        info!(peer = %name, "Peer disconnected");
        Ok(())
    }

    /// Fetch a ready session.
    ///
    /// # Errors
    ///
    /// `Error::PeerUnavailable` when the peer is unknown, disconnected, or
    /// not yet initialized.
    pub fn client(&self, name: &str) -> Result<Arc<PeerClient>> {
        let session = self
            .sessions
            .get(name)
            .ok_or_else(|| Error::PeerUnavailable(name.to_string()))?;
        if !session.is_ready() {
            return Err(Error::PeerUnavailable(name.to_string()));
        }
        Ok(Arc::clone(&session))
    }

    /// Register an externally constructed session (in-process peers, tests).
    /// The session must already be ready.
    pub fn install(&self, client: Arc<PeerClient>) {
        self.sessions.insert(client.name().to_string(), client);
    }

    /// Aggregate resources across ready peers. Per-peer failures are logged
    /// and that peer's entry omitted.
    pub async fn list_resources(&self) -> HashMap<String, Vec<Resource>> {
        let mut aggregated = HashMap::new();
        for session in self.ready_sessions() {
            match session.list_resources().await {
                Ok(resources) => {
                    aggregated.insert(session.name().to_string(), resources);
                }
                Err(e) => {
                    warn!(peer = %session.name(), error = %e, "resources/list failed - omitting peer");
                }
            }
        }
        aggregated
    }

    /// Aggregate tools across ready peers. Per-peer failures are logged and
    /// that peer's entry omitted.
    pub async fn list_tools(&self) -> HashMap<String, Vec<Tool>> {
        let mut aggregated = HashMap::new();
        for session in self.ready_sessions() {
            match session.list_tools().await {
                Ok(tools) => {
                    aggregated.insert(session.name().to_string(), tools);
                }
                Err(e) => {
                    warn!(peer = %session.name(), error = %e, "tools/list failed - omitting peer");
                }
            }
        }
        aggregated
    }

    /// Invoke a tool on a named peer.
    ///
    /// # Errors
    ///
    /// `Error::PeerUnavailable` plus any request failure.
    pub async fn call_tool(
        &self,
        peer: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<ToolsCallResult> {
        self.client(peer)?.call_tool(tool, arguments).await
    }

    /// Status snapshot of every configured peer.
    #[must_use]
    pub fn status(&self) -> Vec<PeerStatus> {
        let mut statuses: Vec<PeerStatus> = self
            .descriptors
            .iter()
            .map(|(name, descriptor)| {
                let session = self.sessions.get(name);
                let (connected, ready, server_info, server_capabilities) = session.map_or(
                    (false, false, None, None),
                    |s| {
                        (
                            s.is_connected(),
                            s.is_ready(),
                            s.server_info(),
                            s.server_capabilities(),
                        )
                    },
                );
                PeerStatus {
                    name: name.clone(),
                    description: descriptor.description.clone(),
                    transport: descriptor.transport.transport_type().to_string(),
                    enabled: descriptor.enabled,
                    auto_start: descriptor.auto_start,
                    connected,
                    ready,
                    server_info,
                    server_capabilities,
                }
            })
            .collect();

        // Installed sessions without a descriptor (in-process peers) still show up
        for session in &self.sessions {
            if !self.descriptors.contains_key(session.key()) {
                statuses.push(PeerStatus {
                    name: session.key().clone(),
                    description: String::new(),
                    transport: "inproc".to_string(),
                    enabled: true,
                    auto_start: false,
                    connected: session.is_connected(),
                    ready: session.is_ready(),
                    server_info: session.server_info(),
                    server_capabilities: session.server_capabilities(),
                });
            }
        }
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Close every session (shutdown path).
    pub async fn stop_all(&self) {
        let names: Vec<String> = self.sessions.iter().map(|s| s.key().clone()).collect();
        for name in names {
            if let Some((_, session)) = self.sessions.remove(&name) {
                session.close().await;
            }
        }
    }

    fn ready_sessions(&self) -> Vec<Arc<PeerClient>> {
        self.sessions
            .iter()
            .filter(|s| s.is_ready())
            .map(|s| Arc::clone(&s))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HealthCheckConfig;
    use std::time::Duration;

    fn manager_with(descriptors: HashMap<String, PeerConfig>) -> Arc<PeerManager> {
        PeerManager::new(descriptors, HealthCheckConfig::default())
    }

    #[tokio::test]
    async fn connect_unknown_peer_is_not_found() {
        let manager = manager_with(HashMap::new());
        let err = manager.connect("ghost").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn connect_disabled_peer_is_unavailable() {
        let mut descriptors = HashMap::new();
        descriptors.insert(
            "off".to_string(),
            PeerConfig {
                enabled: false,
                ..PeerConfig::default()
            },
        );
        let manager = manager_with(descriptors);
        let err = manager.connect("off").await.unwrap_err();
        assert!(matches!(err, Error::PeerUnavailable(_)));
    }

    #[tokio::test]
    async fn failed_dial_installs_no_session() {
        let mut descriptors = HashMap::new();
        descriptors.insert(
            "dead".to_string(),
            PeerConfig {
                transport: PeerTransportConfig::Tcp {
                    address: "127.0.0.1:1".to_string(),
                },
                retry_count: 2,
                retry_delay: Duration::from_millis(10),
                ..PeerConfig::default()
            },
        );
        let manager = manager_with(descriptors);
        assert!(manager.connect("dead").await.is_err());
        assert!(manager.client("dead").is_err());
        assert_eq!(manager.sessions.len(), 0);
    }

    #[tokio::test]
    async fn disconnect_without_session_is_not_found() {
        let manager = manager_with(HashMap::new());
        assert!(matches!(
            manager.disconnect("ghost").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn status_reports_configured_but_unconnected_peers() {
        let mut descriptors = HashMap::new();
        descriptors.insert(
            "search".to_string(),
            PeerConfig {
                description: "search peer".to_string(),
                ..PeerConfig::default()
            },
        );
        let manager = manager_with(descriptors);
        let statuses = manager.status();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].name, "search");
        assert!(!statuses[0].connected);
        assert!(!statuses[0].ready);
    }
}
