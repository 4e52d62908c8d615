//! Server assembly and lifecycle

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::router::{AppState, create_router};
use crate::auth::{TokenMinter, UserTable};
use crate::config::{Config, expand_tilde};
use crate::gadget::GadgetRunner;
use crate::peer::PeerManager;
use crate::rbac::PolicyStore;
use crate::sandbox::{Sandbox, SandboxPolicy};
use crate::{Error, Result};

/// gadgetd HTTP server
pub struct Server {
    config: Config,
}

impl Server {
    /// Create a server over the loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns an error for an unusable configuration.
    pub fn new(config: Config) -> Result<Self> {
        if config.sandbox.base_roots.is_empty() {
            return Err(Error::Config(
                "sandbox.base_roots must name at least one root".to_string(),
            ));
        }
        Ok(Self { config })
    }

    /// Build the shared application state: open and seed the policy store,
    /// resolve the token secret, construct sandbox, runner and peer manager.
    ///
    /// # Errors
    ///
    /// Fails when the policy store cannot be opened or seeded.
    pub fn build_state(config: &Config) -> Result<Arc<AppState>> {
        let secret = config.auth.resolve_secret();
        let minter = TokenMinter::new(&secret, &config.auth.issuer, config.auth.token_ttl);
        let users = UserTable::from_config(&config.auth.users);

        let store_path = expand_tilde(&config.rbac.store_path.to_string_lossy());
        let store = Arc::new(PolicyStore::open(store_path)?);
        store.seed_defaults()?;

        let sandbox = Sandbox::new(SandboxPolicy::from_config(&config.sandbox));
        let gadgets = GadgetRunner::from_config(&config.gadgets);
        let peers = PeerManager::new(config.peers.clone(), config.health_check.clone());

        Ok(Arc::new(AppState {
            minter,
            users,
            store,
            sandbox,
            gadgets,
            peers,
            request_timeout: config.server.request_timeout,
        }))
    }

    /// Run until a shutdown signal arrives.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot bind or an unrecoverable
    /// runtime error occurs.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let state = Self::build_state(&self.config)?;

        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
        state.peers.start(shutdown_tx.subscribe());

        let app = create_router(Arc::clone(&state));
        let listener = TcpListener::bind(addr).await?;

        info!(
            host = %self.config.server.host,
            port = self.config.server.port,
            peers = self.config.peers.len(),
            policy_store = %state.store.path().display(),
            "gadgetd listening"
        );
        if self.config.auth.users.is_empty() {
            warn!("Serving with DEFAULT credentials - configure auth.users for production");
        }

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .map_err(|e| Error::Internal(e.to_string()))?;

        info!("Shutting down peers...");
        state.peers.stop_all().await;

        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
