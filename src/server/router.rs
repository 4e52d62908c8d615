//! HTTP router and shared application state

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
};
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::timeout::TimeoutLayer;

use super::middleware::{access_log_middleware, auth_middleware, request_id_middleware};
use super::{auth_api, fs_api, gadget_api, peer_api, rbac_api};
use crate::auth::{TokenMinter, UserTable};
use crate::gadget::GadgetRunner;
use crate::peer::PeerManager;
use crate::rbac::PolicyStore;
use crate::sandbox::Sandbox;

/// Shared application state
pub struct AppState {
    /// Token minter/verifier
    pub minter: TokenMinter,
    /// Configured user table
    pub users: UserTable,
    /// Persistent policy store
    pub store: Arc<PolicyStore>,
    /// Sandboxed filesystem
    pub sandbox: Sandbox,
    /// Gadget runner
    pub gadgets: GadgetRunner,
    /// Peer manager
    pub peers: Arc<PeerManager>,
    /// Per-request timeout
    pub request_timeout: std::time::Duration,
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let public = Router::new()
        .route("/health", get(health_handler))
        .route("/api/auth/login", post(auth_api::login));

    let protected = Router::new()
        .route("/api/auth/refresh", post(auth_api::refresh))
        // Self-service identity
        .route("/api/rbac/me", get(rbac_api::me))
        .route("/api/rbac/me/permissions", get(rbac_api::my_permissions))
        // Admin: user/role/permission management
        .route(
            "/api/rbac/users",
            get(rbac_api::list_users).post(rbac_api::grant_role),
        )
        .route("/api/rbac/users/{user}/roles", get(rbac_api::user_roles))
        .route(
            "/api/rbac/users/{user}/roles/{role}",
            delete(rbac_api::revoke_role),
        )
        .route("/api/rbac/roles", get(rbac_api::list_roles))
        .route(
            "/api/rbac/roles/{role}/permissions",
            get(rbac_api::role_permissions),
        )
        .route(
            "/api/rbac/permissions",
            post(rbac_api::add_permission).delete(rbac_api::remove_permission),
        )
        .route("/api/rbac/stats", get(rbac_api::stats))
        // Gadgets
        .route("/api/gadgets", get(gadget_api::list))
        .route("/api/gadgets/{name}/info", get(gadget_api::info))
        .route("/api/gadgets/{name}/execute", post(gadget_api::execute))
        // Sandboxed filesystem
        .route("/api/fs/list", get(fs_api::list))
        .route("/api/fs/read", get(fs_api::read))
        .route("/api/fs/write", post(fs_api::write))
        // Peers
        .route("/api/mcp/servers", get(peer_api::servers))
        .route("/api/mcp/servers/{name}/connect", post(peer_api::connect))
        .route("/api/mcp/servers/{name}", delete(peer_api::disconnect))
        .route("/api/mcp/resources", get(peer_api::resources))
        .route("/api/mcp/tools", get(peer_api::tools))
        .route("/api/mcp/tools/{server}/{tool}", post(peer_api::call_tool))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth_middleware,
        ));

    // Later layers wrap earlier ones. The correlation id must be outermost
    // so the substitute responses minted by the panic and timeout layers
    // still flow back through its header insertion; the access log sits just
    // inside it and observes those responses too.
    public
        .merge(protected)
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::new(state.request_timeout))
        .layer(middleware::from_fn(access_log_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// GET /health - liveness plus store counters
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "server": "ok",
        "gadget_framework": "ready",
        "rbac": {
            "status": "ok",
            "stats": state.store.stats(),
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
