//! MCP peer handlers - all gated by the `(ai, access)` permission

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
};
use serde_json::{Value, json};
use tracing::info;

use super::ApiError;
use super::router::AppState;
use crate::auth::Identity;

/// GET /api/mcp/servers - connection state plus the tool catalog of every
/// ready peer
pub async fn servers(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Value>, ApiError> {
    state.authorize(&identity, "ai", "access")?;
    let statuses = state.peers.status();
    let mut catalog = state.peers.list_tools().await;

    let servers: Vec<Value> = statuses
        .into_iter()
        .map(|status| {
            let tools = catalog.remove(&status.name).unwrap_or_default();
            let mut entry = serde_json::to_value(&status).unwrap_or_else(|_| json!({}));
            if let Some(object) = entry.as_object_mut() {
                object.insert(
                    "tools".to_string(),
                    Value::Array(
                        tools
                            .into_iter()
                            .map(|t| Value::String(t.name))
                            .collect(),
                    ),
                );
            }
            entry
        })
        .collect();

    Ok(Json(json!({"count": servers.len(), "servers": servers})))
}

/// POST /api/mcp/servers/{name}/connect
pub async fn connect(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.authorize(&identity, "ai", "access")?;
    state.peers.connect(&name).await?;
    info!(user = %identity.subject, peer = %name, "Peer connect requested");
    Ok(Json(json!({"server": name, "connected": true})))
}

/// DELETE /api/mcp/servers/{name}
pub async fn disconnect(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.authorize(&identity, "ai", "access")?;
    state.peers.disconnect(&name).await?;
    info!(user = %identity.subject, peer = %name, "Peer disconnected");
    Ok(Json(json!({"server": name, "connected": false})))
}

/// GET /api/mcp/resources - aggregated across ready peers
pub async fn resources(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Value>, ApiError> {
    state.authorize(&identity, "ai", "access")?;
    let aggregated = state.peers.list_resources().await;
    Ok(Json(json!({"resources": aggregated})))
}

/// GET /api/mcp/tools - aggregated across ready peers
pub async fn tools(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Value>, ApiError> {
    state.authorize(&identity, "ai", "access")?;
    let aggregated = state.peers.list_tools().await;
    Ok(Json(json!({"tools": aggregated})))
}

/// POST /api/mcp/tools/{server}/{tool} - body is the tool's arguments object
pub async fn call_tool(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path((server, tool)): Path<(String, String)>,
    Json(arguments): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    state.authorize(&identity, "ai", "access")?;
    let result = state.peers.call_tool(&server, &tool, arguments).await?;
    Ok(Json(serde_json::to_value(result).map_err(crate::Error::from)?))
}
