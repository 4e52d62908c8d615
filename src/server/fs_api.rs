//! Sandboxed filesystem handlers

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Query, State},
};
use serde::Deserialize;
use serde_json::{Value, json};

use super::ApiError;
use super::router::AppState;
use crate::auth::Identity;

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    path: String,
}

/// GET /api/fs/list?path=
pub async fn list(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<PathQuery>,
) -> Result<Json<Value>, ApiError> {
    state.authorize(&identity, "filesystem", "read")?;
    let entries = state.sandbox.list(&query.path, &identity.subject).await?;
    Ok(Json(json!({
        "path": query.path,
        "count": entries.len(),
        "entries": entries,
    })))
}

/// GET /api/fs/read?path=
pub async fn read(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<PathQuery>,
) -> Result<Json<Value>, ApiError> {
    state.authorize(&identity, "filesystem", "read")?;
    let bytes = state.sandbox.read(&query.path, &identity.subject).await?;
    Ok(Json(json!({
        "path": query.path,
        "size": bytes.len(),
        "content": String::from_utf8_lossy(&bytes),
    })))
}

#[derive(Debug, Deserialize)]
pub struct WriteRequest {
    path: String,
    content: String,
}

/// POST /api/fs/write
pub async fn write(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<WriteRequest>,
) -> Result<Json<Value>, ApiError> {
    state.authorize(&identity, "filesystem", "write")?;
    state
        .sandbox
        .write(&request.path, &identity.subject, request.content.as_bytes())
        .await?;
    Ok(Json(json!({
        "path": request.path,
        "written": request.content.len(),
    })))
}
