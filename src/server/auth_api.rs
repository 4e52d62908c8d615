//! Login and token refresh handlers

use std::sync::Arc;

use axum::{Extension, Json, extract::State};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::ApiError;
use super::router::AppState;
use crate::Error;
use crate::auth::Identity;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    username: String,
    password: String,
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<Value>, ApiError> {
    let Some(display_name) = state.users.verify(&request.username, &request.password) else {
        warn!(username = %request.username, "Login failed");
        return Err(Error::Unauthorized("invalid credentials".to_string()).into());
    };

    let roles = state.store.roles_of(&request.username);
    let token = state.minter.mint(&request.username, &display_name, roles.clone())?;

    info!(username = %request.username, roles = roles.len(), "Login succeeded");
    Ok(Json(json!({
        "token": token,
        "username": request.username,
        "roles": roles,
    })))
}

/// POST /api/auth/refresh (bearer required)
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Value>, ApiError> {
    // The middleware already verified the presented token; mint a fresh one
    // preserving subject, display name and roles.
    let token = state.minter.mint(
        &identity.subject,
        &identity.display_name,
        identity.roles.clone(),
    )?;
    Ok(Json(json!({
        "token": token,
        "username": identity.subject,
        "roles": identity.roles,
    })))
}
