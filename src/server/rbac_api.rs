//! RBAC handlers: self-service identity plus admin management.
//!
//! Management routes are gated by the management permissions the admin role
//! holds from the seed: `(users, manage)` for grants, `(roles, manage)` for
//! rules, `(system, manage)` for store counters.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use super::ApiError;
use super::router::AppState;
use crate::auth::Identity;

/// GET /api/rbac/me
pub async fn me(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Json<Value> {
    Json(json!({
        "username": identity.subject,
        "display_name": identity.display_name,
        "roles": state.store.roles_of(&identity.subject),
    }))
}

/// GET /api/rbac/me/permissions
pub async fn my_permissions(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Json<Value> {
    Json(json!({
        "username": identity.subject,
        "permissions": state.store.permissions_of(&identity.subject),
    }))
}

/// GET /api/rbac/users
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Value>, ApiError> {
    state.authorize(&identity, "users", "manage")?;
    let users = state.store.all_users();
    Ok(Json(json!({"count": users.len(), "users": users})))
}

#[derive(Debug, Deserialize)]
pub struct GrantRequest {
    username: String,
    role: String,
}

/// POST /api/rbac/users - grant a role
pub async fn grant_role(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<GrantRequest>,
) -> Result<Json<Value>, ApiError> {
    state.authorize(&identity, "users", "manage")?;
    state.store.grant(&request.username, &request.role)?;
    info!(admin = %identity.subject, user = %request.username, role = %request.role, "Role granted");
    Ok(Json(json!({
        "username": request.username,
        "role": request.role,
        "granted": true,
    })))
}

/// GET /api/rbac/users/{user}/roles
pub async fn user_roles(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(user): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.authorize(&identity, "users", "manage")?;
    Ok(Json(json!({
        "username": user,
        "roles": state.store.roles_of(&user),
    })))
}

/// DELETE /api/rbac/users/{user}/roles/{role}
pub async fn revoke_role(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path((user, role)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    state.authorize(&identity, "users", "manage")?;
    state.store.revoke(&user, &role)?;
    info!(admin = %identity.subject, user = %user, role = %role, "Role revoked");
    Ok(Json(json!({
        "username": user,
        "role": role,
        "revoked": true,
    })))
}

/// GET /api/rbac/roles
pub async fn list_roles(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Value>, ApiError> {
    state.authorize(&identity, "roles", "manage")?;
    let roles = state.store.all_roles();
    Ok(Json(json!({"count": roles.len(), "roles": roles})))
}

/// GET /api/rbac/roles/{role}/permissions
pub async fn role_permissions(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(role): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.authorize(&identity, "roles", "manage")?;
    Ok(Json(json!({
        "role": role,
        "permissions": state.store.rules_of(&role),
    })))
}

#[derive(Debug, Deserialize)]
pub struct PermissionRequest {
    subject: String,
    object: String,
    action: String,
}

/// POST /api/rbac/permissions
pub async fn add_permission(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<PermissionRequest>,
) -> Result<Json<Value>, ApiError> {
    state.authorize(&identity, "roles", "manage")?;
    state
        .store
        .add_rule(&request.subject, &request.object, &request.action)?;
    info!(
        admin = %identity.subject,
        subject = %request.subject,
        object = %request.object,
        action = %request.action,
        "Permission rule added"
    );
    Ok(Json(json!({"added": true})))
}

/// DELETE /api/rbac/permissions (body-addressed rule removal)
pub async fn remove_permission(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<PermissionRequest>,
) -> Result<Json<Value>, ApiError> {
    state.authorize(&identity, "roles", "manage")?;
    state
        .store
        .remove_rule(&request.subject, &request.object, &request.action)?;
    Ok(Json(json!({"removed": true})))
}

/// GET /api/rbac/stats
pub async fn stats(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Value>, ApiError> {
    state.authorize(&identity, "system", "manage")?;
    Ok(Json(serde_json::to_value(state.store.stats()).map_err(crate::Error::from)?))
}
