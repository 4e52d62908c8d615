//! Gadget handlers
//!
//! List and info are role-gated (`user` or `admin`); execution requires the
//! `(gadgets, execute)` permission, and system-classified names additionally
//! require `(system, manage)`.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;

use super::ApiError;
use super::router::AppState;
use crate::Error;
use crate::auth::Identity;
use crate::gadget::GadgetRunner;

/// GET /api/gadgets
pub async fn list(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Response, ApiError> {
    state.require_any_role(&identity, &["user", "admin"])?;
    let gadgets = state.gadgets.list().await?;
    Ok(Json(json!({"count": gadgets.len(), "gadgets": gadgets})).into_response())
}

/// GET /api/gadgets/{name}/info
pub async fn info(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    state.require_any_role(&identity, &["user", "admin"])?;
    let details = state.gadgets.info(&name).await?;
    Ok(Json(details).into_response())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ExecuteRequest {
    gadget_name: String,
    args: Vec<String>,
}

/// POST /api/gadgets/{name}/execute
pub async fn execute(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(name): Path<String>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Response, ApiError> {
    // Name validation runs before any policy check or spawn
    GadgetRunner::validate_name(&name)?;
    if !request.gadget_name.is_empty() && request.gadget_name != name {
        return Err(Error::Validation(format!(
            "body gadget_name {:?} does not match path {name:?}",
            request.gadget_name
        ))
        .into());
    }

    state.authorize(&identity, "gadgets", "execute")?;
    if state.gadgets.is_system(&name) {
        state.authorize(&identity, "system", "manage")?;
    }

    let execution = state
        .gadgets
        .execute(&name, &request.args, &identity.subject)
        .await?;

    // Subprocess failures surface the full record under a 500
    let status = if execution.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    Ok((status, Json(execution)).into_response())
}
