//! HTTP middleware: correlation ids, access logging, token authentication,
//! and the permission/role gates used by handlers.
//!
//! Pipeline order is fixed: the correlation id is assigned first (echoed on
//! every response, including early 401s), the access log observes request
//! completion, and the auth layer binds a verified [`Identity`] to the
//! request before any protected handler runs.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json,
    body::Body,
    extract::{ConnectInfo, MatchedPath, State},
    http::{HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::router::AppState;
use crate::auth::{Identity, extract_bearer};
use crate::rbac::ROLE_PREFIX;
use crate::{Error, Result};

/// Correlation id header name
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Per-request correlation id, stored in request extensions.
#[derive(Debug, Clone)]
pub struct CorrelationId(pub String);

/// Assign or propagate the correlation id and echo it on the response.
pub async fn request_id_middleware(mut request: Request<Body>, next: Next) -> Response {
    let id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map_or_else(|| Uuid::new_v4().to_string(), String::from);

    request.extensions_mut().insert(CorrelationId(id.clone()));
    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Structured access log on request completion.
pub async fn access_log_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| path.clone());
    let client_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| "-".to_string(), |info| info.0.ip().to_string());
    let user_agent = request
        .headers()
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();
    let request_id = request
        .extensions()
        .get::<CorrelationId>()
        .map_or_else(|| "-".to_string(), |id| id.0.clone());

    let start = Instant::now();
    let response = next.run(request).await;

    info!(
        method = %method,
        path = %path,
        route = %route,
        status = response.status().as_u16(),
        duration_ms = start.elapsed().as_millis(),
        client_ip = %client_ip,
        user_agent = %user_agent,
        request_id = %request_id,
        "http access"
    );
    response
}

/// Token authentication for protected routes.
///
/// Accepts `Authorization: Bearer <token>` first, then the `token` query
/// parameter. A missing token is logged as unauthenticated; a present but
/// invalid one as unauthorized. Both answer 401 with a uniform body.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let authorization = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok());
    let query_token = request.uri().query().and_then(token_from_query);

    let Some(token) = extract_bearer(authorization, query_token.as_deref()) else {
        debug!(path = %request.uri().path(), reason = "missing-token", "Unauthenticated request");
        return unauthorized_response("unauthenticated");
    };

    match state.minter.verify(&token) {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(e) => {
            let reason = match &e {
                Error::Unauthorized(reason) => reason.clone(),
                other => other.to_string(),
            };
            warn!(path = %request.uri().path(), reason = %reason, "Rejected token");
            unauthorized_response("unauthorized")
        }
    }
}

fn token_from_query(query: &str) -> Option<String> {
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
        .map(String::from)
}

fn unauthorized_response(reason: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [("WWW-Authenticate", "Bearer")],
        Json(json!({"error": reason})),
    )
        .into_response()
}

impl AppState {
    /// Permission gate: a direct rule for the subject, then `role:<r>` for
    /// each role the identity carries.
    ///
    /// # Errors
    ///
    /// `Error::Forbidden` carrying the required (object, action).
    pub fn authorize(&self, identity: &Identity, object: &str, action: &str) -> Result<()> {
        if self.store.enforce(&identity.subject, object, action) {
            return Ok(());
        }
        for role in &identity.roles {
            if self
                .store
                .enforce(&format!("{ROLE_PREFIX}{role}"), object, action)
            {
                return Ok(());
            }
        }
        debug!(
            user = %identity.subject,
            object = %object,
            action = %action,
            "Permission denied"
        );
        Err(Error::Forbidden {
            object: object.to_string(),
            action: action.to_string(),
        })
    }

    /// Role gate, any-of: direct membership via the policy store.
    ///
    /// # Errors
    ///
    /// `Error::Forbidden` with object `roles` naming the accepted set.
    pub fn require_any_role(&self, identity: &Identity, any_of: &[&str]) -> Result<()> {
        let held = self.store.roles_of(&identity.subject);
        if held.iter().any(|r| any_of.iter().any(|q| r == q)) {
            return Ok(());
        }
        Err(Error::Forbidden {
            object: "roles".to_string(),
            action: format!("any-of:{}", any_of.join("|")),
        })
    }

    /// Role gate, all-of: direct membership via the policy store.
    ///
    /// # Errors
    ///
    /// `Error::Forbidden` with object `roles` naming the required set.
    pub fn require_all_roles(&self, identity: &Identity, all_of: &[&str]) -> Result<()> {
        let held = self.store.roles_of(&identity.subject);
        if all_of.iter().all(|q| held.iter().any(|r| r == q)) {
            return Ok(());
        }
        Err(Error::Forbidden {
            object: "roles".to_string(),
            action: format!("all-of:{}", all_of.join("|")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_query_parsing() {
        assert_eq!(
            token_from_query("path=/tmp&token=abc").as_deref(),
            Some("abc")
        );
        assert_eq!(token_from_query("token=abc").as_deref(), Some("abc"));
        assert_eq!(token_from_query("path=/tmp"), None);
        // Only an exact `token` key matches
        assert_eq!(token_from_query("nottoken=abc"), None);
    }
}
