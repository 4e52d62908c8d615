//! HTTP server: router, middleware, and API handlers.

mod auth_api;
mod fs_api;
mod gadget_api;
mod middleware;
mod peer_api;
mod rbac_api;
mod router;
#[allow(clippy::module_inception)]
mod server;

pub use middleware::CorrelationId;
pub use router::{AppState, create_router};
pub use server::Server;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use crate::Error;

/// Error wrapper mapping the crate taxonomy onto HTTP responses.
///
/// Internal failures are returned as an opaque `{"error": "internal"}`;
/// detail goes to the log only.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self.0 {
            Error::Unauthenticated(_) => (
                StatusCode::UNAUTHORIZED,
                json!({"error": "unauthenticated"}),
            ),
            Error::Unauthorized(_) => (StatusCode::UNAUTHORIZED, json!({"error": "unauthorized"})),
            Error::Forbidden { object, action } => (
                StatusCode::FORBIDDEN,
                json!({
                    "error": "forbidden",
                    "required": {"object": object, "action": action}
                }),
            ),
            Error::Validation(message) => (StatusCode::BAD_REQUEST, json!({"error": message})),
            Error::Sandbox { reason, message } => (
                StatusCode::BAD_REQUEST,
                json!({"error": message, "reason": reason.as_str()}),
            ),
            Error::RuleExists(..) => (StatusCode::CONFLICT, json!({"error": self.0.to_string()})),
            Error::NotFound(what) => (
                StatusCode::NOT_FOUND,
                json!({"error": format!("not found: {what}")}),
            ),
            Error::Gadget(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"error": message}),
            ),
            Error::PeerUnavailable(peer) => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({"error": format!("peer unavailable: {peer}")}),
            ),
            Error::PeerTimeout(message) => {
                (StatusCode::GATEWAY_TIMEOUT, json!({"error": message}))
            }
            Error::JsonRpc { code, message, .. } => (
                StatusCode::BAD_GATEWAY,
                json!({"error": message, "code": code}),
            ),
            Error::Transport(message) => (StatusCode::BAD_GATEWAY, json!({"error": message})),
            Error::Protocol(message) => (StatusCode::BAD_GATEWAY, json!({"error": message})),
            Error::Cancelled(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"error": message}),
            ),
            Error::Config(_) | Error::Io(_) | Error::Json(_) | Error::Internal(_) => {
                error!(error = %self.0, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": "internal"}),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}
