//! Admin token authentication for privileged routes

use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::config::AdminConfig;

/// Admin token checker shared by the privileged routes.
#[derive(Debug)]
pub struct AdminAuth {
    token: Option<String>,
}

impl AdminAuth {
    /// Build from config, resolving `auto` and `env:` token forms.
    ///
    /// A generated token is logged once at startup so operators can
    /// pick it up.
    #[must_use]
    pub fn from_config(config: &AdminConfig) -> Self {
        let token = config.resolve_token();
        if let (Some("auto"), Some(generated)) = (config.token.as_deref(), token.as_deref()) {
            info!("Generated admin token: {generated}");
        }
        Self { token }
    }

    /// Whether a token is configured at all.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.token.is_some()
    }

    /// Compare a presented token against the configured one in
    /// constant time. Always false when no token is configured.
    #[must_use]
    pub fn check(&self, provided: Option<&str>) -> bool {
        match &self.token {
            Some(token) => {
                provided.is_some_and(|p| p.as_bytes().ct_eq(token.as_bytes()).into())
            }
            None => false,
        }
    }
}

/// Middleware guarding privileged admin routes.
///
/// With no token configured every request is refused with 403, so
/// resets cannot be triggered on an unconfigured deployment.
pub async fn admin_middleware(
    State(auth): State<Arc<AdminAuth>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !auth.enabled() {
        return disabled_response();
    }

    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")));

    if auth.check(provided) {
        next.run(request).await
    } else {
        warn!(path = %request.uri().path(), "Rejected admin request with invalid token");
        unauthorized_response()
    }
}

fn disabled_response() -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({
            "error": "admin_not_configured",
            "message": "Set admin.token in the config to enable privileged routes"
        })),
    )
        .into_response()
}

fn unauthorized_response() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Bearer")],
        Json(json!({
            "error": "unauthorized",
            "message": "Invalid admin token"
        })),
    )
        .into_response()
}
