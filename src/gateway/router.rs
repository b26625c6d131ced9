//! HTTP routing and operational endpoints

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tower_http::{
    catch_panic::CatchPanicLayer, compression::CompressionLayer, trace::TraceLayer,
};

use crate::breaker::{BreakerRegistry, CircuitState};

use super::auth::{AdminAuth, admin_middleware};
use super::resilience::{ResilienceState, resilience_middleware};

/// Shared state for the operational endpoints.
#[derive(Clone)]
pub struct AppState {
    /// Breakers guarding downstream dependencies
    pub registry: Arc<BreakerRegistry>,
    /// Admin token checker
    pub admin: Arc<AdminAuth>,
}

/// Build the gateway router.
///
/// `app` carries the embedder's own routes; they are merged next to
/// the operational endpoints and must not collide with them. The
/// resilience layer wraps everything, so mapped application paths are
/// guarded while `/health` and `/breakers` stay reachable during an
/// outage. Panics surface as 500s inside the resilience layer and
/// count as failures.
pub fn create_router(state: AppState, resilience: ResilienceState, app: Router) -> Router {
    let privileged = Router::new()
        .route("/breakers/reset", post(reset_all_handler))
        .route("/breakers/{name}/reset", post(reset_one_handler))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.admin),
            admin_middleware,
        ));

    let ops = Router::new()
        .route("/health", get(health_handler))
        .route("/breakers", get(all_status_handler))
        .route("/breakers/{name}", get(one_status_handler))
        .merge(privileged)
        .with_state(state);

    ops.merge(app)
        .layer(CatchPanicLayer::new())
        .layer(middleware::from_fn_with_state(
            resilience,
            resilience_middleware,
        ))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// Health check endpoint. Degraded (503) while any circuit is open.
async fn health_handler(State(state): State<AppState>) -> Response {
    let statuses = state.registry.get_all_status();
    let mut open: Vec<&str> = statuses
        .values()
        .filter(|status| status.state == CircuitState::Open)
        .map(|status| status.name.as_str())
        .collect();
    open.sort_unstable();

    let healthy = open.is_empty();
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "breakers": {
            "count": statuses.len(),
            "open": open,
        }
    });
    (code, Json(body)).into_response()
}

/// Status snapshot of every registered breaker.
async fn all_status_handler(State(state): State<AppState>) -> Response {
    Json(state.registry.get_all_status()).into_response()
}

/// Status snapshot of one breaker. Reads never provision, so asking
/// about an unknown name is a 404 rather than a fresh breaker.
async fn one_status_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Response {
    match state.registry.lookup(&name) {
        Some(breaker) => Json(breaker.status()).into_response(),
        None => breaker_not_found(&name),
    }
}

async fn reset_all_handler(State(state): State<AppState>) -> Response {
    let count = state.registry.reset_all();
    Json(json!({ "reset": count })).into_response()
}

async fn reset_one_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Response {
    match state.registry.lookup(&name) {
        Some(breaker) => {
            breaker.reset();
            Json(json!({ "reset": name })).into_response()
        }
        None => breaker_not_found(&name),
    }
}

fn breaker_not_found(name: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "breaker_not_found", "name": name })),
    )
        .into_response()
}
