//! Breaker enforcement for proxied routes
//!
//! Maps request paths to breakers, refuses requests while a circuit
//! is open, and records response outcomes.

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
use tracing::{debug, warn};

use crate::breaker::{BreakerRegistry, CircuitBreaker, CircuitState};
use crate::config::RoutesConfig;

/// Path-to-breaker routing table, fixed at startup.
#[derive(Debug)]
pub struct RouteTable {
    agent_prefix: String,
    rules: Vec<(String, String)>,
}

impl RouteTable {
    /// Build from the routes section of the config.
    #[must_use]
    pub fn from_config(config: &RoutesConfig) -> Self {
        Self {
            agent_prefix: config.agent_prefix.trim_end_matches('/').to_string(),
            rules: config
                .rules
                .iter()
                .map(|rule| (rule.prefix.clone(), rule.breaker.clone()))
                .collect(),
        }
    }

    /// Name of the breaker guarding `path`, or `None` for unguarded
    /// paths.
    ///
    /// Paths under the agent prefix map to a breaker named after the
    /// next path segment, so `/agents/planner/run` is guarded by
    /// `agent_planner`. Other paths are matched against the prefix
    /// rules in declaration order.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<String> {
        path.strip_prefix(&self.agent_prefix)
            .and_then(|rest| rest.strip_prefix('/'))
            .and_then(|rest| rest.split('/').next())
            .filter(|name| !name.is_empty())
            .map(|name| format!("agent_{name}"))
            .or_else(|| {
                self.rules
                    .iter()
                    .find(|(prefix, _)| path.starts_with(prefix.as_str()))
                    .map(|(_, breaker)| breaker.clone())
            })
    }
}

/// State shared by the resilience middleware.
#[derive(Clone)]
pub struct ResilienceState {
    /// Breakers guarding downstream dependencies
    pub registry: Arc<BreakerRegistry>,
    /// Path-to-breaker routing table
    pub routes: Arc<RouteTable>,
}

/// Middleware guarding mapped routes with a circuit breaker.
///
/// Unmapped paths pass through untouched. For mapped paths, an open
/// circuit refuses the request before the handler runs. Otherwise the
/// response status is recorded as the outcome: 5xx counts as a
/// failure, everything else as a success. A failure that opens the
/// circuit replaces the response with the refusal payload so clients
/// see the retry hint immediately.
pub async fn resilience_middleware(
    State(state): State<ResilienceState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let Some(name) = state.routes.resolve(&path) else {
        return next.run(request).await;
    };

    let breaker = state.registry.get(&name);
    if breaker.try_acquire().is_err() {
        debug!(breaker = %name, path = %path, "refusing request, circuit open");
        return circuit_open_response(&breaker);
    }

    let response = next.run(request).await;

    if response.status().is_server_error() {
        breaker.record_failure();
        if breaker.state() == CircuitState::Open {
            warn!(
                breaker = %name,
                status = %response.status(),
                "replacing upstream error response, circuit open"
            );
            return circuit_open_response(&breaker);
        }
    } else {
        breaker.record_success();
    }

    response
}

/// 503 refusal with a `Retry-After` header, never less than one second.
fn circuit_open_response(breaker: &CircuitBreaker) -> Response {
    let retry_after = breaker.retry_after().unwrap_or_default().as_secs().max(1);
    (
        StatusCode::SERVICE_UNAVAILABLE,
        [(header::RETRY_AFTER, retry_after.to_string())],
        Json(json!({
            "error": "Service temporarily unavailable",
            "circuit_breaker": breaker.name(),
            "retry_after": retry_after,
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteRule;

    fn table() -> RouteTable {
        RouteTable::from_config(&RoutesConfig::default())
    }

    #[test]
    fn agent_paths_resolve_to_scoped_breakers() {
        let table = table();
        assert_eq!(
            table.resolve("/agents/planner").as_deref(),
            Some("agent_planner")
        );
        assert_eq!(
            table.resolve("/agents/planner/run").as_deref(),
            Some("agent_planner")
        );
        assert_eq!(
            table.resolve("/agents/coder/sessions/3").as_deref(),
            Some("agent_coder")
        );
    }

    #[test]
    fn dependency_prefixes_resolve() {
        let table = table();
        assert_eq!(table.resolve("/generate").as_deref(), Some("vertex_ai"));
        assert_eq!(table.resolve("/chat/stream").as_deref(), Some("vertex_ai"));
        assert_eq!(table.resolve("/sessions/42").as_deref(), Some("supabase"));
        assert_eq!(table.resolve("/history").as_deref(), Some("supabase"));
        assert_eq!(table.resolve("/cache/keys").as_deref(), Some("redis"));
    }

    #[test]
    fn unmapped_paths_resolve_to_none() {
        let table = table();
        assert_eq!(table.resolve("/health"), None);
        assert_eq!(table.resolve("/"), None);
        assert_eq!(table.resolve("/agents"), None);
        assert_eq!(table.resolve("/agents/"), None);
        // Prefix match requires a segment boundary.
        assert_eq!(table.resolve("/agentsmith"), None);
    }

    #[test]
    fn custom_rules_match_in_order() {
        let config = RoutesConfig {
            agent_prefix: "/bots".to_string(),
            rules: vec![
                RouteRule {
                    prefix: "/api/v2".to_string(),
                    breaker: "v2".to_string(),
                },
                RouteRule {
                    prefix: "/api".to_string(),
                    breaker: "v1".to_string(),
                },
            ],
        };
        let table = RouteTable::from_config(&config);
        assert_eq!(table.resolve("/bots/scout").as_deref(), Some("agent_scout"));
        assert_eq!(table.resolve("/api/v2/x").as_deref(), Some("v2"));
        assert_eq!(table.resolve("/api/v1/x").as_deref(), Some("v1"));
        assert_eq!(table.resolve("/other"), None);
    }
}
