//! HTTP gateway: routing, resilience middleware, admin surface

pub mod auth;
mod resilience;
mod router;
mod server;

pub use auth::{AdminAuth, admin_middleware};
pub use resilience::{ResilienceState, RouteTable, resilience_middleware};
pub use router::{AppState, create_router};
pub use server::Server;
