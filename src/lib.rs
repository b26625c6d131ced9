//! Fusebox Library
//!
//! Circuit breaker engine for guarding flaky downstream dependencies,
//! with an HTTP gateway surface for routed enforcement and operations.
//!
//! # Features
//!
//! - **Circuit Breakers**: Closed/open/half-open machine with streak and
//!   failure-rate tripping
//! - **Fallbacks**: Per-call fallback operations served while a circuit
//!   is open
//! - **Registry**: Named breakers provisioned lazily with shared defaults
//! - **HTTP Enforcement**: Path-mapped middleware that refuses requests
//!   with `Retry-After` hints while a dependency is down
//! - **Operations**: Health, status, and privileged reset endpoints
//!
//! # Example
//!
//! ```
//! use fusebox::breaker::{BreakerSettings, CircuitBreaker};
//! use fusebox::Failure;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let breaker = CircuitBreaker::new("vertex_ai", BreakerSettings::default()).unwrap();
//!
//! let reply: Result<&str, _> = breaker
//!     .protect(|| async { Ok::<_, Failure<String>>("pong") })
//!     .await;
//! assert_eq!(reply.unwrap(), "pong");
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod breaker;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;

pub use error::{BreakerError, CircuitOpen, Error, Failure, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
