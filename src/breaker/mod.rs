//! Circuit breaker core: state machine, metrics, settings, registry

mod machine;
mod metrics;
mod registry;
mod settings;
mod state;

pub use machine::CircuitBreaker;
pub use metrics::{BreakerMetrics, BreakerStatus, STATE_CHANGE_LOG_CAP};
pub use registry::BreakerRegistry;
pub use settings::BreakerSettings;
pub use state::{CircuitState, StateChange};
