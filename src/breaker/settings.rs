//! Breaker tuning parameters

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::humantime_serde;
use crate::{Error, Result};

/// Tuning parameters for one circuit breaker.
///
/// Immutable once the breaker is built, so any thread may read them
/// without synchronization. Fields omitted from a config entry fall
/// back to the values of [`BreakerSettings::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    /// Consecutive failures that trip the circuit open
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close the circuit
    pub success_threshold: u32,
    /// Time an open circuit waits before admitting a probe
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Failure-rate floor (0.0 to 1.0) for rate-based tripping
    pub failure_rate_threshold: f64,
    /// Minimum counted requests before the failure rate is consulted
    pub min_requests: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
            failure_rate_threshold: 0.5,
            min_requests: 10,
        }
    }
}

impl BreakerSettings {
    /// Check parameter ranges, naming the breaker in any error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSettings`] when a parameter is out of range.
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(invalid(name, "failure_threshold must be at least 1"));
        }
        if self.success_threshold == 0 {
            return Err(invalid(name, "success_threshold must be at least 1"));
        }
        if self.timeout.is_zero() {
            return Err(invalid(name, "timeout must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.failure_rate_threshold) {
            return Err(invalid(
                name,
                "failure_rate_threshold must be between 0.0 and 1.0",
            ));
        }
        Ok(())
    }
}

fn invalid(name: &str, reason: &str) -> Error {
    Error::InvalidSettings {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(BreakerSettings::default().validate("defaults").is_ok());
    }

    #[test]
    fn zero_failure_threshold_rejected() {
        let settings = BreakerSettings {
            failure_threshold: 0,
            ..Default::default()
        };
        let err = settings.validate("vertex_ai").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("vertex_ai"));
        assert!(msg.contains("failure_threshold"));
    }

    #[test]
    fn zero_success_threshold_rejected() {
        let settings = BreakerSettings {
            success_threshold: 0,
            ..Default::default()
        };
        assert!(settings.validate("db").is_err());
    }

    #[test]
    fn zero_timeout_rejected() {
        let settings = BreakerSettings {
            timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(settings.validate("db").is_err());
    }

    #[test]
    fn out_of_range_failure_rate_rejected() {
        for rate in [-0.1, 1.5] {
            let settings = BreakerSettings {
                failure_rate_threshold: rate,
                ..Default::default()
            };
            assert!(settings.validate("db").is_err(), "rate {rate} should be rejected");
        }
    }

    #[test]
    fn boundary_failure_rates_accepted() {
        for rate in [0.0, 1.0] {
            let settings = BreakerSettings {
                failure_rate_threshold: rate,
                ..Default::default()
            };
            assert!(settings.validate("db").is_ok(), "rate {rate} should be accepted");
        }
    }

    #[test]
    fn any_min_requests_accepted() {
        let settings = BreakerSettings {
            min_requests: 0,
            ..Default::default()
        };
        assert!(settings.validate("db").is_ok());
    }
}
