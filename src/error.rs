//! Error types for fusebox

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for fusebox
pub type Result<T> = std::result::Result<T, Error>;

/// Fusebox errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Breaker settings failed validation
    #[error("Invalid settings for breaker '{name}': {reason}")]
    InvalidSettings {
        /// Breaker the settings were meant for
        name: String,
        /// Which parameter was out of range
        reason: String,
    },

    /// Breaker not found (the admin read surface does not auto-provision)
    #[error("Breaker not found: {0}")]
    BreakerNotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Signal that a call was refused because its circuit is open.
///
/// Carried by [`BreakerError::Open`] and returned from
/// [`CircuitBreaker::try_acquire`](crate::breaker::CircuitBreaker::try_acquire).
/// Never confusable with an error raised by the dependency itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("circuit '{name}' is open, retry in {}s", .retry_after.as_secs())]
pub struct CircuitOpen {
    /// Name of the breaker that refused the call
    pub name: String,
    /// Time remaining until the next half-open probe is allowed
    pub retry_after: Duration,
}

/// Error path of a protected call.
///
/// `E` is the error type of the wrapped operation (and of its fallback).
#[derive(Error, Debug)]
pub enum BreakerError<E> {
    /// The circuit was open; the operation was never invoked
    #[error(transparent)]
    Open(#[from] CircuitOpen),

    /// The dependency failed; the failure was recorded against the breaker
    #[error("dependency error: {0}")]
    Dependency(E),

    /// The operation failed with an error excluded from circuit accounting
    #[error("excluded error: {0}")]
    Excluded(E),

    /// The fallback itself failed; propagated as-is, uninstrumented
    #[error("fallback error: {0}")]
    Fallback(E),
}

impl<E> BreakerError<E> {
    /// True when the call was refused without being attempted.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open(_))
    }

    /// The underlying error, if the operation or fallback produced one.
    #[must_use]
    pub fn inner(&self) -> Option<&E> {
        match self {
            Self::Open(_) => None,
            Self::Dependency(e) | Self::Excluded(e) | Self::Fallback(e) => Some(e),
        }
    }

    /// Unwrap the underlying error, or give `self` back when the circuit
    /// was open and there is none.
    pub fn into_inner(self) -> std::result::Result<E, Self> {
        match self {
            Self::Open(_) => Err(self),
            Self::Dependency(e) | Self::Excluded(e) | Self::Fallback(e) => Ok(e),
        }
    }
}

/// Call-site classification of an operation error.
///
/// A protected operation returns `Result<T, Failure<E>>`. `Dependency`
/// errors count against the breaker; `Excluded` errors bypass circuit
/// accounting entirely (caller-misuse errors such as input validation,
/// which say nothing about dependency health).
///
/// Plain errors convert into `Dependency` via `From`, so `?` works
/// unchanged inside the operation and exclusion stays an explicit,
/// type-checked choice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure<E> {
    /// Dependency fault, recorded by the breaker
    Dependency(E),
    /// Fault excluded from circuit accounting
    Excluded(E),
}

impl<E> Failure<E> {
    /// The wrapped error, tag discarded.
    pub fn into_error(self) -> E {
        match self {
            Self::Dependency(e) | Self::Excluded(e) => e,
        }
    }
}

impl<E> From<E> for Failure<E> {
    fn from(err: E) -> Self {
        Self::Dependency(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circuit_open_display_names_breaker_and_hint() {
        let open = CircuitOpen {
            name: "vertex_ai".to_string(),
            retry_after: Duration::from_secs(42),
        };
        let msg = open.to_string();
        assert!(msg.contains("vertex_ai"));
        assert!(msg.contains("42s"));
    }

    #[test]
    fn breaker_error_open_has_no_inner() {
        let err: BreakerError<String> = BreakerError::Open(CircuitOpen {
            name: "redis".to_string(),
            retry_after: Duration::from_secs(5),
        });
        assert!(err.is_open());
        assert!(err.inner().is_none());
        assert!(err.into_inner().is_err());
    }

    #[test]
    fn breaker_error_dependency_unwraps() {
        let err: BreakerError<&str> = BreakerError::Dependency("timeout");
        assert!(!err.is_open());
        assert_eq!(err.inner(), Some(&"timeout"));
        assert_eq!(err.into_inner().unwrap(), "timeout");
    }

    #[test]
    fn plain_errors_default_to_dependency() {
        let failure: Failure<&str> = "boom".into();
        assert_eq!(failure, Failure::Dependency("boom"));
        assert_eq!(failure.into_error(), "boom");
    }
}
