//! Circuit breaker state machine
//!
//! One [`CircuitBreaker`] guards one downstream dependency. All state
//! transitions happen under a single mutex; guarded operations run
//! outside it so a slow dependency never blocks bookkeeping.

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::error::{BreakerError, CircuitOpen, Failure};
use crate::Result;

use super::metrics::{BreakerMetrics, BreakerStatus};
use super::settings::BreakerSettings;
use super::state::{CircuitState, StateChange};

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    last_state_change: Instant,
    metrics: BreakerMetrics,
}

/// Circuit breaker guarding a single named dependency.
///
/// Closed circuits pass calls through and count outcomes. Enough
/// failures (a consecutive streak, or a failure rate over a minimum
/// sample) open the circuit, which then refuses calls until
/// [`timeout`](BreakerSettings::timeout) has passed. The first call
/// after the timeout flips the circuit to half-open; from there,
/// [`success_threshold`](BreakerSettings::success_threshold)
/// consecutive successes close it and any failure reopens it.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    /// Lock-free mirror of `Inner::state` for the admission fast path.
    state_cell: AtomicU8,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Build a breaker after validating `settings`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSettings`](crate::Error::InvalidSettings)
    /// when a parameter is out of range.
    pub fn new(name: impl Into<String>, settings: BreakerSettings) -> Result<Self> {
        let name = name.into();
        settings.validate(&name)?;
        Ok(Self::from_validated(name, settings))
    }

    /// Build a breaker from settings already validated by the caller.
    pub(crate) fn from_validated(name: impl Into<String>, settings: BreakerSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            state_cell: AtomicU8::new(CircuitState::Closed.as_u8()),
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                last_state_change: Instant::now(),
                metrics: BreakerMetrics::default(),
            }),
        }
    }

    /// Breaker name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Effective tuning parameters.
    #[must_use]
    pub fn settings(&self) -> &BreakerSettings {
        &self.settings
    }

    /// Current state from the lock-free mirror.
    ///
    /// May trail a concurrent transition by a moment. Read via
    /// [`status`](Self::status) when the state must line up with the
    /// counters.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state_cell.load(Ordering::Relaxed))
    }

    /// Ask the breaker to admit one call.
    ///
    /// Closed and half-open circuits admit. An open circuit whose
    /// timeout has elapsed flips to half-open and admits the caller as
    /// the probe; otherwise the call is refused with a retry hint.
    ///
    /// The closed check reads the mirror without locking, so a call
    /// racing a transition may still be admitted. Its outcome is
    /// recorded like any other.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitOpen`] when the circuit is open and the timeout
    /// has not elapsed.
    pub fn try_acquire(&self) -> std::result::Result<(), CircuitOpen> {
        if self.state() == CircuitState::Closed {
            return Ok(());
        }
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = inner.last_state_change.elapsed();
                if elapsed >= self.settings.timeout {
                    self.transition_locked(&mut inner, CircuitState::HalfOpen);
                    Ok(())
                } else {
                    Err(CircuitOpen {
                        name: self.name.clone(),
                        retry_after: self.settings.timeout - elapsed,
                    })
                }
            }
        }
    }

    /// Run `op` under the breaker.
    ///
    /// The operation executes outside the breaker lock. A dependency
    /// failure is recorded and returned; an excluded failure is
    /// returned without touching any counter. If the returned future
    /// is dropped before `op` resolves, nothing is recorded.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerError::Open`] when the call is refused, or the
    /// operation's own error wrapped in [`BreakerError::Dependency`] or
    /// [`BreakerError::Excluded`].
    pub async fn protect<T, E, F, Fut>(&self, op: F) -> std::result::Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, Failure<E>>>,
    {
        self.try_acquire()?;
        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(Failure::Dependency(err)) => {
                self.record_failure();
                Err(BreakerError::Dependency(err))
            }
            Err(Failure::Excluded(err)) => Err(BreakerError::Excluded(err)),
        }
    }

    /// Run `op` under the breaker, serving `fallback` while the
    /// circuit is open.
    ///
    /// The fallback runs when the call is refused outright and when a
    /// dependency failure leaves the circuit open. Each fallback
    /// invocation is counted, whether or not it succeeds.
    ///
    /// # Errors
    ///
    /// Returns the operation's error wrapped in
    /// [`BreakerError::Dependency`] or [`BreakerError::Excluded`], or
    /// the fallback's error wrapped in [`BreakerError::Fallback`].
    pub async fn protect_with<T, E, F, Fut, Fb, FbFut>(
        &self,
        op: F,
        fallback: Fb,
    ) -> std::result::Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, Failure<E>>>,
        Fb: FnOnce() -> FbFut,
        FbFut: Future<Output = std::result::Result<T, E>>,
    {
        if self.try_acquire().is_err() {
            debug!(breaker = %self.name, "short-circuiting to fallback");
            return self.run_fallback(fallback).await;
        }
        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(Failure::Dependency(err)) => {
                self.record_failure();
                if self.state() == CircuitState::Open {
                    debug!(breaker = %self.name, "failure opened circuit, serving fallback");
                    return self.run_fallback(fallback).await;
                }
                Err(BreakerError::Dependency(err))
            }
            Err(Failure::Excluded(err)) => Err(BreakerError::Excluded(err)),
        }
    }

    /// Synchronous counterpart of [`protect`](Self::protect) for
    /// blocking callers.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerError::Open`] when the call is refused, or the
    /// operation's own error wrapped in [`BreakerError::Dependency`] or
    /// [`BreakerError::Excluded`].
    pub fn protect_blocking<T, E, F>(&self, op: F) -> std::result::Result<T, BreakerError<E>>
    where
        F: FnOnce() -> std::result::Result<T, Failure<E>>,
    {
        self.try_acquire()?;
        match op() {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(Failure::Dependency(err)) => {
                self.record_failure();
                Err(BreakerError::Dependency(err))
            }
            Err(Failure::Excluded(err)) => Err(BreakerError::Excluded(err)),
        }
    }

    async fn run_fallback<T, E, Fb, FbFut>(
        &self,
        fallback: Fb,
    ) -> std::result::Result<T, BreakerError<E>>
    where
        Fb: FnOnce() -> FbFut,
        FbFut: Future<Output = std::result::Result<T, E>>,
    {
        self.inner.lock().metrics.fallback_requests += 1;
        match fallback().await {
            Ok(value) => Ok(value),
            Err(err) => Err(BreakerError::Fallback(err)),
        }
    }

    /// Record a successful outcome.
    ///
    /// Closes a half-open circuit once the success streak reaches
    /// [`success_threshold`](BreakerSettings::success_threshold).
    #[tracing::instrument(skip(self), fields(breaker = %self.name))]
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.metrics.note_success(Utc::now());
        match inner.state {
            CircuitState::HalfOpen => {
                if inner.metrics.consecutive_successes >= self.settings.success_threshold {
                    self.transition_locked(&mut inner, CircuitState::Closed);
                }
            }
            CircuitState::Open => {
                // A call admitted before the circuit opened finished late.
                trace!("success recorded while open");
            }
            CircuitState::Closed => {}
        }
    }

    /// Record a failed outcome.
    ///
    /// Opens a closed circuit when the failure streak or the failure
    /// rate crosses its threshold, and reopens a half-open circuit
    /// unconditionally.
    #[tracing::instrument(skip(self), fields(breaker = %self.name))]
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.metrics.note_failure(Utc::now());
        match inner.state {
            CircuitState::Closed => {
                if self.should_trip(&inner.metrics) {
                    self.transition_locked(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                self.transition_locked(&mut inner, CircuitState::Open);
            }
            CircuitState::Open => {
                trace!("failure recorded while open");
            }
        }
    }

    fn should_trip(&self, metrics: &BreakerMetrics) -> bool {
        if metrics.consecutive_failures >= self.settings.failure_threshold {
            return true;
        }
        metrics.total_requests >= self.settings.min_requests
            && metrics.failure_rate() >= self.settings.failure_rate_threshold
    }

    /// Whether a call would be admitted right now.
    ///
    /// True for closed and half-open circuits, and for an open circuit
    /// whose timeout has elapsed. Unlike
    /// [`try_acquire`](Self::try_acquire) this never transitions.
    #[must_use]
    pub fn should_attempt_reset(&self) -> bool {
        let inner = self.inner.lock();
        match inner.state {
            CircuitState::Open => inner.last_state_change.elapsed() >= self.settings.timeout,
            CircuitState::Closed | CircuitState::HalfOpen => true,
        }
    }

    /// Time until an open circuit admits a probe, `None` otherwise.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        let inner = self.inner.lock();
        match inner.state {
            CircuitState::Open => Some(
                self.settings
                    .timeout
                    .saturating_sub(inner.last_state_change.elapsed()),
            ),
            CircuitState::Closed | CircuitState::HalfOpen => None,
        }
    }

    /// Monotonic instant of the most recent transition, or of
    /// construction when none has happened.
    #[must_use]
    pub fn last_state_change(&self) -> Instant {
        self.inner.lock().last_state_change
    }

    /// Force the circuit closed and clear both streaks.
    ///
    /// Totals and the audit log survive. The transition is audited
    /// only when the circuit was not already closed.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.metrics.consecutive_failures = 0;
        inner.metrics.consecutive_successes = 0;
        self.transition_locked(&mut inner, CircuitState::Closed);
        debug!(breaker = %self.name, "breaker reset");
    }

    /// Copy of the current counters.
    #[must_use]
    pub fn metrics(&self) -> BreakerMetrics {
        self.inner.lock().metrics.clone()
    }

    /// Consistent snapshot of state, counters, and settings.
    #[must_use]
    pub fn status(&self) -> BreakerStatus {
        let inner = self.inner.lock();
        let retry_after_secs = match inner.state {
            CircuitState::Open => Some(
                self.settings
                    .timeout
                    .saturating_sub(inner.last_state_change.elapsed())
                    .as_secs(),
            ),
            CircuitState::Closed | CircuitState::HalfOpen => None,
        };
        BreakerStatus {
            name: self.name.clone(),
            state: inner.state,
            total_requests: inner.metrics.total_requests,
            successful_requests: inner.metrics.successful_requests,
            failed_requests: inner.metrics.failed_requests,
            fallback_requests: inner.metrics.fallback_requests,
            failure_rate: inner.metrics.failure_rate(),
            consecutive_successes: inner.metrics.consecutive_successes,
            consecutive_failures: inner.metrics.consecutive_failures,
            last_success_time: inner.metrics.last_success_time,
            last_failure_time: inner.metrics.last_failure_time,
            retry_after_secs,
            state_changes: inner.metrics.state_changes.iter().cloned().collect(),
            settings: self.settings.clone(),
        }
    }

    /// Apply a transition while holding the lock. No-op when `to`
    /// matches the current state.
    fn transition_locked(&self, inner: &mut Inner, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        inner.last_state_change = Instant::now();
        self.state_cell.store(to.as_u8(), Ordering::Relaxed);
        inner.metrics.push_state_change(StateChange {
            from,
            to,
            at: Utc::now(),
        });
        match to {
            CircuitState::Closed => {
                inner.metrics.consecutive_failures = 0;
                inner.metrics.consecutive_successes = 0;
                info!(breaker = %self.name, from = %from, "circuit closed");
            }
            CircuitState::Open => {
                warn!(
                    breaker = %self.name,
                    from = %from,
                    consecutive_failures = inner.metrics.consecutive_failures,
                    failure_rate = inner.metrics.failure_rate(),
                    "circuit opened"
                );
            }
            CircuitState::HalfOpen => {
                inner.metrics.consecutive_successes = 0;
                debug!(breaker = %self.name, "circuit half-open, probing");
            }
        }
    }
}
