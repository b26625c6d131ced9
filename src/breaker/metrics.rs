//! Per-breaker request accounting

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::settings::BreakerSettings;
use super::state::{CircuitState, StateChange};

/// Maximum audit entries retained per breaker. Older entries are
/// dropped once the log is full.
pub const STATE_CHANGE_LOG_CAP: usize = 50;

/// Running counters for one breaker.
///
/// Only mutated under the owning breaker's lock. At most one of the
/// two consecutive streaks is non-zero at any time.
#[derive(Debug, Clone, Default)]
pub struct BreakerMetrics {
    /// Requests that reached the guarded operation
    pub total_requests: u64,
    /// Requests whose outcome was recorded as success
    pub successful_requests: u64,
    /// Requests whose outcome was recorded as failure
    pub failed_requests: u64,
    /// Fallback invocations, counted whether or not the fallback succeeded
    pub fallback_requests: u64,
    /// Current run of uninterrupted successes
    pub consecutive_successes: u32,
    /// Current run of uninterrupted failures
    pub consecutive_failures: u32,
    /// Wall-clock time of the most recent success
    pub last_success_time: Option<DateTime<Utc>>,
    /// Wall-clock time of the most recent failure
    pub last_failure_time: Option<DateTime<Utc>>,
    /// Bounded transition audit log, oldest first
    pub state_changes: VecDeque<StateChange>,
}

impl BreakerMetrics {
    /// Fraction of counted requests that failed, 0.0 when nothing
    /// has been counted yet.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn failure_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.failed_requests as f64 / self.total_requests as f64
    }

    pub(crate) fn note_success(&mut self, at: DateTime<Utc>) {
        self.total_requests += 1;
        self.successful_requests += 1;
        self.consecutive_successes += 1;
        self.consecutive_failures = 0;
        self.last_success_time = Some(at);
    }

    pub(crate) fn note_failure(&mut self, at: DateTime<Utc>) {
        self.total_requests += 1;
        self.failed_requests += 1;
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
        self.last_failure_time = Some(at);
    }

    pub(crate) fn push_state_change(&mut self, change: StateChange) {
        if self.state_changes.len() == STATE_CHANGE_LOG_CAP {
            self.state_changes.pop_front();
        }
        self.state_changes.push_back(change);
    }
}

/// Point-in-time snapshot of one breaker, served by the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    /// Breaker name
    pub name: String,
    /// State at snapshot time
    pub state: CircuitState,
    /// Requests that reached the guarded operation
    pub total_requests: u64,
    /// Recorded successes
    pub successful_requests: u64,
    /// Recorded failures
    pub failed_requests: u64,
    /// Fallback invocations
    pub fallback_requests: u64,
    /// Fraction of counted requests that failed
    pub failure_rate: f64,
    /// Current success streak
    pub consecutive_successes: u32,
    /// Current failure streak
    pub consecutive_failures: u32,
    /// Wall-clock time of the most recent success
    pub last_success_time: Option<DateTime<Utc>>,
    /// Wall-clock time of the most recent failure
    pub last_failure_time: Option<DateTime<Utc>>,
    /// Seconds until an open circuit admits a probe, absent otherwise
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    /// Transition audit log, oldest first
    pub state_changes: Vec<StateChange>,
    /// Effective tuning parameters
    pub settings: BreakerSettings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_rate_is_zero_without_traffic() {
        let metrics = BreakerMetrics::default();
        assert!(metrics.failure_rate().abs() < f64::EPSILON);
    }

    #[test]
    fn streaks_are_mutually_exclusive() {
        let mut metrics = BreakerMetrics::default();
        for _ in 0..3 {
            metrics.note_failure(Utc::now());
        }
        assert_eq!(metrics.consecutive_failures, 3);
        assert_eq!(metrics.consecutive_successes, 0);

        metrics.note_success(Utc::now());
        assert_eq!(metrics.consecutive_failures, 0);
        assert_eq!(metrics.consecutive_successes, 1);
        assert_eq!(metrics.total_requests, 4);
    }

    #[test]
    fn failure_rate_reflects_counts() {
        let mut metrics = BreakerMetrics::default();
        metrics.note_failure(Utc::now());
        metrics.note_success(Utc::now());
        metrics.note_failure(Utc::now());
        metrics.note_failure(Utc::now());
        assert!((metrics.failure_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn audit_log_drops_oldest_at_cap() {
        let mut metrics = BreakerMetrics::default();
        for i in 0..(STATE_CHANGE_LOG_CAP + 10) {
            let change = StateChange {
                from: CircuitState::Closed,
                to: if i % 2 == 0 {
                    CircuitState::Open
                } else {
                    CircuitState::Closed
                },
                at: Utc::now(),
            };
            metrics.push_state_change(change);
        }
        assert_eq!(metrics.state_changes.len(), STATE_CHANGE_LOG_CAP);
        // The 10 oldest entries were evicted, so the log now starts at entry 10.
        assert_eq!(metrics.state_changes[0].to, CircuitState::Open);
    }
}
