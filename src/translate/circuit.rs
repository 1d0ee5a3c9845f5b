//! Provider circuit breaker.
//! Opens after N consecutive exhausted provider operations; while open, calls
//! fail fast. After the reset window a single trial call is let through while
//! every other caller keeps failing fast; success closes it, failure re-opens it.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{error, info};

struct BreakerState {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// Start of the half-open trial call, if one is in flight.
    trial_started: Option<Instant>,
}

pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    failure_threshold: u32,
    reset_after: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_after: Duration) -> Self {
        Self {
            state: Mutex::new(BreakerState {
                consecutive_failures: 0,
                opened_at: None,
                trial_started: None,
            }),
            failure_threshold: failure_threshold.max(1),
            reset_after,
        }
    }

    /// Whether a call may proceed. An expired open breaker admits one trial
    /// call; a trial that never reports back is replaced after another window.
    pub fn allow(&self) -> bool {
        let mut state = self.state.lock();
        let Some(opened) = state.opened_at else {
            return true;
        };
        if opened.elapsed() < self.reset_after {
            return false;
        }
        match state.trial_started {
            Some(started) if started.elapsed() < self.reset_after => false,
            _ => {
                info!("circuit breaker half-open, allowing a trial call");
                state.trial_started = Some(Instant::now());
                true
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock();
        if state.opened_at.is_some() {
            info!("circuit breaker closed");
        }
        state.consecutive_failures = 0;
        state.opened_at = None;
        state.trial_started = None;
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        if state.trial_started.take().is_some() {
            error!("circuit breaker trial call failed, re-opening");
            state.opened_at = Some(Instant::now());
        } else if state.opened_at.is_none() && state.consecutive_failures >= self.failure_threshold {
            error!(
                failures = state.consecutive_failures,
                "circuit breaker opened"
            );
            state.opened_at = Some(Instant::now());
        }
    }

    /// Open and not currently running a trial call.
    pub fn is_open(&self) -> bool {
        let state = self.state.lock();
        state.opened_at.is_some() && state.trial_started.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        for _ in 0..2 {
            breaker.record_failure();
            assert!(breaker.allow());
        }
        breaker.record_failure();
        assert!(breaker.is_open());
        assert!(!breaker.allow());
    }

    #[test]
    fn success_resets_failure_count() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert!(!breaker.is_open());
    }

    #[test]
    fn half_open_after_reset_window() {
        let breaker = CircuitBreaker::new(2, Duration::from_millis(20));
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.is_open());
        assert!(!breaker.allow());

        std::thread::sleep(Duration::from_millis(30));
        assert!(breaker.allow());
        assert!(!breaker.is_open());

        // A failed trial call re-opens straight away.
        breaker.record_failure();
        assert!(breaker.is_open());
        assert!(!breaker.allow());
    }

    #[test]
    fn half_open_admits_a_single_trial() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(20));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(30));

        assert!(breaker.allow());
        for _ in 0..5 {
            assert!(!breaker.allow());
        }

        breaker.record_success();
        assert!(!breaker.is_open());
        assert!(breaker.allow());
        assert!(breaker.allow());
    }

    #[test]
    fn stalled_trial_is_replaced() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(20));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(30));
        assert!(breaker.allow());
        assert!(!breaker.allow());

        // The trial caller went away without reporting.
        std::thread::sleep(Duration::from_millis(30));
        assert!(breaker.allow());
    }
}
