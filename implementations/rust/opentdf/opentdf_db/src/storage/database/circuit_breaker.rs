use crate::storage::database::CircuitBreakerConfiguration;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// State of a circuit breaker
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakerState {
    /// Requests flow normally
    Closed,
    /// Requests are rejected until the open timeout expires
    Open,
    /// A single probe request is allowed
    HalfOpen,
}

impl BreakerState {
    fn to_u8(self) -> u8 {
        match self {
            BreakerState::Closed => 0,
            BreakerState::Open => 1,
            BreakerState::HalfOpen => 2,
        }
    }

    fn from_u8(value: u8) -> BreakerState {
        match value {
            1 => BreakerState::Open,
            2 => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }
}

/// Number of requests after which the failure ratio is computed again from scratch
const ROLLING_WINDOW: u32 = 100;

#[derive(Debug, Default)]
struct Counts {
    requests: u32,
    failures: u32,
    consecutive_failures: u32,
}

#[derive(Debug)]
struct Inner {
    counts: Counts,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Circuit breaker guarding one read replica.
///
/// The breaker opens after `min_requests` consecutive failures, or when at least
/// `min_requests` requests were made in the current window of [`ROLLING_WINDOW`] requests
/// and the ratio of failures reaches `failure_ratio`. A success resets the consecutive failures.
/// After `open_timeout` one probe request is let through:
/// a success closes the breaker, a failure opens it again.
///
/// The state is published in an atomic so that routing decisions only need a load;
/// counters are updated under a short critical section.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    min_requests: u32,
    failure_ratio: f64,
    open_timeout: Duration,
    state: AtomicU8,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, configuration: &CircuitBreakerConfiguration) -> Self {
        Self {
            name: name.into(),
            min_requests: configuration.min_requests,
            failure_ratio: configuration.failure_ratio,
            open_timeout: configuration.open_timeout(),
            state: AtomicU8::new(BreakerState::Closed.to_u8()),
            inner: Mutex::new(Inner {
                counts: Counts::default(),
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Name of the guarded resource
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, moving from Open to HalfOpen once the timeout has expired
    pub fn state(&self) -> BreakerState {
        let state = BreakerState::from_u8(self.state.load(Ordering::Acquire));
        if state != BreakerState::Open {
            return state;
        }
        let Ok(mut inner) = self.inner.lock() else {
            return state;
        };
        self.expire_open_state(&mut inner)
    }

    /// Return true if a request can be attempted.
    /// In the half-open state only one probe is allowed at a time.
    pub fn allow_request(&self) -> bool {
        let Ok(mut inner) = self.inner.lock() else {
            return false;
        };
        match self.expire_open_state(&mut inner) {
            BreakerState::Closed => true,
            BreakerState::Open => false,
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record the successful outcome of an allowed request
    pub fn record_success(&self) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        match self.current() {
            BreakerState::HalfOpen => {
                info!(replica = %self.name, "circuit breaker closed");
                self.transition(&mut inner, BreakerState::Closed);
            }
            BreakerState::Open => {}
            BreakerState::Closed => {
                Self::roll_window(&mut inner.counts);
                inner.counts.requests += 1;
                inner.counts.consecutive_failures = 0;
            }
        }
    }

    /// Record the failed outcome of an allowed request
    pub fn record_failure(&self) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        match self.current() {
            BreakerState::HalfOpen => {
                warn!(replica = %self.name, "circuit breaker probe failed, opening again");
                self.transition(&mut inner, BreakerState::Open);
            }
            BreakerState::Open => {}
            BreakerState::Closed => {
                Self::roll_window(&mut inner.counts);
                inner.counts.requests += 1;
                inner.counts.failures += 1;
                inner.counts.consecutive_failures += 1;
                if self.should_trip(&inner.counts) {
                    warn!(
                        replica = %self.name,
                        requests = inner.counts.requests,
                        failures = inner.counts.failures,
                        consecutive_failures = inner.counts.consecutive_failures,
                        "circuit breaker opened"
                    );
                    self.transition(&mut inner, BreakerState::Open);
                }
            }
        }
    }

    fn should_trip(&self, counts: &Counts) -> bool {
        counts.consecutive_failures >= self.min_requests
            || (counts.requests >= self.min_requests
                && (counts.failures as f64 / counts.requests as f64) >= self.failure_ratio)
    }

    /// Start a new window once the current one is full, keeping the consecutive failures
    fn roll_window(counts: &mut Counts) {
        if counts.requests >= ROLLING_WINDOW {
            counts.requests = 0;
            counts.failures = 0;
        }
    }

    fn current(&self) -> BreakerState {
        BreakerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn expire_open_state(&self, inner: &mut Inner) -> BreakerState {
        let state = self.current();
        if state == BreakerState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.open_timeout {
                    info!(replica = %self.name, "circuit breaker half-open");
                    self.transition(inner, BreakerState::HalfOpen);
                    return BreakerState::HalfOpen;
                }
            }
        }
        state
    }

    fn transition(&self, inner: &mut Inner, state: BreakerState) {
        inner.counts = Counts::default();
        inner.probe_in_flight = false;
        inner.opened_at = if state == BreakerState::Open {
            Some(Instant::now())
        } else {
            None
        };
        self.state.store(state.to_u8(), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(open_timeout_seconds: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "replica-0",
            &CircuitBreakerConfiguration {
                min_requests: 3,
                failure_ratio: 0.6,
                open_timeout_seconds,
            },
        )
    }

    #[test]
    fn test_failures_trip_the_breaker() {
        let breaker = breaker(30);
        assert_eq!(breaker.state(), BreakerState::Closed);

        // not enough requests yet
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.allow_request());
    }

    #[test]
    fn test_successes_keep_the_breaker_closed() {
        let breaker = breaker(30);
        for _ in 0..10 {
            assert!(breaker.allow_request());
            breaker.record_success();
        }
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_consecutive_failures_trip_a_busy_breaker() {
        let breaker = breaker(30);
        for _ in 0..10 {
            breaker.record_success();
        }
        // the failure ratio is still low but the replica fails every request
        for _ in 0..2 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn test_a_success_resets_the_consecutive_failures() {
        let breaker = breaker(30);
        for _ in 0..10 {
            breaker.record_success();
        }
        for _ in 0..5 {
            breaker.record_failure();
            breaker.record_failure();
            breaker.record_success();
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_old_successes_leave_the_window() {
        let breaker = CircuitBreaker::new(
            "replica-2",
            &CircuitBreakerConfiguration {
                min_requests: 20,
                failure_ratio: 0.5,
                open_timeout_seconds: 30,
            },
        );
        for _ in 0..ROLLING_WINDOW {
            breaker.record_success();
        }
        // one failure out of two in the new window
        for _ in 0..10 {
            breaker.record_success();
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn test_half_open_probe() {
        let breaker = breaker(0);
        for _ in 0..3 {
            breaker.record_failure();
        }
        // the open timeout is 0, so the breaker is immediately half-open
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        // only one probe at a time
        assert!(breaker.allow_request());
        assert!(!breaker.allow_request());

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.allow_request());
    }

    #[test]
    fn test_failed_probe_opens_again() {
        let breaker = CircuitBreaker::new(
            "replica-1",
            &CircuitBreakerConfiguration {
                min_requests: 1,
                failure_ratio: 0.5,
                open_timeout_seconds: 3600,
            },
        );
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        // force the half-open state
        {
            let mut inner = breaker.inner.lock().unwrap();
            breaker.transition(&mut inner, BreakerState::HalfOpen);
        }
        assert!(breaker.allow_request());
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }
}
