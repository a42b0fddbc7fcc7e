// =============================================================================
// circuit_breaker.rs — KEEPING A SICK PRICING ENGINE FROM SINKING SETTLEMENT
// =============================================================================
//
// When the pricing engine goes slow or dark, every trip request that waits
// on it waits the full timeout. Enough of those and the whole service is
// stuck behind one bad dependency. The breaker counts consecutive failures;
// after N of them it "opens" and the gateway stops calling the engine at all
// for a cool-down period, pricing with the fallback rate instead.
//
// After the cool-down a limited number of trial calls are let through
// (half-open). A trial success closes the breaker; a trial failure opens it
// again for another full cool-down.
//
// One breaker per gateway instance, shared by every concurrent request.
// All counters live behind a single RwLock so transitions can't interleave.
// =============================================================================

use parking_lot::RwLock;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::BreakerSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum CircuitState {
    /// Calls pass through. Failures are being counted.
    Closed,
    /// Calls are short-circuited to the fallback.
    Open,
    /// Cool-down is over; a few trial calls decide what happens next.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

struct CircuitBreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    /// Trial calls currently in flight while half-open.
    trials_in_flight: u32,
    opened_at: Option<Instant>,
    last_state_change: Instant,
    total_trips: u64,
}

pub struct CircuitBreaker {
    /// Used for logging and metrics.
    name: String,
    inner: RwLock<CircuitBreakerInner>,
    failure_threshold: u32,
    reset_timeout: Duration,
    half_open_max_calls: u32,
    success_threshold: u32,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, settings: &BreakerSettings) -> Self {
        let name = name.into();
        info!(
            name = %name,
            failure_threshold = settings.failure_threshold,
            reset_timeout_ms = settings.reset_timeout.as_millis() as u64,
            half_open_max_calls = settings.half_open_max_calls,
            success_threshold = settings.success_threshold,
            "Circuit breaker initialized"
        );

        Self {
            name,
            inner: RwLock::new(CircuitBreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                trials_in_flight: 0,
                opened_at: None,
                last_state_change: Instant::now(),
                total_trips: 0,
            }),
            failure_threshold: settings.failure_threshold.max(1),
            reset_timeout: settings.reset_timeout,
            half_open_max_calls: settings.half_open_max_calls.max(1),
            success_threshold: settings.success_threshold.max(1),
        }
    }

    /// Ask permission to make a call.
    ///
    /// Closed: always yes. Open: no, unless the cool-down has elapsed, in
    /// which case the breaker goes half-open and this call becomes a trial.
    /// Half-open: yes while trial permits remain.
    ///
    /// Every `true` must be followed by exactly one `record_success` or
    /// `record_failure`.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.write();

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled_down = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.reset_timeout)
                    .unwrap_or(true);
                if cooled_down {
                    info!(
                        name = %self.name,
                        "Circuit breaker OPEN -> HALF_OPEN — sending a trial call"
                    );
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    inner.trials_in_flight = 1;
                    inner.last_state_change = Instant::now();
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.trials_in_flight < self.half_open_max_calls {
                    inner.trials_in_flight += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.write();

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
                inner.success_count += 1;

                if inner.success_count >= self.success_threshold {
                    info!(
                        name = %self.name,
                        successes = inner.success_count,
                        "Circuit breaker HALF_OPEN -> CLOSED — dependency is healthy again"
                    );
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.trials_in_flight = 0;
                    inner.opened_at = None;
                    inner.last_state_change = Instant::now();
                }
            }
            CircuitState::Open => {
                // A call admitted before another one tripped the breaker.
            }
        }
    }

    /// Record a failed call. Returns `true` when this failure opened the
    /// breaker.
    pub fn record_failure(&self) -> bool {
        let mut inner = self.inner.write();

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;

                if inner.failure_count >= self.failure_threshold {
                    warn!(
                        name = %self.name,
                        failures = inner.failure_count,
                        "Circuit breaker TRIPPED — CLOSED -> OPEN"
                    );
                    Self::open(&mut inner);
                    true
                } else {
                    warn!(
                        name = %self.name,
                        failures = inner.failure_count,
                        threshold = self.failure_threshold,
                        "Failure recorded — {}/{} before circuit trips",
                        inner.failure_count,
                        self.failure_threshold
                    );
                    false
                }
            }
            CircuitState::HalfOpen => {
                warn!(
                    name = %self.name,
                    "Trial call failed in HALF_OPEN — back to OPEN"
                );
                inner.failure_count = self.failure_threshold;
                Self::open(&mut inner);
                true
            }
            CircuitState::Open => false,
        }
    }

    fn open(inner: &mut CircuitBreakerInner) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.success_count = 0;
        inner.trials_in_flight = 0;
        inner.total_trips += 1;
        inner.last_state_change = Instant::now();
    }

    /// Like `allow_request`, but hands back a permit that settles itself.
    /// A permit dropped without an outcome (the caller was cancelled) gives
    /// its half-open trial slot back instead of leaking it.
    pub fn try_acquire(&self) -> Option<CallPermit<'_>> {
        if self.allow_request() {
            Some(CallPermit {
                breaker: self,
                settled: false,
            })
        } else {
            None
        }
    }

    fn abandon(&self) {
        let mut inner = self.inner.write();
        if inner.state == CircuitState::HalfOpen {
            inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.read().state
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.inner.read();
        CircuitBreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            total_trips: inner.total_trips,
            time_in_current_state_secs: inner.last_state_change.elapsed().as_secs(),
        }
    }
}

/// Permission for one call through the breaker.
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl CallPermit<'_> {
    pub fn succeeded(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    /// Returns `true` when this failure opened the breaker.
    pub fn failed(mut self) -> bool {
        self.settled = true;
        self.breaker.record_failure()
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.abandon();
        }
    }
}

/// A serializable snapshot of circuit breaker state for the metrics endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CircuitBreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_trips: u64,
    pub time_in_current_state_secs: u64,
}
