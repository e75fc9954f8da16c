use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Circuit breaker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Normal operation: calls pass through.
    Closed,
    /// Short-circuit every call until the cool-down elapses.
    Open,
    /// Cool-down elapsed: trial calls allowed until the success threshold
    /// closes the breaker or one failure re-opens it.
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    /// Half-open successes needed to close again.
    pub success_threshold: u32,
    /// Open-state cool-down before a half-open trial.
    pub cooldown: Duration,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    half_open_successes: u32,
    last_failure: Option<Instant>,
}

/// Per-provider breaker shared across every in-flight run; it models the
/// health of the provider, not of any one request. All transitions happen
/// under one lock so concurrent runs observe a consistent state.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: &'static str,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: BreakerConfig) -> Self {
        Self {
            name,
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                last_failure: None,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether a call may go out right now. An Open breaker whose cool-down
    /// has elapsed transitions to HalfOpen as a side effect.
    pub fn can_attempt(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let cooled = inner
                    .last_failure
                    .map(|t| t.elapsed() >= self.config.cooldown)
                    .unwrap_or(true);
                if cooled {
                    info!(breaker = self.name, "circuit breaker entering half-open");
                    inner.state = BreakerState::HalfOpen;
                    inner.half_open_successes = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    info!(breaker = self.name, "circuit breaker closing");
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                    inner.half_open_successes = 0;
                }
            }
            BreakerState::Closed => inner.consecutive_failures = 0,
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures += 1;
        inner.last_failure = Some(Instant::now());
        match inner.state {
            BreakerState::HalfOpen => {
                warn!(breaker = self.name, "half-open trial failed, re-opening");
                inner.state = BreakerState::Open;
                inner.half_open_successes = 0;
            }
            BreakerState::Closed if inner.consecutive_failures >= self.config.failure_threshold => {
                warn!(
                    breaker = self.name,
                    failures = inner.consecutive_failures,
                    "circuit breaker opening"
                );
                inner.state = BreakerState::Open;
            }
            _ => {}
        }
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    /// Manual reset (admin route).
    pub fn reset(&self) {
        let mut inner = self.lock();
        info!(breaker = self.name, old_state = %inner.state, "circuit breaker reset");
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.half_open_successes = 0;
        inner.last_failure = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(cooldown: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            BreakerConfig {
                failure_threshold: 3,
                success_threshold: 2,
                cooldown,
            },
        )
    }

    #[test]
    fn opens_after_consecutive_failure_threshold() {
        let b = breaker(Duration::from_secs(60));
        b.record_failure();
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.can_attempt());

        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.can_attempt(), "open breaker must short-circuit");
    }

    #[test]
    fn success_resets_the_consecutive_counter() {
        let b = breaker(Duration::from_secs(60));
        b.record_failure();
        b.record_failure();
        b.record_success();
        b.record_failure();
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Closed, "counter restarted after success");
    }

    #[test]
    fn half_open_after_cooldown_then_closes_on_successes() {
        let b = breaker(Duration::from_millis(0));
        for _ in 0..3 {
            b.record_failure();
        }
        assert_eq!(b.state(), BreakerState::Open);

        // Zero cool-down: the next attempt check flips to half-open.
        assert!(b.can_attempt());
        assert_eq!(b.state(), BreakerState::HalfOpen);

        b.record_success();
        assert_eq!(b.state(), BreakerState::HalfOpen, "needs success_threshold");
        b.record_success();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let b = breaker(Duration::from_millis(0));
        for _ in 0..3 {
            b.record_failure();
        }
        assert!(b.can_attempt());
        assert_eq!(b.state(), BreakerState::HalfOpen);

        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[test]
    fn reset_returns_to_closed() {
        let b = breaker(Duration::from_secs(60));
        for _ in 0..3 {
            b.record_failure();
        }
        assert_eq!(b.state(), BreakerState::Open);
        b.reset();
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.can_attempt());
    }
}
