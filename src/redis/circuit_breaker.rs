//! Circuit breaker guarding calls to the shared counter store.
//!
//! While open, callers fail fast instead of queueing behind a dead
//! connection; presence then reports `degraded` until the store recovers.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening
    pub failure_threshold: u32,
    /// Consecutive half-open successes before closing again
    pub success_threshold: u32,
    /// How long the circuit stays open before a probe is let through
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failures: u32,
    successes: u32,
    changed_at: Instant,
}

pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    config: CircuitBreakerConfig,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub failure_count: u32,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                changed_at: Instant::now(),
            }),
            config,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state, promoting Open -> HalfOpen once the reset timeout elapsed
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        inner.state
    }

    pub fn allow_request(&self) -> bool {
        self.state() != CircuitState::Open
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => inner.failures = 0,
            CircuitState::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= self.config.success_threshold {
                    Self::transition(&mut inner, CircuitState::Closed);
                    tracing::info!("Circuit breaker closed, store recovered");
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.failure_threshold {
                    let failures = inner.failures;
                    Self::transition(&mut inner, CircuitState::Open);
                    tracing::warn!(failures = failures, "Circuit breaker opened");
                }
            }
            CircuitState::HalfOpen => {
                Self::transition(&mut inner, CircuitState::Open);
                tracing::warn!("Circuit breaker reopened, probe failed");
            }
            CircuitState::Open => inner.changed_at = Instant::now(),
        }
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        CircuitBreakerStats {
            state: inner.state,
            failure_count: inner.failures,
        }
    }

    fn refresh(&self, inner: &mut Inner) {
        if inner.state == CircuitState::Open && inner.changed_at.elapsed() >= self.config.reset_timeout {
            Self::transition(inner, CircuitState::HalfOpen);
            tracing::info!("Circuit breaker half-open, allowing a probe");
        }
    }

    fn transition(inner: &mut Inner, next: CircuitState) {
        inner.state = next;
        inner.changed_at = Instant::now();
        inner.successes = 0;
        if next == CircuitState::Closed {
            inner.failures = 0;
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}
