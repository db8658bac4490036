//! Redis access layer
//!
//! A single multiplexed connection guarded by a circuit breaker, with
//! exponential backoff for the startup warm-up and a health tracker that
//! feeds the degraded status on the stats page.

mod backoff;
mod circuit_breaker;
mod gauge;
mod health;
mod pool;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use health::{StoreHealth, StoreHealthStats, StoreHealthStatus};
pub use pool::{PoolError, RedisPool};
