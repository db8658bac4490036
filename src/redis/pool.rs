//! Shared multiplexed Redis connection with circuit breaker integration.

use std::sync::Arc;
use std::time::{Duration, Instant};

use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError, RedisResult};
use tokio::sync::RwLock;

use crate::config::RedisConfig;

use super::{CircuitBreaker, CircuitBreakerStats, ExponentialBackoff, StoreHealth, StoreHealthStats};

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    #[error("Circuit breaker is open")]
    CircuitOpen,
}

/// One multiplexed connection shared by every task, (re)established lazily.
pub struct RedisPool {
    client: Client,
    connection: RwLock<Option<MultiplexedConnection>>,
    circuit_breaker: Arc<CircuitBreaker>,
    health: Arc<StoreHealth>,
    config: RedisConfig,
}

impl RedisPool {
    /// Only validates the URL; no connection is opened yet.
    pub fn new(config: RedisConfig) -> Result<Self, PoolError> {
        Self::with_breaker(config, Arc::new(CircuitBreaker::new()))
    }

    pub fn with_breaker(
        config: RedisConfig,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, PoolError> {
        let client = Client::open(config.url.as_str())?;

        Ok(Self {
            client,
            connection: RwLock::new(None),
            circuit_breaker,
            health: Arc::new(StoreHealth::new()),
            config,
        })
    }

    pub async fn get_connection(&self) -> Result<MultiplexedConnection, PoolError> {
        if !self.circuit_breaker.allow_request() {
            self.health.set_circuit_open();
            return Err(PoolError::CircuitOpen);
        }

        {
            let conn = self.connection.read().await;
            if let Some(ref c) = *conn {
                return Ok(c.clone());
            }
        }

        self.connect().await
    }

    async fn connect(&self) -> Result<MultiplexedConnection, PoolError> {
        let mut guard = self.connection.write().await;

        // Another task may have connected while we waited for the lock
        if let Some(ref c) = *guard {
            return Ok(c.clone());
        }

        self.health.set_reconnecting();

        match self.client.get_multiplexed_tokio_connection().await {
            Ok(conn) => {
                *guard = Some(conn.clone());
                self.circuit_breaker.record_success();
                self.health.set_connected();
                tracing::info!("Redis connection established");
                Ok(conn)
            }
            Err(e) => {
                self.circuit_breaker.record_failure();
                tracing::error!(error = %e, "Failed to connect to Redis");
                Err(PoolError::Redis(e))
            }
        }
    }

    /// Run one command with breaker bookkeeping; dropped connections are
    /// discarded so the next call reconnects.
    pub async fn execute<F, T, Fut>(&self, f: F) -> Result<T, PoolError>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: std::future::Future<Output = RedisResult<T>>,
    {
        let conn = self.get_connection().await?;

        match f(conn).await {
            Ok(result) => {
                self.circuit_breaker.record_success();
                Ok(result)
            }
            Err(e) => {
                if e.is_connection_dropped() || e.is_io_error() {
                    let mut guard = self.connection.write().await;
                    *guard = None;
                    self.health.set_reconnecting();
                }
                self.circuit_breaker.record_failure();
                Err(PoolError::Redis(e))
            }
        }
    }

    /// Round-trip time of a PING
    pub async fn ping(&self) -> Result<Duration, PoolError> {
        let start = Instant::now();
        let _: String = self
            .execute(|mut conn| async move { redis::cmd("PING").query_async(&mut conn).await })
            .await?;
        Ok(start.elapsed())
    }

    /// Try to connect at startup, backing off between attempts. Failure is
    /// logged only: presence degrades until the store shows up.
    pub async fn warm_up(&self) -> bool {
        let mut backoff = ExponentialBackoff::new();
        let attempts = self.config.warm_up_attempts.max(1);

        loop {
            match self.ping().await {
                Ok(rtt) => {
                    tracing::info!(rtt_ms = rtt.as_millis() as u64, "Redis reachable");
                    return true;
                }
                Err(e) if backoff.attempt() + 1 < attempts => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        error = %e,
                        attempt = backoff.attempt(),
                        retry_in_ms = delay.as_millis() as u64,
                        "Redis not reachable yet"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        attempts = attempts,
                        "Redis unreachable, presence will report degraded"
                    );
                    return false;
                }
            }
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.health.is_healthy() && self.circuit_breaker.allow_request()
    }

    pub fn health(&self) -> StoreHealthStats {
        self.health.stats()
    }

    pub fn circuit_stats(&self) -> CircuitBreakerStats {
        self.circuit_breaker.stats()
    }
}
