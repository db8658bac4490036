use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;

use crate::config::DatabaseConfig;
use crate::stats::{DatabaseGauge, GaugeError, PoolStats};

#[derive(Debug, Error)]
pub enum PostgresPoolError {
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Lazily connecting PostgreSQL pool; nothing is opened until the first gauge read.
pub struct PostgresPool {
    pool: PgPool,
    views_query: String,
    database_url: String,
}

impl PostgresPool {
    pub fn connect_lazy(config: &DatabaseConfig) -> Result<Self, PostgresPoolError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds as u64))
            .connect_lazy(&config.url)?;

        let pool = Self {
            pool,
            views_query: config.views_query.clone(),
            database_url: config.url.clone(),
        };

        tracing::info!(
            pool_size = config.pool_size,
            url = %pool.database_url_masked(),
            "PostgreSQL pool configured"
        );

        Ok(pool)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Database URL with the password masked, for logging
    pub fn database_url_masked(&self) -> String {
        mask_password(&self.database_url)
    }
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            // "postgres://" has a colon too; only mask when it sits after the scheme
            if url[..colon_pos].contains("//") {
                return format!("{}***{}", &url[..colon_pos + 1], &url[at_pos..]);
            }
        }
    }
    url.to_string()
}

#[async_trait]
impl DatabaseGauge for PostgresPool {
    fn pool_stats(&self) -> PoolStats {
        let open = self.pool.size();
        let idle = self.pool.num_idle() as u32;
        PoolStats {
            max_open: self.pool.options().get_max_connections(),
            open,
            in_use: open.saturating_sub(idle),
            idle,
        }
    }

    async fn ping(&self) -> Result<(), GaugeError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| GaugeError::Backend(e.to_string()))
    }

    async fn total_views(&self) -> Result<i64, GaugeError> {
        sqlx::query_scalar::<_, i64>(&self.views_query)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| GaugeError::Backend(e.to_string()))
    }
}
