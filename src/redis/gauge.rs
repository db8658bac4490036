//! Cache gauges read from Redis for the stats page.

use std::time::Duration;

use async_trait::async_trait;

use crate::stats::{CacheGauge, GaugeError};

use super::{PoolError, RedisPool};

const SCAN_BATCH: usize = 500;

impl From<PoolError> for GaugeError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::CircuitOpen => GaugeError::Unavailable("circuit breaker is open".to_string()),
            PoolError::Redis(e) => GaugeError::Backend(e.to_string()),
        }
    }
}

#[async_trait]
impl CacheGauge for RedisPool {
    fn backend_name(&self) -> &'static str {
        "Redis"
    }

    async fn round_trip(&self) -> Result<Duration, GaugeError> {
        Ok(self.ping().await?)
    }

    async fn used_memory(&self) -> Result<u64, GaugeError> {
        let info: String = self
            .execute(|mut conn| async move {
                redis::cmd("INFO").arg("memory").query_async(&mut conn).await
            })
            .await?;

        parse_used_memory(&info)
            .ok_or_else(|| GaugeError::Backend("used_memory missing from INFO".to_string()))
    }

    /// Counts keys with SCAN so a large keyspace never blocks the server
    async fn cached_keys(&self, patterns: &[String]) -> Result<u64, GaugeError> {
        let mut total = 0u64;

        for pattern in patterns {
            let mut cursor = 0u64;
            loop {
                let pattern = pattern.clone();
                let (next, keys): (u64, Vec<String>) = self
                    .execute(|mut conn| async move {
                        redis::cmd("SCAN")
                            .arg(cursor)
                            .arg("MATCH")
                            .arg(&pattern)
                            .arg("COUNT")
                            .arg(SCAN_BATCH)
                            .query_async(&mut conn)
                            .await
                    })
                    .await?;

                total += keys.len() as u64;
                if next == 0 {
                    break;
                }
                cursor = next;
            }
        }

        Ok(total)
    }
}

fn parse_used_memory(info: &str) -> Option<u64> {
    info.lines()
        .find_map(|line| line.strip_prefix("used_memory:"))
        .and_then(|value| value.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_used_memory() {
        let info = "# Memory\r\nused_memory:1048576\r\nused_memory_human:1.00M\r\n";
        assert_eq!(parse_used_memory(info), Some(1_048_576));
    }

    #[test]
    fn test_parse_used_memory_missing() {
        assert_eq!(parse_used_memory("# Memory\r\nmaxmemory:0\r\n"), None);
    }
}
