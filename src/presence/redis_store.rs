//! Redis sorted-set presence store.
//!
//! Members live in one sorted set (`online_users` by default) with the
//! number of open connections as score. Leaving runs as a Lua script so a
//! concurrent join or leave can never observe or produce a zero score.

use std::sync::Arc;

use async_trait::async_trait;
use redis::Script;

use crate::redis::RedisPool;

use super::store::{PresenceError, PresenceStore};

const LEAVE_SCRIPT: &str = r#"
local score = redis.call('ZSCORE', KEYS[1], ARGV[1])
if not score then
    return 0
end
local remaining = tonumber(score) - 1
if remaining <= 0 then
    redis.call('ZREM', KEYS[1], ARGV[1])
    return 0
end
redis.call('ZADD', KEYS[1], remaining, ARGV[1])
return remaining
"#;

pub struct RedisPresenceStore {
    pool: Arc<RedisPool>,
    key: String,
    leave_script: Script,
}

impl RedisPresenceStore {
    pub fn new(pool: Arc<RedisPool>, key: impl Into<String>) -> Self {
        Self {
            pool,
            key: key.into(),
            leave_script: Script::new(LEAVE_SCRIPT),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    fn backend_type(&self) -> &'static str {
        "redis"
    }

    async fn join(&self, member: &str) -> Result<i64, PresenceError> {
        let key = self.key.as_str();
        let score: f64 = self
            .pool
            .execute(|mut conn| async move {
                redis::cmd("ZINCRBY")
                    .arg(key)
                    .arg(1)
                    .arg(member)
                    .query_async(&mut conn)
                    .await
            })
            .await?;

        Ok(score as i64)
    }

    async fn leave(&self, member: &str) -> Result<i64, PresenceError> {
        let key = self.key.as_str();
        let script = &self.leave_script;
        // EVALSHA, falling back to loading the script on NOSCRIPT
        let remaining: i64 = self
            .pool
            .execute(|mut conn| async move {
                script.key(key).arg(member).invoke_async(&mut conn).await
            })
            .await?;

        Ok(remaining)
    }

    async fn count(&self) -> Result<u64, PresenceError> {
        let key = self.key.as_str();
        let count: u64 = self
            .pool
            .execute(|mut conn| async move {
                redis::cmd("ZCARD").arg(key).query_async(&mut conn).await
            })
            .await?;

        Ok(count)
    }

    async fn ping(&self) -> Result<(), PresenceError> {
        self.pool.ping().await?;
        Ok(())
    }
}
