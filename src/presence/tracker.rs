//! Error-absorbing façade over a [`PresenceStore`].
//!
//! Connection handling must never fail because the counter store is down,
//! so every store error is logged, counted and turned into a degraded flag
//! that the stats page and `/health` report.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::metrics::PresenceMetrics;

use super::store::{PresenceError, PresenceStore};

/// Online-user figure plus whether it can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceReading {
    pub online_users: u64,
    pub degraded: bool,
}

impl PresenceReading {
    pub fn unavailable() -> Self {
        Self {
            online_users: 0,
            degraded: true,
        }
    }
}

pub struct PresenceTracker {
    store: Arc<dyn PresenceStore>,
    degraded: AtomicBool,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn PresenceStore>) -> Self {
        Self {
            store,
            degraded: AtomicBool::new(false),
        }
    }

    pub fn backend_type(&self) -> &'static str {
        self.store.backend_type()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// New score of `member`, or `None` if the store rejected the call
    pub async fn join(&self, member: &str) -> Option<i64> {
        let result = self.store.join(member).await;
        self.absorb("join", member, result)
    }

    pub async fn leave(&self, member: &str) -> Option<i64> {
        let result = self.store.leave(member).await;
        self.absorb("leave", member, result)
    }

    pub async fn count(&self) -> Option<u64> {
        let result = self.store.count().await;
        self.counted(result)
    }

    /// Count for display, bounded by `limit`. Falls back to 0 and
    /// `degraded` on failure; a timeout counts as a failure.
    pub async fn reading_within(&self, limit: Duration) -> PresenceReading {
        let result = within(limit, self.store.count()).await;
        Self::to_reading(self.counted(result))
    }

    /// Probe the store and refresh the degraded flag
    pub async fn ping_within(&self, limit: Duration) -> bool {
        let result = within(limit, self.store.ping()).await;
        self.absorb("ping", "", result).is_some()
    }

    fn counted(&self, result: Result<u64, PresenceError>) -> Option<u64> {
        let count = self.absorb("count", "", result)?;
        PresenceMetrics::set_online_users(count);
        Some(count)
    }

    fn to_reading(count: Option<u64>) -> PresenceReading {
        match count {
            Some(online_users) => PresenceReading {
                online_users,
                degraded: false,
            },
            None => PresenceReading::unavailable(),
        }
    }

    fn absorb<T>(
        &self,
        operation: &'static str,
        member: &str,
        result: Result<T, PresenceError>,
    ) -> Option<T> {
        match result {
            Ok(value) => {
                if self.degraded.swap(false, Ordering::Relaxed) {
                    tracing::info!(backend = self.backend_type(), "Presence store recovered");
                    PresenceMetrics::set_degraded(false);
                }
                Some(value)
            }
            Err(e) => {
                if !self.degraded.swap(true, Ordering::Relaxed) {
                    PresenceMetrics::set_degraded(true);
                }
                PresenceMetrics::record_error(operation);
                tracing::warn!(
                    backend = self.backend_type(),
                    operation = operation,
                    member = %member,
                    error = %e,
                    "Presence store call failed"
                );
                None
            }
        }
    }
}

async fn within<T, F>(limit: Duration, fut: F) -> Result<T, PresenceError>
where
    F: Future<Output = Result<T, PresenceError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(PresenceError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::MemoryPresenceStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    /// Store that fails while `down` is set
    struct FlakyStore {
        inner: MemoryPresenceStore,
        down: AtomicBool,
    }

    impl FlakyStore {
        fn check(&self) -> Result<(), PresenceError> {
            if self.down.load(Ordering::SeqCst) {
                Err(PresenceError::Unavailable("store down".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl PresenceStore for FlakyStore {
        fn backend_type(&self) -> &'static str {
            "flaky"
        }

        async fn join(&self, member: &str) -> Result<i64, PresenceError> {
            self.check()?;
            self.inner.join(member).await
        }

        async fn leave(&self, member: &str) -> Result<i64, PresenceError> {
            self.check()?;
            self.inner.leave(member).await
        }

        async fn count(&self) -> Result<u64, PresenceError> {
            self.check()?;
            self.inner.count().await
        }

        async fn ping(&self) -> Result<(), PresenceError> {
            self.check()
        }
    }

    #[tokio::test]
    async fn test_errors_are_absorbed_and_flag_degraded() {
        let store = Arc::new(FlakyStore {
            inner: MemoryPresenceStore::new(),
            down: AtomicBool::new(true),
        });
        let tracker = PresenceTracker::new(store.clone());

        assert_eq!(tracker.join("alice").await, None);
        assert!(tracker.is_degraded());
        let limit = Duration::from_secs(1);
        assert_eq!(tracker.reading_within(limit).await, PresenceReading::unavailable());
        assert!(!tracker.ping_within(limit).await);

        store.down.store(false, Ordering::SeqCst);
        assert_eq!(tracker.join("alice").await, Some(1));
        assert!(!tracker.is_degraded());

        let reading = tracker.reading_within(limit).await;
        assert_eq!(reading.online_users, 1);
        assert!(!reading.degraded);
    }

    #[tokio::test]
    async fn test_two_connections_same_user() {
        let tracker = PresenceTracker::new(Arc::new(MemoryPresenceStore::new()));

        tracker.join("alice").await;
        tracker.join("alice").await;
        assert_eq!(tracker.count().await, Some(1));

        tracker.leave("alice").await;
        assert_eq!(tracker.count().await, Some(1));
        tracker.leave("alice").await;
        assert_eq!(tracker.count().await, Some(0));

        // never goes negative
        assert_eq!(tracker.leave("alice").await, Some(0));
        assert_eq!(tracker.count().await, Some(0));
    }

    /// Store whose calls never complete
    struct HungStore;

    #[async_trait]
    impl PresenceStore for HungStore {
        fn backend_type(&self) -> &'static str {
            "hung"
        }

        async fn join(&self, _member: &str) -> Result<i64, PresenceError> {
            std::future::pending().await
        }

        async fn leave(&self, _member: &str) -> Result<i64, PresenceError> {
            std::future::pending().await
        }

        async fn count(&self) -> Result<u64, PresenceError> {
            std::future::pending().await
        }

        async fn ping(&self) -> Result<(), PresenceError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_timeout_marks_degraded() {
        let tracker = PresenceTracker::new(Arc::new(HungStore));
        let limit = Duration::from_millis(20);

        assert_eq!(tracker.reading_within(limit).await, PresenceReading::unavailable());
        assert!(tracker.is_degraded());
        assert!(!tracker.ping_within(limit).await);
    }

    #[tokio::test]
    async fn test_bounded_reading_recovers() {
        let tracker = PresenceTracker::new(Arc::new(MemoryPresenceStore::new()));
        tracker.join("alice").await;

        let reading = tracker.reading_within(Duration::from_secs(1)).await;
        assert_eq!(reading.online_users, 1);
        assert!(!reading.degraded);
        assert!(tracker.ping_within(Duration::from_secs(1)).await);
    }
}
