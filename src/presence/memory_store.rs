//! In-process presence store for single-instance deployments and tests.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::store::{PresenceError, PresenceStore};

/// Member scores held in a `DashMap`; each operation holds the shard lock
/// for its key, which gives the same per-member atomicity as the Redis
/// script.
#[derive(Default)]
pub struct MemoryPresenceStore {
    members: DashMap<String, i64>,
}

impl MemoryPresenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current score of a member, `None` when absent
    pub fn score(&self, member: &str) -> Option<i64> {
        self.members.get(member).map(|score| *score)
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    fn backend_type(&self) -> &'static str {
        "memory"
    }

    async fn join(&self, member: &str) -> Result<i64, PresenceError> {
        let mut score = self.members.entry(member.to_string()).or_insert(0);
        *score += 1;
        Ok(*score)
    }

    async fn leave(&self, member: &str) -> Result<i64, PresenceError> {
        match self.members.entry(member.to_string()) {
            Entry::Occupied(mut entry) => {
                let remaining = *entry.get() - 1;
                if remaining <= 0 {
                    entry.remove();
                    Ok(0)
                } else {
                    *entry.get_mut() = remaining;
                    Ok(remaining)
                }
            }
            Entry::Vacant(_) => Ok(0),
        }
    }

    async fn count(&self) -> Result<u64, PresenceError> {
        Ok(self.members.len() as u64)
    }

    async fn ping(&self) -> Result<(), PresenceError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_balanced_join_leave_removes_member() {
        let store = MemoryPresenceStore::new();

        assert_eq!(store.join("alice").await.unwrap(), 1);
        assert_eq!(store.join("alice").await.unwrap(), 2);
        assert_eq!(store.count().await.unwrap(), 1);

        assert_eq!(store.leave("alice").await.unwrap(), 1);
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.leave("alice").await.unwrap(), 0);

        assert_eq!(store.count().await.unwrap(), 0);
        assert_eq!(store.score("alice"), None);
    }

    #[tokio::test]
    async fn test_leave_without_join_is_noop() {
        let store = MemoryPresenceStore::new();
        store.join("bob").await.unwrap();

        assert_eq!(store.leave("ghost").await.unwrap(), 0);
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.score("ghost"), None);
        assert_eq!(store.score("bob"), Some(1));
    }

    #[tokio::test]
    async fn test_concurrent_join_leave_never_negative() {
        let store = Arc::new(MemoryPresenceStore::new());
        let mut handles = Vec::new();

        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.join("alice").await.unwrap();
                store.leave("alice").await.unwrap();
                // extra leave must floor at zero
                store.leave("alice").await.unwrap();
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.score("alice"), None);
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
