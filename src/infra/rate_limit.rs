//! In-process rate-limit store for single-instance deployments and tests.
//!
//! The map's per-entry lock provides the same exclusivity the Postgres
//! backend gets from its advisory lock, but only within one process; a
//! multi-instance deployment must use the Postgres backend.

use async_trait::async_trait;
use dashmap::DashMap;
use time::OffsetDateTime;

use crate::application::rate_limit::{
    RateLimitDecision, RateLimitStatus, RateLimitStore, RateLimitTier, evaluate_window,
    peek_window,
};
use crate::application::repos::RepoError;

#[derive(Debug, Default, Clone)]
struct WindowEntry {
    timestamps: Vec<OffsetDateTime>,
    blocked_until: Option<OffsetDateTime>,
}

#[derive(Debug, Default)]
pub struct MemoryRateLimitStore {
    entries: DashMap<String, WindowEntry>,
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn check_and_record(
        &self,
        key: &str,
        tier: &RateLimitTier,
        now: OffsetDateTime,
    ) -> Result<RateLimitDecision, RepoError> {
        let mut entry = self.entries.entry(key.to_string()).or_default();
        let outcome = evaluate_window(&entry.timestamps, entry.blocked_until, tier, now);
        entry.timestamps = outcome.timestamps;
        entry.blocked_until = outcome.blocked_until;
        Ok(outcome.decision)
    }

    async fn peek(
        &self,
        key: &str,
        tier: &RateLimitTier,
        now: OffsetDateTime,
    ) -> Result<RateLimitStatus, RepoError> {
        let entry = self
            .entries
            .get(key)
            .map(|entry| entry.clone())
            .unwrap_or_default();
        Ok(peek_window(&entry.timestamps, entry.blocked_until, tier, now))
    }

    async fn reset(&self, key: &str) -> Result<(), RepoError> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    fn tier(max: u32) -> RateLimitTier {
        RateLimitTier {
            name: "test",
            max_requests: max,
            window: Duration::from_secs(60),
            block_duration: Duration::from_secs(300),
        }
    }

    #[tokio::test]
    async fn burst_above_the_limit_rejects_the_overflow() {
        let store = MemoryRateLimitStore::new();
        let tier = tier(5);
        let now = OffsetDateTime::now_utc();

        let mut allowed = 0;
        let mut rejected = 0;
        for n in 0..12u64 {
            let decision = store
                .check_and_record("rl:test:user-1", &tier, now + Duration::from_millis(n))
                .await
                .expect("memory store never fails");
            if decision.allowed {
                allowed += 1;
            } else {
                rejected += 1;
                assert!(decision.retry_after.is_some());
            }
        }

        assert_eq!(allowed, 5);
        assert_eq!(rejected, 7);
    }

    #[tokio::test]
    async fn concurrent_bursts_never_over_admit() {
        let store = Arc::new(MemoryRateLimitStore::new());
        let tier = tier(10);
        let now = OffsetDateTime::now_utc();

        let mut handles = Vec::new();
        for _ in 0..40 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .check_and_record("rl:test:shared", &tier, now)
                    .await
                    .expect("memory store never fails")
                    .allowed
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            if handle.await.expect("task completed") {
                allowed += 1;
            }
        }

        assert_eq!(allowed, 10);
    }

    #[tokio::test]
    async fn reset_clears_an_active_block() {
        let store = MemoryRateLimitStore::new();
        let tier = tier(1);
        let now = OffsetDateTime::now_utc();

        store
            .check_and_record("rl:test:user-2", &tier, now)
            .await
            .expect("first request");
        let blocked = store
            .check_and_record("rl:test:user-2", &tier, now + Duration::from_secs(1))
            .await
            .expect("second request");
        assert!(!blocked.allowed);

        store.reset("rl:test:user-2").await.expect("reset");
        let fresh = store
            .check_and_record("rl:test:user-2", &tier, now + Duration::from_secs(2))
            .await
            .expect("post-reset request");
        assert!(fresh.allowed);
    }

    #[tokio::test]
    async fn keys_are_isolated() {
        let store = MemoryRateLimitStore::new();
        let tier = tier(1);
        let now = OffsetDateTime::now_utc();

        store
            .check_and_record("rl:test:a", &tier, now)
            .await
            .expect("first key");
        let other = store
            .check_and_record("rl:test:b", &tier, now)
            .await
            .expect("second key");
        assert!(other.allowed);
    }
}
