//! Sliding-window rate limiting with named policy tiers.
//!
//! The window arithmetic lives in [`evaluate_window`] so every store backend
//! applies identical policy; a backend's only job is to run that evaluation
//! atomically for its key (advisory lock in Postgres, per-entry lock in
//! memory).

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use metrics::counter;
use once_cell::sync::Lazy;
use time::OffsetDateTime;
use tracing::warn;

use crate::application::repos::RepoError;

/// Immutable policy preset selected by name. Tiers centralize limit changes:
/// callers never pass raw numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitTier {
    pub name: &'static str,
    pub max_requests: u32,
    pub window: Duration,
    pub block_duration: Duration,
}

static BUILTIN_TIERS: Lazy<HashMap<&'static str, RateLimitTier>> = Lazy::new(|| {
    let tiers = [
        RateLimitTier {
            name: "standard",
            max_requests: 30,
            window: Duration::from_secs(60),
            block_duration: Duration::from_secs(300),
        },
        RateLimitTier {
            name: "strict",
            max_requests: 5,
            window: Duration::from_secs(60),
            block_duration: Duration::from_secs(600),
        },
        RateLimitTier {
            name: "auth",
            max_requests: 10,
            window: Duration::from_secs(60),
            block_duration: Duration::from_secs(900),
        },
        RateLimitTier {
            name: "webhook",
            max_requests: 120,
            window: Duration::from_secs(60),
            block_duration: Duration::from_secs(60),
        },
    ];
    tiers.into_iter().map(|tier| (tier.name, tier)).collect()
});

/// Look up a built-in tier by name.
pub fn tier(name: &str) -> Option<&'static RateLimitTier> {
    BUILTIN_TIERS.get(name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub current_count: u32,
    pub reset_at: OffsetDateTime,
    pub retry_after: Option<Duration>,
}

impl RateLimitDecision {
    /// Decision used when the store cannot be consulted: the limiter
    /// prioritizes availability and lets the request through.
    pub fn fail_open(tier: &RateLimitTier, now: OffsetDateTime) -> Self {
        Self {
            allowed: true,
            limit: tier.max_requests,
            remaining: tier.max_requests,
            current_count: 0,
            reset_at: now + tier.window,
            retry_after: None,
        }
    }
}

/// Mutation-free view of one key's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub limit: u32,
    pub current_count: u32,
    pub remaining: u32,
    pub reset_at: OffsetDateTime,
    pub blocked_until: Option<OffsetDateTime>,
}

/// Post-evaluation state a store must persist alongside the decision.
#[derive(Debug, Clone)]
pub struct WindowOutcome {
    pub decision: RateLimitDecision,
    pub timestamps: Vec<OffsetDateTime>,
    pub blocked_until: Option<OffsetDateTime>,
}

/// Apply the sliding-window policy to one key's stored state.
///
/// A violation starts a block of `tier.block_duration`, deliberately longer
/// than waiting for the window to roll.
pub fn evaluate_window(
    timestamps: &[OffsetDateTime],
    blocked_until: Option<OffsetDateTime>,
    tier: &RateLimitTier,
    now: OffsetDateTime,
) -> WindowOutcome {
    let window_start = now - tier.window;
    let mut in_window: Vec<OffsetDateTime> = timestamps
        .iter()
        .copied()
        .filter(|ts| *ts > window_start)
        .collect();
    let current_count = in_window.len() as u32;

    if let Some(blocked) = blocked_until
        && blocked > now
    {
        let decision = RateLimitDecision {
            allowed: false,
            limit: tier.max_requests,
            remaining: 0,
            current_count,
            reset_at: blocked,
            retry_after: Some(duration_until(now, blocked)),
        };
        return WindowOutcome {
            decision,
            timestamps: in_window,
            blocked_until: Some(blocked),
        };
    }

    if current_count < tier.max_requests {
        in_window.push(now);
        let reset_at = in_window
            .iter()
            .min()
            .map(|oldest| *oldest + tier.window)
            .unwrap_or(now + tier.window);
        let decision = RateLimitDecision {
            allowed: true,
            limit: tier.max_requests,
            remaining: tier.max_requests - current_count - 1,
            current_count: current_count + 1,
            reset_at,
            retry_after: None,
        };
        return WindowOutcome {
            decision,
            timestamps: in_window,
            blocked_until: None,
        };
    }

    let blocked = now + tier.block_duration;
    let decision = RateLimitDecision {
        allowed: false,
        limit: tier.max_requests,
        remaining: 0,
        current_count,
        reset_at: blocked,
        retry_after: Some(tier.block_duration),
    };
    WindowOutcome {
        decision,
        timestamps: in_window,
        blocked_until: Some(blocked),
    }
}

/// Mutation-free counterpart of [`evaluate_window`] for status peeks.
pub fn peek_window(
    timestamps: &[OffsetDateTime],
    blocked_until: Option<OffsetDateTime>,
    tier: &RateLimitTier,
    now: OffsetDateTime,
) -> RateLimitStatus {
    let window_start = now - tier.window;
    let in_window: Vec<OffsetDateTime> = timestamps
        .iter()
        .copied()
        .filter(|ts| *ts > window_start)
        .collect();
    let current_count = in_window.len() as u32;
    let active_block = blocked_until.filter(|blocked| *blocked > now);

    let reset_at = active_block
        .or_else(|| in_window.iter().min().map(|oldest| *oldest + tier.window))
        .unwrap_or(now + tier.window);

    RateLimitStatus {
        limit: tier.max_requests,
        current_count,
        remaining: if active_block.is_some() {
            0
        } else {
            tier.max_requests.saturating_sub(current_count)
        },
        reset_at,
        blocked_until: active_block,
    }
}

fn duration_until(now: OffsetDateTime, later: OffsetDateTime) -> Duration {
    let delta = later - now;
    Duration::try_from(delta).unwrap_or(Duration::ZERO)
}

/// Storage backend for window state. `check_and_record` MUST apply the
/// evaluation atomically with respect to concurrent callers of the same key.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn check_and_record(
        &self,
        key: &str,
        tier: &RateLimitTier,
        now: OffsetDateTime,
    ) -> Result<RateLimitDecision, RepoError>;

    async fn peek(
        &self,
        key: &str,
        tier: &RateLimitTier,
        now: OffsetDateTime,
    ) -> Result<RateLimitStatus, RepoError>;

    async fn reset(&self, key: &str) -> Result<(), RepoError>;
}

#[derive(Clone)]
pub struct RateLimitService {
    store: Arc<dyn RateLimitStore>,
}

impl RateLimitService {
    pub fn new(store: Arc<dyn RateLimitStore>) -> Self {
        Self { store }
    }

    /// Check and record one request against the named tier, keyed by
    /// action + identifier. Fails open when the store is unreachable.
    pub async fn check(&self, tier_name: &str, action: &str, identifier: &str) -> RateLimitDecision {
        let now = OffsetDateTime::now_utc();
        let Some(tier) = tier(tier_name) else {
            warn!(
                target = "staffetta::rate_limit",
                tier = tier_name,
                "unknown rate limit tier; allowing request"
            );
            return RateLimitDecision::fail_open(
                &RateLimitTier {
                    name: "unknown",
                    max_requests: u32::MAX,
                    window: Duration::from_secs(60),
                    block_duration: Duration::from_secs(60),
                },
                now,
            );
        };

        let key = Self::key(action, identifier);
        match self.store.check_and_record(&key, tier, now).await {
            Ok(decision) => {
                if decision.allowed {
                    counter!("staffetta_rate_limit_allowed_total").increment(1);
                } else {
                    counter!("staffetta_rate_limit_blocked_total").increment(1);
                }
                decision
            }
            Err(err) => {
                counter!("staffetta_rate_limit_fail_open_total").increment(1);
                warn!(
                    target = "staffetta::rate_limit",
                    error = %err,
                    key = %key,
                    "rate limit store unavailable; failing open"
                );
                RateLimitDecision::fail_open(tier, now)
            }
        }
    }

    /// Status without recording a request.
    pub async fn peek(
        &self,
        tier_name: &str,
        action: &str,
        identifier: &str,
    ) -> Result<RateLimitStatus, RepoError> {
        let tier = tier(tier_name).ok_or_else(|| {
            RepoError::InvalidInput {
                message: format!("unknown rate limit tier `{tier_name}`"),
            }
        })?;
        let now = OffsetDateTime::now_utc();
        self.store
            .peek(&Self::key(action, identifier), tier, now)
            .await
    }

    /// Drop all window state for the key, clearing any active block.
    pub async fn reset(&self, action: &str, identifier: &str) -> Result<(), RepoError> {
        self.store.reset(&Self::key(action, identifier)).await
    }

    fn key(action: &str, identifier: &str) -> String {
        format!("rl:{action}:{identifier}")
    }
}
