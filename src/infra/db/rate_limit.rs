//! Atomic sliding-window accounting in Postgres.
//!
//! The whole check-and-increment runs inside one transaction holding an
//! advisory lock on the key, so concurrent callers of the same key
//! serialize instead of racing a read-filter-upsert sequence.

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::application::rate_limit::{
    RateLimitDecision, RateLimitStatus, RateLimitStore, RateLimitTier, evaluate_window,
    peek_window,
};
use crate::application::repos::RepoError;

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct WindowRow {
    timestamps: Vec<OffsetDateTime>,
    blocked_until: Option<OffsetDateTime>,
}

#[async_trait]
impl RateLimitStore for PostgresRepositories {
    async fn check_and_record(
        &self,
        key: &str,
        tier: &RateLimitTier,
        now: OffsetDateTime,
    ) -> Result<RateLimitDecision, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        let row = sqlx::query_as::<_, WindowRow>(
            r#"
            SELECT timestamps, blocked_until
              FROM rate_limits
             WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let (timestamps, blocked_until) = match row {
            Some(row) => (row.timestamps, row.blocked_until),
            None => (Vec::new(), None),
        };

        let outcome = evaluate_window(&timestamps, blocked_until, tier, now);

        sqlx::query(
            r#"
            INSERT INTO rate_limits (key, timestamps, blocked_until, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (key) DO UPDATE
               SET timestamps = EXCLUDED.timestamps,
                   blocked_until = EXCLUDED.blocked_until,
                   updated_at = now()
            "#,
        )
        .bind(key)
        .bind(&outcome.timestamps)
        .bind(outcome.blocked_until)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(outcome.decision)
    }

    async fn peek(
        &self,
        key: &str,
        tier: &RateLimitTier,
        now: OffsetDateTime,
    ) -> Result<RateLimitStatus, RepoError> {
        let row = sqlx::query_as::<_, WindowRow>(
            r#"
            SELECT timestamps, blocked_until
              FROM rate_limits
             WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        let (timestamps, blocked_until) = match row {
            Some(row) => (row.timestamps, row.blocked_until),
            None => (Vec::new(), None),
        };

        Ok(peek_window(&timestamps, blocked_until, tier, now))
    }

    async fn reset(&self, key: &str) -> Result<(), RepoError> {
        sqlx::query("DELETE FROM rate_limits WHERE key = $1")
            .bind(key)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(())
    }
}
