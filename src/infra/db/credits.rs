use async_trait::async_trait;
use sqlx::QueryBuilder;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::pagination::{CursorPage, LedgerCursor, PageRequest},
    application::repos::{CreditLedgerRepo, DeductOutcome, RepoError},
    domain::entities::{CreditBalanceRecord, CreditLedgerEntryRecord},
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct BalanceRow {
    account_id: Uuid,
    remaining: i64,
    total: i64,
    updated_at: OffsetDateTime,
}

impl From<BalanceRow> for CreditBalanceRecord {
    fn from(row: BalanceRow) -> Self {
        Self {
            account_id: row.account_id,
            remaining: row.remaining,
            total: row.total,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct LedgerRow {
    id: Uuid,
    account_id: Uuid,
    delta: i64,
    reason: String,
    job_id: Option<Uuid>,
    created_at: OffsetDateTime,
}

impl From<LedgerRow> for CreditLedgerEntryRecord {
    fn from(row: LedgerRow) -> Self {
        Self {
            id: row.id,
            account_id: row.account_id,
            delta: row.delta,
            reason: row.reason,
            job_id: row.job_id,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl CreditLedgerRepo for PostgresRepositories {
    async fn balance(&self, account_id: Uuid) -> Result<Option<CreditBalanceRecord>, RepoError> {
        let row = sqlx::query_as::<_, BalanceRow>(
            r#"
            SELECT account_id, remaining, total, updated_at
              FROM credit_balances
             WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(Into::into))
    }

    async fn deduct(
        &self,
        account_id: Uuid,
        cost: i64,
        reason: &str,
        job_id: Option<Uuid>,
    ) -> Result<DeductOutcome, RepoError> {
        // Row lock first: concurrent deductions for one account serialize
        // here instead of racing a read-then-write.
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        let available: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT remaining
              FROM credit_balances
             WHERE account_id = $1
               FOR UPDATE
            "#,
        )
        .bind(account_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let available = available.unwrap_or(0);
        if available < cost {
            return Ok(DeductOutcome::Insufficient { available });
        }

        let remaining: i64 = sqlx::query_scalar(
            r#"
            UPDATE credit_balances
               SET remaining = remaining - $2,
                   updated_at = now()
             WHERE account_id = $1
            RETURNING remaining
            "#,
        )
        .bind(account_id)
        .bind(cost)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        insert_ledger_entry(&mut tx, account_id, -cost, reason, job_id).await?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(DeductOutcome::Applied { remaining })
    }

    async fn refund(
        &self,
        account_id: Uuid,
        amount: i64,
        reason: &str,
        job_id: Option<Uuid>,
    ) -> Result<CreditBalanceRecord, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        let row = sqlx::query_as::<_, BalanceRow>(
            r#"
            INSERT INTO credit_balances (account_id, remaining, total)
            VALUES ($1, $2, 0)
            ON CONFLICT (account_id) DO UPDATE
               SET remaining = credit_balances.remaining + $2,
                   updated_at = now()
            RETURNING account_id, remaining, total, updated_at
            "#,
        )
        .bind(account_id)
        .bind(amount)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        insert_ledger_entry(&mut tx, account_id, amount, reason, job_id).await?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(row.into())
    }

    async fn grant(
        &self,
        account_id: Uuid,
        amount: i64,
        reason: &str,
    ) -> Result<CreditBalanceRecord, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        let row = sqlx::query_as::<_, BalanceRow>(
            r#"
            INSERT INTO credit_balances (account_id, remaining, total)
            VALUES ($1, $2, $2)
            ON CONFLICT (account_id) DO UPDATE
               SET remaining = credit_balances.remaining + $2,
                   total = credit_balances.total + $2,
                   updated_at = now()
            RETURNING account_id, remaining, total, updated_at
            "#,
        )
        .bind(account_id)
        .bind(amount)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        insert_ledger_entry(&mut tx, account_id, amount, reason, None).await?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(row.into())
    }

    async fn list_entries(
        &self,
        account_id: Uuid,
        page: PageRequest<LedgerCursor>,
    ) -> Result<CursorPage<CreditLedgerEntryRecord>, RepoError> {
        let limit = page.limit.clamp(1, 200);
        let mut qb = QueryBuilder::new(
            "SELECT id, account_id, delta, reason, job_id, created_at
               FROM credit_ledger
              WHERE account_id = ",
        );
        qb.push_bind(account_id);

        if let Some(cursor) = page.cursor {
            let created_at = cursor.created_at();
            let cursor_id = cursor.id();
            qb.push(" AND (");
            qb.push("created_at < ");
            qb.push_bind(created_at);
            qb.push(" OR (created_at = ");
            qb.push_bind(created_at);
            qb.push(" AND id < ");
            qb.push_bind(cursor_id);
            qb.push("))");
        }

        qb.push(" ORDER BY created_at DESC, id DESC ");
        qb.push("LIMIT ");
        qb.push_bind(limit as i64);

        let rows = qb
            .build_query_as::<LedgerRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        let records: Vec<CreditLedgerEntryRecord> = rows.into_iter().map(Into::into).collect();
        let next_cursor = if records.len() as u32 == limit {
            records
                .last()
                .map(|entry| LedgerCursor::new(entry.created_at, entry.id).encode())
        } else {
            None
        };

        Ok(CursorPage::new(records, next_cursor))
    }
}

async fn insert_ledger_entry(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    account_id: Uuid,
    delta: i64,
    reason: &str,
    job_id: Option<Uuid>,
) -> Result<(), RepoError> {
    sqlx::query(
        r#"
        INSERT INTO credit_ledger (id, account_id, delta, reason, job_id)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(account_id)
    .bind(delta)
    .bind(reason)
    .bind(job_id)
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx_error)?;

    Ok(())
}
