use async_trait::async_trait;
use sqlx::QueryBuilder;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::pagination::{CursorPage, JobCursor, PageRequest},
    application::repos::{JobQueryFilter, NewRenderJobParams, RenderJobsRepo, RepoError},
    domain::entities::RenderJobRecord,
    domain::types::{Provider, RenderJobStatus},
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct RenderJobRow {
    id: Uuid,
    account_id: Uuid,
    provider: Provider,
    provider_render_id: Option<String>,
    status: RenderJobStatus,
    input: serde_json::Value,
    output_url: Option<String>,
    stored_path: Option<String>,
    cost: i64,
    error_reason: Option<String>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
    completed_at: Option<OffsetDateTime>,
}

impl From<RenderJobRow> for RenderJobRecord {
    fn from(row: RenderJobRow) -> Self {
        Self {
            id: row.id,
            account_id: row.account_id,
            provider: row.provider,
            provider_render_id: row.provider_render_id,
            status: row.status,
            input: row.input,
            output_url: row.output_url,
            stored_path: row.stored_path,
            cost: row.cost,
            error_reason: row.error_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        }
    }
}

const COLUMNS: &str = "id, account_id, provider, provider_render_id, status, input, \
                       output_url, stored_path, cost, error_reason, created_at, \
                       updated_at, completed_at";

#[async_trait]
impl RenderJobsRepo for PostgresRepositories {
    async fn create_job(&self, params: NewRenderJobParams) -> Result<RenderJobRecord, RepoError> {
        let row = sqlx::query_as::<_, RenderJobRow>(&format!(
            r#"
            INSERT INTO render_jobs (id, account_id, provider, status, input, cost)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(params.account_id)
        .bind(params.provider)
        .bind(RenderJobStatus::Pending)
        .bind(&params.input)
        .bind(params.cost)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.into())
    }

    async fn find_job(&self, id: Uuid) -> Result<Option<RenderJobRecord>, RepoError> {
        let row = sqlx::query_as::<_, RenderJobRow>(&format!(
            r#"
            SELECT {COLUMNS}
              FROM render_jobs
             WHERE id = $1
            "#
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(Into::into))
    }

    async fn find_by_correlation(
        &self,
        provider: Provider,
        render_id: &str,
    ) -> Result<Option<RenderJobRecord>, RepoError> {
        let row = sqlx::query_as::<_, RenderJobRow>(&format!(
            r#"
            SELECT {COLUMNS}
              FROM render_jobs
             WHERE provider = $1
               AND provider_render_id = $2
            "#
        ))
        .bind(provider)
        .bind(render_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(Into::into))
    }

    async fn mark_rendering(
        &self,
        id: Uuid,
        provider_render_id: &str,
    ) -> Result<bool, RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE render_jobs
               SET status = $3,
                   provider_render_id = $2,
                   updated_at = now()
             WHERE id = $1
               AND status = $4
            "#,
        )
        .bind(id)
        .bind(provider_render_id)
        .bind(RenderJobStatus::Rendering)
        .bind(RenderJobStatus::Pending)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn complete_if_rendering(
        &self,
        id: Uuid,
        output_url: Option<&str>,
    ) -> Result<bool, RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE render_jobs
               SET status = $3,
                   output_url = COALESCE($2, output_url),
                   completed_at = now(),
                   updated_at = now()
             WHERE id = $1
               AND status = $4
            "#,
        )
        .bind(id)
        .bind(output_url)
        .bind(RenderJobStatus::Complete)
        .bind(RenderJobStatus::Rendering)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn fail_if_active(&self, id: Uuid, reason: &str) -> Result<bool, RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE render_jobs
               SET status = $3,
                   error_reason = $2,
                   completed_at = now(),
                   updated_at = now()
             WHERE id = $1
               AND status IN ($4, $5)
            "#,
        )
        .bind(id)
        .bind(reason)
        .bind(RenderJobStatus::Failed)
        .bind(RenderJobStatus::Pending)
        .bind(RenderJobStatus::Rendering)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn reset_for_retry(&self, id: Uuid) -> Result<bool, RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE render_jobs
               SET status = $2,
                   provider_render_id = NULL,
                   output_url = NULL,
                   stored_path = NULL,
                   error_reason = NULL,
                   completed_at = NULL,
                   updated_at = now()
             WHERE id = $1
               AND status = $3
            "#,
        )
        .bind(id)
        .bind(RenderJobStatus::Pending)
        .bind(RenderJobStatus::Failed)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_stored_path(&self, id: Uuid, stored_path: &str) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            UPDATE render_jobs
               SET stored_path = $2,
                   updated_at = now()
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(stored_path)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn list_jobs(
        &self,
        account_id: Uuid,
        filter: &JobQueryFilter,
        page: PageRequest<JobCursor>,
    ) -> Result<CursorPage<RenderJobRecord>, RepoError> {
        let limit = page.limit.clamp(1, 200);
        let mut qb = QueryBuilder::new(format!(
            "SELECT {COLUMNS} FROM render_jobs WHERE account_id = "
        ));
        qb.push_bind(account_id);

        if let Some(status) = filter.status {
            qb.push(" AND status = ");
            qb.push_bind(status);
        }

        if let Some(provider) = filter.provider {
            qb.push(" AND provider = ");
            qb.push_bind(provider);
        }

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
            .build_query_as::<RenderJobRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        let records: Vec<RenderJobRecord> = rows.into_iter().map(Into::into).collect();
        let next_cursor = if records.len() as u32 == limit {
            records
                .last()
                .map(|job| JobCursor::new(job.created_at, job.id).encode())
        } else {
            None
        };

        Ok(CursorPage::new(records, next_cursor))
    }

    async fn list_stale(&self, cutoff: OffsetDateTime) -> Result<Vec<RenderJobRecord>, RepoError> {
        let rows = sqlx::query_as::<_, RenderJobRow>(&format!(
            r#"
            SELECT {COLUMNS}
              FROM render_jobs
             WHERE status IN ($1, $2)
               AND created_at < $3
             ORDER BY created_at ASC
            "#
        ))
        .bind(RenderJobStatus::Pending)
        .bind(RenderJobStatus::Rendering)
        .bind(cutoff)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
