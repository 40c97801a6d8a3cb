use async_trait::async_trait;

use crate::application::repos::{JobQueueRepo, NewQueueJobParams, RepoError};

use super::{PostgresRepositories, map_sqlx_error};

#[async_trait]
impl JobQueueRepo for PostgresRepositories {
    async fn enqueue_job(&self, params: NewQueueJobParams) -> Result<String, RepoError> {
        let id: String = sqlx::query_scalar(
            r#"
            SELECT (apalis.push_job($1, $2::json, $3, $4, $5, $6)).id
            "#,
        )
        .bind(params.job_type.as_str())
        .bind(&params.payload)
        .bind("Pending")
        .bind(params.run_at)
        .bind(params.max_attempts)
        .bind(params.priority)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(id)
    }
}
