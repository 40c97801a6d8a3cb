use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{AccountsRepo, NewAccountParams, RepoError},
    domain::entities::AccountRecord,
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct AccountRow {
    id: Uuid,
    name: String,
    notify_url: Option<String>,
    created_at: OffsetDateTime,
}

impl From<AccountRow> for AccountRecord {
    fn from(row: AccountRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            notify_url: row.notify_url,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl AccountsRepo for PostgresRepositories {
    async fn create_account(&self, params: NewAccountParams) -> Result<AccountRecord, RepoError> {
        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            INSERT INTO accounts (id, name, notify_url)
            VALUES ($1, $2, $3)
            RETURNING id, name, notify_url, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&params.name)
        .bind(&params.notify_url)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.into())
    }

    async fn find_account(&self, id: Uuid) -> Result<Option<AccountRecord>, RepoError> {
        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT id, name, notify_url, created_at
              FROM accounts
             WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(Into::into))
    }
}
