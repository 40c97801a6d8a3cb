use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{ApiKeysRepo, CreateApiKeyParams, RepoError},
    domain::api_keys::{ApiKeyRecord, ApiScope},
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct ApiKeyRow {
    id: Uuid,
    account_id: Uuid,
    name: String,
    prefix: String,
    hashed_secret: Vec<u8>,
    scopes: Vec<String>,
    created_at: OffsetDateTime,
    last_used_at: Option<OffsetDateTime>,
    revoked_at: Option<OffsetDateTime>,
}

impl TryFrom<ApiKeyRow> for ApiKeyRecord {
    type Error = RepoError;

    fn try_from(row: ApiKeyRow) -> Result<Self, Self::Error> {
        let mut scopes = Vec::with_capacity(row.scopes.len());
        for scope in &row.scopes {
            let parsed = ApiScope::try_from(scope.as_str()).map_err(|_| {
                RepoError::from_persistence(format!("unknown api scope `{scope}`"))
            })?;
            scopes.push(parsed);
        }

        Ok(Self {
            id: row.id,
            account_id: row.account_id,
            name: row.name,
            prefix: row.prefix,
            hashed_secret: row.hashed_secret,
            scopes,
            created_at: row.created_at,
            last_used_at: row.last_used_at,
            revoked_at: row.revoked_at,
        })
    }
}

const COLUMNS: &str = "id, account_id, name, prefix, hashed_secret, scopes, \
                       created_at, last_used_at, revoked_at";

#[async_trait]
impl ApiKeysRepo for PostgresRepositories {
    async fn create_key(&self, params: CreateApiKeyParams) -> Result<ApiKeyRecord, RepoError> {
        let scopes: Vec<String> = params
            .scopes
            .iter()
            .map(|scope| scope.as_str().to_string())
            .collect();

        let row = sqlx::query_as::<_, ApiKeyRow>(&format!(
            r#"
            INSERT INTO api_keys (id, account_id, name, prefix, hashed_secret, scopes)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(params.account_id)
        .bind(&params.name)
        .bind(&params.prefix)
        .bind(&params.hashed_secret)
        .bind(&scopes)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.try_into()
    }

    async fn find_by_prefix(&self, prefix: &str) -> Result<Option<ApiKeyRecord>, RepoError> {
        let row = sqlx::query_as::<_, ApiKeyRow>(&format!(
            r#"
            SELECT {COLUMNS}
              FROM api_keys
             WHERE prefix = $1
            "#
        ))
        .bind(prefix)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        match row {
            Some(row) => ApiKeyRecord::try_from(row).map(Some),
            None => Ok(None),
        }
    }

    async fn revoke_key(&self, id: Uuid, revoked_at: OffsetDateTime) -> Result<(), RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE api_keys
               SET revoked_at = COALESCE(revoked_at, $2)
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(revoked_at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn update_last_used(&self, id: Uuid, at: OffsetDateTime) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            UPDATE api_keys
               SET last_used_at = $2
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }
}
