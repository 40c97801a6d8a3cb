//! Postgres-backed repository implementations.

mod accounts;
mod api_keys;
mod credits;
mod queue;
mod rate_limit;
mod render_jobs;
mod util;

pub use util::map_sqlx_error;

use std::sync::Arc;

use sqlx::{
    Postgres, Transaction,
    postgres::{PgPool, PgPoolOptions},
    query,
};

#[derive(Clone)]
pub struct PostgresRepositories {
    pool: Arc<PgPool>,
}

impl PostgresRepositories {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'_, Postgres>, sqlx::Error> {
        self.pool.begin().await
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
    }

    pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        query("SELECT 1").execute(self.pool()).await.map(|_| ())
    }
}
