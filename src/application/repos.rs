//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::pagination::{
    CursorPage, JobCursor, LedgerCursor, PageRequest, PaginationError,
};
use crate::domain::api_keys::{ApiKeyRecord, ApiScope};
use crate::domain::entities::{
    AccountRecord, CreditBalanceRecord, CreditLedgerEntryRecord, RenderJobRecord,
};
use crate::domain::types::{Provider, QueueJobType, RenderJobStatus};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
    #[error(transparent)]
    Pagination(#[from] PaginationError),
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct NewAccountParams {
    pub name: String,
    pub notify_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateApiKeyParams {
    pub account_id: Uuid,
    pub name: String,
    pub prefix: String,
    pub hashed_secret: Vec<u8>,
    pub scopes: Vec<ApiScope>,
}

#[derive(Debug, Clone)]
pub struct NewRenderJobParams {
    pub account_id: Uuid,
    pub provider: Provider,
    pub input: serde_json::Value,
    pub cost: i64,
}

#[derive(Debug, Clone, Default)]
pub struct JobQueryFilter {
    pub status: Option<RenderJobStatus>,
    pub provider: Option<Provider>,
}

#[derive(Debug, Clone)]
pub struct NewQueueJobParams {
    pub job_type: QueueJobType,
    pub payload: serde_json::Value,
    pub run_at: OffsetDateTime,
    pub max_attempts: i32,
    pub priority: i32,
}

/// Result of an atomic balance deduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeductOutcome {
    Applied { remaining: i64 },
    Insufficient { available: i64 },
}

#[async_trait]
pub trait AccountsRepo: Send + Sync {
    async fn create_account(&self, params: NewAccountParams) -> Result<AccountRecord, RepoError>;

    async fn find_account(&self, id: Uuid) -> Result<Option<AccountRecord>, RepoError>;
}

#[async_trait]
pub trait ApiKeysRepo: Send + Sync {
    async fn create_key(&self, params: CreateApiKeyParams) -> Result<ApiKeyRecord, RepoError>;

    async fn find_by_prefix(&self, prefix: &str) -> Result<Option<ApiKeyRecord>, RepoError>;

    async fn revoke_key(&self, id: Uuid, revoked_at: OffsetDateTime) -> Result<(), RepoError>;

    async fn update_last_used(&self, id: Uuid, at: OffsetDateTime) -> Result<(), RepoError>;
}

/// Render-job persistence. All transition methods are guarded: they return
/// `true` only when the row actually moved, which is what makes duplicate
/// webhook deliveries and sweep races no-ops.
#[async_trait]
pub trait RenderJobsRepo: Send + Sync {
    async fn create_job(&self, params: NewRenderJobParams) -> Result<RenderJobRecord, RepoError>;

    async fn find_job(&self, id: Uuid) -> Result<Option<RenderJobRecord>, RepoError>;

    /// Look a job up by the provider-assigned render id echoed in webhooks.
    async fn find_by_correlation(
        &self,
        provider: Provider,
        render_id: &str,
    ) -> Result<Option<RenderJobRecord>, RepoError>;

    /// `pending -> rendering`, storing the correlation key.
    async fn mark_rendering(&self, id: Uuid, provider_render_id: &str)
    -> Result<bool, RepoError>;

    /// `rendering -> complete`; persists the output URL on first delivery only.
    async fn complete_if_rendering(
        &self,
        id: Uuid,
        output_url: Option<&str>,
    ) -> Result<bool, RepoError>;

    /// `pending|rendering -> failed` with a recorded reason.
    async fn fail_if_active(&self, id: Uuid, reason: &str) -> Result<bool, RepoError>;

    /// Operator-only `failed -> pending`; clears correlation, output and error.
    async fn reset_for_retry(&self, id: Uuid) -> Result<bool, RepoError>;

    async fn set_stored_path(&self, id: Uuid, stored_path: &str) -> Result<(), RepoError>;

    async fn list_jobs(
        &self,
        account_id: Uuid,
        filter: &JobQueryFilter,
        page: PageRequest<JobCursor>,
    ) -> Result<CursorPage<RenderJobRecord>, RepoError>;

    /// Active (pending/rendering) jobs created before the cutoff.
    async fn list_stale(&self, cutoff: OffsetDateTime) -> Result<Vec<RenderJobRecord>, RepoError>;
}

#[async_trait]
pub trait CreditLedgerRepo: Send + Sync {
    async fn balance(&self, account_id: Uuid) -> Result<Option<CreditBalanceRecord>, RepoError>;

    /// Atomic, lock-protected decrement. Never drives the balance negative.
    async fn deduct(
        &self,
        account_id: Uuid,
        cost: i64,
        reason: &str,
        job_id: Option<Uuid>,
    ) -> Result<DeductOutcome, RepoError>;

    /// Return previously-deducted tokens; lifetime `total` is unchanged.
    async fn refund(
        &self,
        account_id: Uuid,
        amount: i64,
        reason: &str,
        job_id: Option<Uuid>,
    ) -> Result<CreditBalanceRecord, RepoError>;

    /// Operator grant of new tokens; bumps both `remaining` and `total`.
    async fn grant(
        &self,
        account_id: Uuid,
        amount: i64,
        reason: &str,
    ) -> Result<CreditBalanceRecord, RepoError>;

    async fn list_entries(
        &self,
        account_id: Uuid,
        page: PageRequest<LedgerCursor>,
    ) -> Result<CursorPage<CreditLedgerEntryRecord>, RepoError>;
}

#[async_trait]
pub trait JobQueueRepo: Send + Sync {
    async fn enqueue_job(&self, params: NewQueueJobParams) -> Result<String, RepoError>;
}
