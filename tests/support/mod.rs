//! In-memory repository implementations shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use staffetta::application::pagination::{CursorPage, JobCursor, LedgerCursor, PageRequest};
use staffetta::application::providers::{
    PollSettings, ProviderError, ProviderRegistry, ProviderRenderState, ProviderRenderStatus,
    ProviderSubmission, RenderProvider,
};
use staffetta::application::repos::{
    AccountsRepo, ApiKeysRepo, CreateApiKeyParams, CreditLedgerRepo, DeductOutcome,
    JobQueryFilter, JobQueueRepo, NewAccountParams, NewQueueJobParams, NewRenderJobParams,
    RenderJobsRepo, RepoError,
};
use staffetta::domain::api_keys::ApiKeyRecord;
use staffetta::domain::entities::{
    AccountRecord, CreditBalanceRecord, CreditLedgerEntryRecord, RenderJobRecord,
};
use staffetta::domain::types::{Provider, RenderJobStatus};

#[derive(Default)]
pub struct MemoryRenderJobsRepo {
    jobs: Mutex<HashMap<Uuid, RenderJobRecord>>,
}

impl MemoryRenderJobsRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backdate a job's creation time; used to stage reconciler scenarios.
    pub async fn age_job(&self, id: Uuid, by: Duration) {
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs.get_mut(&id) {
            job.created_at = job.created_at - by;
        }
    }

    pub async fn snapshot(&self, id: Uuid) -> Option<RenderJobRecord> {
        self.jobs.lock().await.get(&id).cloned()
    }
}

#[async_trait]
impl RenderJobsRepo for MemoryRenderJobsRepo {
    async fn create_job(&self, params: NewRenderJobParams) -> Result<RenderJobRecord, RepoError> {
        let now = OffsetDateTime::now_utc();
        let record = RenderJobRecord {
            id: Uuid::new_v4(),
            account_id: params.account_id,
            provider: params.provider,
            provider_render_id: None,
            status: RenderJobStatus::Pending,
            input: params.input,
            output_url: None,
            stored_path: None,
            cost: params.cost,
            error_reason: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.jobs.lock().await.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_job(&self, id: Uuid) -> Result<Option<RenderJobRecord>, RepoError> {
        Ok(self.jobs.lock().await.get(&id).cloned())
    }

    async fn find_by_correlation(
        &self,
        provider: Provider,
        render_id: &str,
    ) -> Result<Option<RenderJobRecord>, RepoError> {
        Ok(self
            .jobs
            .lock()
            .await
            .values()
            .find(|job| {
                job.provider == provider && job.provider_render_id.as_deref() == Some(render_id)
            })
            .cloned())
    }

    async fn mark_rendering(
        &self,
        id: Uuid,
        provider_render_id: &str,
    ) -> Result<bool, RepoError> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(false);
        };
        if job.status != RenderJobStatus::Pending {
            return Ok(false);
        }
        job.status = RenderJobStatus::Rendering;
        job.provider_render_id = Some(provider_render_id.to_string());
        job.updated_at = OffsetDateTime::now_utc();
        Ok(true)
    }

    async fn complete_if_rendering(
        &self,
        id: Uuid,
        output_url: Option<&str>,
    ) -> Result<bool, RepoError> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(false);
        };
        if job.status != RenderJobStatus::Rendering {
            return Ok(false);
        }
        job.status = RenderJobStatus::Complete;
        if let Some(url) = output_url {
            job.output_url = Some(url.to_string());
        }
        let now = OffsetDateTime::now_utc();
        job.completed_at = Some(now);
        job.updated_at = now;
        Ok(true)
    }

    async fn fail_if_active(&self, id: Uuid, reason: &str) -> Result<bool, RepoError> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(false);
        };
        if !job.status.is_active() {
            return Ok(false);
        }
        job.status = RenderJobStatus::Failed;
        job.error_reason = Some(reason.to_string());
        let now = OffsetDateTime::now_utc();
        job.completed_at = Some(now);
        job.updated_at = now;
        Ok(true)
    }

    async fn reset_for_retry(&self, id: Uuid) -> Result<bool, RepoError> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(false);
        };
        if job.status != RenderJobStatus::Failed {
            return Ok(false);
        }
        job.status = RenderJobStatus::Pending;
        job.provider_render_id = None;
        job.output_url = None;
        job.stored_path = None;
        job.error_reason = None;
        job.completed_at = None;
        job.updated_at = OffsetDateTime::now_utc();
        Ok(true)
    }

    async fn set_stored_path(&self, id: Uuid, stored_path: &str) -> Result<(), RepoError> {
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs.get_mut(&id) {
            job.stored_path = Some(stored_path.to_string());
        }
        Ok(())
    }

    async fn list_jobs(
        &self,
        account_id: Uuid,
        filter: &JobQueryFilter,
        page: PageRequest<JobCursor>,
    ) -> Result<CursorPage<RenderJobRecord>, RepoError> {
        let jobs = self.jobs.lock().await;
        let mut items: Vec<RenderJobRecord> = jobs
            .values()
            .filter(|job| job.account_id == account_id)
            .filter(|job| filter.status.is_none_or(|status| job.status == status))
            .filter(|job| {
                filter
                    .provider
                    .is_none_or(|provider| job.provider == provider)
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        items.truncate(page.limit as usize);
        Ok(CursorPage::new(items, None))
    }

    async fn list_stale(&self, cutoff: OffsetDateTime) -> Result<Vec<RenderJobRecord>, RepoError> {
        let jobs = self.jobs.lock().await;
        Ok(jobs
            .values()
            .filter(|job| job.status.is_active() && job.created_at < cutoff)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct LedgerState {
    balances: HashMap<Uuid, (i64, i64)>,
    entries: Vec<CreditLedgerEntryRecord>,
}

/// Mutex-serialized ledger: the lock plays the role of the row lock, so
/// concurrent deductions observe a consistent balance.
#[derive(Default)]
pub struct MemoryCreditLedgerRepo {
    state: Mutex<LedgerState>,
}

impl MemoryCreditLedgerRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_balance(account_id: Uuid, remaining: i64) -> Self {
        let repo = Self::default();
        {
            let mut state = repo.state.lock().await;
            state.balances.insert(account_id, (remaining, remaining));
        }
        repo
    }

    pub async fn remaining(&self, account_id: Uuid) -> i64 {
        self.state
            .lock()
            .await
            .balances
            .get(&account_id)
            .map(|(remaining, _)| *remaining)
            .unwrap_or(0)
    }

    pub async fn entries(&self) -> Vec<CreditLedgerEntryRecord> {
        self.state.lock().await.entries.clone()
    }
}

fn balance_record(account_id: Uuid, remaining: i64, total: i64) -> CreditBalanceRecord {
    CreditBalanceRecord {
        account_id,
        remaining,
        total,
        updated_at: OffsetDateTime::now_utc(),
    }
}

fn ledger_entry(
    account_id: Uuid,
    delta: i64,
    reason: &str,
    job_id: Option<Uuid>,
) -> CreditLedgerEntryRecord {
    CreditLedgerEntryRecord {
        id: Uuid::new_v4(),
        account_id,
        delta,
        reason: reason.to_string(),
        job_id,
        created_at: OffsetDateTime::now_utc(),
    }
}

#[async_trait]
impl CreditLedgerRepo for MemoryCreditLedgerRepo {
    async fn balance(&self, account_id: Uuid) -> Result<Option<CreditBalanceRecord>, RepoError> {
        let state = self.state.lock().await;
        Ok(state
            .balances
            .get(&account_id)
            .map(|(remaining, total)| balance_record(account_id, *remaining, *total)))
    }

    async fn deduct(
        &self,
        account_id: Uuid,
        cost: i64,
        reason: &str,
        job_id: Option<Uuid>,
    ) -> Result<DeductOutcome, RepoError> {
        let mut state = self.state.lock().await;
        let available = state
            .balances
            .get(&account_id)
            .map(|(remaining, _)| *remaining)
            .unwrap_or(0);
        if available < cost {
            return Ok(DeductOutcome::Insufficient { available });
        }

        let entry = state.balances.entry(account_id).or_insert((0, 0));
        entry.0 -= cost;
        let remaining = entry.0;
        state
            .entries
            .push(ledger_entry(account_id, -cost, reason, job_id));
        Ok(DeductOutcome::Applied { remaining })
    }

    async fn refund(
        &self,
        account_id: Uuid,
        amount: i64,
        reason: &str,
        job_id: Option<Uuid>,
    ) -> Result<CreditBalanceRecord, RepoError> {
        let mut state = self.state.lock().await;
        let entry = state.balances.entry(account_id).or_insert((0, 0));
        entry.0 += amount;
        let (remaining, total) = *entry;
        state
            .entries
            .push(ledger_entry(account_id, amount, reason, job_id));
        Ok(balance_record(account_id, remaining, total))
    }

    async fn grant(
        &self,
        account_id: Uuid,
        amount: i64,
        reason: &str,
    ) -> Result<CreditBalanceRecord, RepoError> {
        let mut state = self.state.lock().await;
        let entry = state.balances.entry(account_id).or_insert((0, 0));
        entry.0 += amount;
        entry.1 += amount;
        let (remaining, total) = *entry;
        state
            .entries
            .push(ledger_entry(account_id, amount, reason, None));
        Ok(balance_record(account_id, remaining, total))
    }

    async fn list_entries(
        &self,
        account_id: Uuid,
        page: PageRequest<LedgerCursor>,
    ) -> Result<CursorPage<CreditLedgerEntryRecord>, RepoError> {
        let state = self.state.lock().await;
        let mut items: Vec<CreditLedgerEntryRecord> = state
            .entries
            .iter()
            .filter(|entry| entry.account_id == account_id)
            .cloned()
            .collect();
        items.reverse();
        items.truncate(page.limit as usize);
        Ok(CursorPage::new(items, None))
    }
}

#[derive(Default)]
pub struct MemoryAccountsRepo {
    accounts: Mutex<HashMap<Uuid, AccountRecord>>,
}

impl MemoryAccountsRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountsRepo for MemoryAccountsRepo {
    async fn create_account(&self, params: NewAccountParams) -> Result<AccountRecord, RepoError> {
        let record = AccountRecord {
            id: Uuid::new_v4(),
            name: params.name,
            notify_url: params.notify_url,
            created_at: OffsetDateTime::now_utc(),
        };
        self.accounts
            .lock()
            .await
            .insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_account(&self, id: Uuid) -> Result<Option<AccountRecord>, RepoError> {
        Ok(self.accounts.lock().await.get(&id).cloned())
    }
}

#[derive(Default)]
pub struct MemoryApiKeysRepo {
    keys: Mutex<HashMap<String, ApiKeyRecord>>,
}

impl MemoryApiKeysRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApiKeysRepo for MemoryApiKeysRepo {
    async fn create_key(&self, params: CreateApiKeyParams) -> Result<ApiKeyRecord, RepoError> {
        let record = ApiKeyRecord {
            id: Uuid::new_v4(),
            account_id: params.account_id,
            name: params.name,
            prefix: params.prefix.clone(),
            hashed_secret: params.hashed_secret,
            scopes: params.scopes,
            created_at: OffsetDateTime::now_utc(),
            last_used_at: None,
            revoked_at: None,
        };
        self.keys
            .lock()
            .await
            .insert(params.prefix, record.clone());
        Ok(record)
    }

    async fn find_by_prefix(&self, prefix: &str) -> Result<Option<ApiKeyRecord>, RepoError> {
        Ok(self.keys.lock().await.get(prefix).cloned())
    }

    async fn revoke_key(&self, id: Uuid, revoked_at: OffsetDateTime) -> Result<(), RepoError> {
        let mut keys = self.keys.lock().await;
        for record in keys.values_mut() {
            if record.id == id {
                record.revoked_at = Some(revoked_at);
                return Ok(());
            }
        }
        Err(RepoError::NotFound)
    }

    async fn update_last_used(&self, id: Uuid, at: OffsetDateTime) -> Result<(), RepoError> {
        let mut keys = self.keys.lock().await;
        for record in keys.values_mut() {
            if record.id == id {
                record.last_used_at = Some(at);
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryQueueRepo {
    enqueued: Mutex<Vec<NewQueueJobParams>>,
}

impl MemoryQueueRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn enqueued(&self) -> Vec<NewQueueJobParams> {
        self.enqueued.lock().await.clone()
    }
}

#[async_trait]
impl JobQueueRepo for MemoryQueueRepo {
    async fn enqueue_job(&self, params: NewQueueJobParams) -> Result<String, RepoError> {
        let mut enqueued = self.enqueued.lock().await;
        enqueued.push(params);
        Ok(format!("queued-{}", enqueued.len()))
    }
}

/// Provider stub: hands out sequential render ids; can be configured to
/// refuse submissions or to report a fixed terminal status when polled.
pub struct StubProvider {
    name: Provider,
    fail_submissions: bool,
    poll_status: ProviderRenderStatus,
    counter: Mutex<u32>,
}

impl StubProvider {
    pub fn new(name: Provider) -> Self {
        Self {
            name,
            fail_submissions: false,
            poll_status: ProviderRenderStatus {
                state: ProviderRenderState::Rendering,
                output_url: None,
                error: None,
            },
            counter: Mutex::new(0),
        }
    }

    pub fn failing(name: Provider) -> Self {
        Self {
            fail_submissions: true,
            ..Self::new(name)
        }
    }

    /// Polls report the render finished with the given output URL.
    pub fn completing(name: Provider, output_url: &str) -> Self {
        Self {
            poll_status: ProviderRenderStatus {
                state: ProviderRenderState::Done,
                output_url: Some(output_url.to_string()),
                error: None,
            },
            ..Self::new(name)
        }
    }
}

#[async_trait]
impl RenderProvider for StubProvider {
    fn name(&self) -> Provider {
        self.name
    }

    async fn submit(
        &self,
        _input: &serde_json::Value,
    ) -> Result<ProviderSubmission, ProviderError> {
        if self.fail_submissions {
            return Err(ProviderError::unexpected("stub provider refuses renders"));
        }
        let mut counter = self.counter.lock().await;
        *counter += 1;
        Ok(ProviderSubmission {
            render_id: format!("rdr-{}", *counter),
        })
    }

    async fn fetch_status(
        &self,
        _render_id: &str,
    ) -> Result<ProviderRenderStatus, ProviderError> {
        Ok(self.poll_status.clone())
    }
}

pub fn registry_with(provider: StubProvider) -> ProviderRegistry {
    ProviderRegistry::new().register(Arc::new(provider))
}

/// Tight poll bounds so sync tests finish immediately.
pub fn test_poll_settings() -> PollSettings {
    PollSettings {
        interval: std::time::Duration::from_millis(1),
        max_attempts: 2,
    }
}
