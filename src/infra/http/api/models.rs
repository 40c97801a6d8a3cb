//! Query models and record-to-wire conversions for the consumer API.

use serde::Deserialize;
use staffetta_api_types::{
    BalanceView, JobPage, JobView, LedgerEntryView, LedgerPage, RateLimitStatusView,
};

use crate::application::pagination::CursorPage;
use crate::application::rate_limit::RateLimitStatus;
use crate::domain::entities::{CreditBalanceRecord, CreditLedgerEntryRecord, RenderJobRecord};
use crate::domain::types::{Provider, RenderJobStatus};

#[derive(Debug, Deserialize)]
pub struct RendersListQuery {
    pub limit: Option<u32>,
    pub cursor: Option<String>,
    pub status: Option<RenderJobStatus>,
    pub provider: Option<Provider>,
}

#[derive(Debug, Deserialize)]
pub struct LedgerListQuery {
    pub limit: Option<u32>,
    pub cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RateLimitStatusQuery {
    pub action: String,
    pub identifier: String,
    #[serde(default = "default_tier")]
    pub tier: String,
}

fn default_tier() -> String {
    "standard".to_string()
}

#[derive(Debug, Deserialize)]
pub struct SweepQuery {
    /// Optional threshold override in minutes.
    pub stale_after_minutes: Option<u64>,
}

pub fn job_view(record: RenderJobRecord) -> JobView {
    JobView {
        id: record.id,
        account_id: record.account_id,
        provider: record.provider.as_str().to_string(),
        provider_render_id: record.provider_render_id,
        status: record.status.as_str().to_string(),
        output_url: record.output_url,
        stored_path: record.stored_path,
        cost: record.cost,
        error_reason: record.error_reason,
        created_at: record.created_at,
        updated_at: record.updated_at,
        completed_at: record.completed_at,
    }
}

pub fn job_page(page: CursorPage<RenderJobRecord>) -> JobPage {
    JobPage {
        items: page.items.into_iter().map(job_view).collect(),
        next_cursor: page.next_cursor,
    }
}

pub fn balance_view(record: CreditBalanceRecord) -> BalanceView {
    BalanceView {
        account_id: record.account_id,
        remaining: record.remaining,
        total: record.total,
    }
}

pub fn ledger_entry_view(record: CreditLedgerEntryRecord) -> LedgerEntryView {
    LedgerEntryView {
        id: record.id,
        delta: record.delta,
        reason: record.reason,
        job_id: record.job_id,
        created_at: record.created_at,
    }
}

pub fn ledger_page(page: CursorPage<CreditLedgerEntryRecord>) -> LedgerPage {
    LedgerPage {
        items: page.items.into_iter().map(ledger_entry_view).collect(),
        next_cursor: page.next_cursor,
    }
}

pub fn rate_limit_status_view(status: RateLimitStatus) -> RateLimitStatusView {
    RateLimitStatusView {
        limit: status.limit,
        current_count: status.current_count,
        remaining: status.remaining,
        reset_at: status.reset_at.unix_timestamp(),
        blocked_until: status
            .blocked_until
            .map(|blocked| blocked.unix_timestamp()),
    }
}
