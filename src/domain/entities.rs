//! Domain entities mirrored from persistent storage.

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::types::{Provider, RenderJobStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountRecord {
    pub id: Uuid,
    pub name: String,
    pub notify_url: Option<String>,
    pub created_at: OffsetDateTime,
}

/// A render job and its webhook correlation key (`provider_render_id`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderJobRecord {
    pub id: Uuid,
    pub account_id: Uuid,
    pub provider: Provider,
    pub provider_render_id: Option<String>,
    pub status: RenderJobStatus,
    pub input: serde_json::Value,
    pub output_url: Option<String>,
    pub stored_path: Option<String>,
    pub cost: i64,
    pub error_reason: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
}

/// Per-account credit position. `remaining` never goes negative; the
/// database enforces it and the ledger accessor never bypasses the lock.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CreditBalanceRecord {
    pub account_id: Uuid,
    pub remaining: i64,
    pub total: i64,
    pub updated_at: OffsetDateTime,
}

/// Append-only ledger line. Deductions are negative deltas, refunds and
/// grants positive.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreditLedgerEntryRecord {
    pub id: Uuid,
    pub account_id: Uuid,
    pub delta: i64,
    pub reason: String,
    pub job_id: Option<Uuid>,
    pub created_at: OffsetDateTime,
}
