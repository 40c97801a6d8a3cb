//! Wire types shared by the staffetta server and its CLI client.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// A render job as reported by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    pub id: Uuid,
    pub account_id: Uuid,
    pub provider: String,
    pub provider_render_id: Option<String>,
    pub status: String,
    pub output_url: Option<String>,
    pub stored_path: Option<String>,
    pub cost: i64,
    pub error_reason: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPage {
    pub items: Vec<JobView>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BalanceView {
    pub account_id: Uuid,
    pub remaining: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntryView {
    pub id: Uuid,
    pub delta: i64,
    pub reason: String,
    pub job_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerPage {
    pub items: Vec<LedgerEntryView>,
    pub next_cursor: Option<String>,
}

/// Mutation-free rate-limit window status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitStatusView {
    pub limit: u32,
    pub current_count: u32,
    pub remaining: u32,
    /// Unix seconds at which the window (or active block) resets.
    pub reset_at: i64,
    pub blocked_until: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepResponse {
    pub fixed: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountCreatedResponse {
    pub account_id: Uuid,
    pub name: String,
    /// Freshly issued bearer token; shown exactly once.
    pub token: String,
    pub scopes: Vec<String>,
}

/// Health payload served on `GET /webhooks/{provider}` and `/health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

// --- requests ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderCreateRequest {
    /// Provider name (`shotstack` or `json2video`).
    pub provider: String,
    /// Provider-specific render payload, forwarded verbatim.
    pub input: serde_json::Value,
    /// Cost of this render in credit tokens.
    pub cost: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditGrantRequest {
    pub amount: i64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitResetRequest {
    pub action: String,
    pub identifier: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountCreateRequest {
    pub name: String,
    pub notify_url: Option<String>,
    /// Grant the issued key operator scope as well.
    #[serde(default)]
    pub operator: bool,
}
