//! Shared domain enumerations aligned with persisted database enums.

use serde::{Deserialize, Serialize};

/// Lifecycle of a render job. Transitions only move forward except for the
/// operator-triggered `failed -> pending` reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "render_job_status", rename_all = "snake_case")]
pub enum RenderJobStatus {
    Pending,
    Rendering,
    Complete,
    Failed,
}

impl RenderJobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RenderJobStatus::Pending => "pending",
            RenderJobStatus::Rendering => "rendering",
            RenderJobStatus::Complete => "complete",
            RenderJobStatus::Failed => "failed",
        }
    }

    /// Terminal states accept no further automatic transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, RenderJobStatus::Complete | RenderJobStatus::Failed)
    }

    /// States the stuck-job reconciler is allowed to force-fail.
    pub fn is_active(self) -> bool {
        matches!(self, RenderJobStatus::Pending | RenderJobStatus::Rendering)
    }
}

impl TryFrom<&str> for RenderJobStatus {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "pending" => Ok(RenderJobStatus::Pending),
            "rendering" => Ok(RenderJobStatus::Rendering),
            "complete" => Ok(RenderJobStatus::Complete),
            "failed" => Ok(RenderJobStatus::Failed),
            _ => Err(()),
        }
    }
}

/// Supported upstream render providers (mirrors Postgres enum `render_provider`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "render_provider", rename_all = "snake_case")]
pub enum Provider {
    Shotstack,
    Json2video,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Shotstack => "shotstack",
            Provider::Json2video => "json2video",
        }
    }

    /// Header carrying the webhook signature for this provider.
    pub fn signature_header(self) -> &'static str {
        match self {
            Provider::Shotstack => "x-shotstack-signature",
            Provider::Json2video => "x-json2video-signature",
        }
    }
}

impl TryFrom<&str> for Provider {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "shotstack" => Ok(Provider::Shotstack),
            "json2video" => Ok(Provider::Json2video),
            _ => Err(()),
        }
    }
}

/// Queued background job kinds processed by the apalis workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueJobType {
    ArchiveOutput,
    Notify,
}

impl QueueJobType {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueJobType::ArchiveOutput => "archive_output",
            QueueJobType::Notify => "notify",
        }
    }
}

impl TryFrom<&str> for QueueJobType {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "archive_output" => Ok(QueueJobType::ArchiveOutput),
            "notify" => Ok(QueueJobType::Notify),
            _ => Err(()),
        }
    }
}
