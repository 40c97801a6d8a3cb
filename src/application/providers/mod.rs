//! Outbound render-provider clients.

mod json2video;
mod shotstack;

pub use json2video::Json2VideoProvider;
pub use shotstack::ShotstackProvider;

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::sleep;

use crate::domain::types::Provider;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("provider returned an unexpected response: {message}")]
    UnexpectedResponse { message: String },
    #[error("no api key configured for provider `{provider}`")]
    MissingApiKey { provider: &'static str },
    #[error("render `{render_id}` still not terminal after {attempts} polls")]
    PollBudgetExhausted { render_id: String, attempts: u32 },
}

impl ProviderError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::UnexpectedResponse {
            message: message.into(),
        }
    }
}

/// Acknowledgement of a submitted render; `render_id` is the correlation
/// key later echoed by webhooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSubmission {
    pub render_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderRenderState {
    Queued,
    Rendering,
    Done,
    Failed,
}

impl ProviderRenderState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProviderRenderState::Done | ProviderRenderState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRenderStatus {
    pub state: ProviderRenderState,
    pub output_url: Option<String>,
    pub error: Option<String>,
}

/// Providers disagree on status vocabulary; collapse the synonyms here so
/// callers only see the four canonical states.
pub(crate) fn normalize_render_state(raw: &str) -> Option<ProviderRenderState> {
    match raw.to_ascii_lowercase().as_str() {
        "queued" | "pending" | "submitted" => Some(ProviderRenderState::Queued),
        "fetching" | "rendering" | "saving" | "running" | "processing" => {
            Some(ProviderRenderState::Rendering)
        }
        "done" | "success" | "completed" | "complete" => Some(ProviderRenderState::Done),
        "failed" | "error" | "cancelled" | "canceled" => Some(ProviderRenderState::Failed),
        _ => None,
    }
}

#[async_trait]
pub trait RenderProvider: Send + Sync {
    fn name(&self) -> Provider;

    async fn submit(&self, input: &serde_json::Value)
    -> Result<ProviderSubmission, ProviderError>;

    async fn fetch_status(&self, render_id: &str)
    -> Result<ProviderRenderStatus, ProviderError>;
}

/// Poll a render until it reaches a terminal state or the attempt budget is
/// spent; the wait never exceeds `interval` x `max_attempts`.
pub async fn poll_until_terminal(
    provider: &dyn RenderProvider,
    render_id: &str,
    interval: Duration,
    max_attempts: u32,
) -> Result<ProviderRenderStatus, ProviderError> {
    for attempt in 1..=max_attempts {
        let status = provider.fetch_status(render_id).await?;
        if status.state.is_terminal() {
            return Ok(status);
        }
        if attempt < max_attempts {
            sleep(interval).await;
        }
    }

    Err(ProviderError::PollBudgetExhausted {
        render_id: render_id.to_string(),
        attempts: max_attempts,
    })
}

/// Bounds for status polling; polls never wait longer than
/// `interval × max_attempts`.
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_attempts: u32,
}

/// Immutable lookup of configured provider clients.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<Provider, Arc<dyn RenderProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, provider: Arc<dyn RenderProvider>) -> Self {
        self.providers.insert(provider.name(), provider);
        self
    }

    pub fn get(&self, provider: Provider) -> Option<Arc<dyn RenderProvider>> {
        self.providers.get(&provider).cloned()
    }
}
