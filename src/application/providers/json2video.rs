//! JSON2Video movie API client.

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::ProviderEndpoint;
use crate::domain::types::Provider;

use super::{
    ProviderError, ProviderRenderStatus, ProviderSubmission, RenderProvider,
    normalize_render_state,
};

#[derive(Clone)]
pub struct Json2VideoProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    project: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    movie: Option<StatusResponseBody>,
}

#[derive(Debug, Deserialize)]
struct StatusResponseBody {
    status: Option<String>,
    url: Option<String>,
    message: Option<String>,
}

impl Json2VideoProvider {
    pub fn new(http: reqwest::Client, endpoint: &ProviderEndpoint) -> Self {
        Self {
            http,
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            api_key: endpoint.api_key.clone(),
        }
    }

    fn api_key(&self) -> Result<&str, ProviderError> {
        self.api_key
            .as_deref()
            .ok_or(ProviderError::MissingApiKey {
                provider: Provider::Json2video.as_str(),
            })
    }
}

#[async_trait]
impl RenderProvider for Json2VideoProvider {
    fn name(&self) -> Provider {
        Provider::Json2video
    }

    async fn submit(
        &self,
        input: &serde_json::Value,
    ) -> Result<ProviderSubmission, ProviderError> {
        let api_key = self.api_key()?;
        let response = self
            .http
            .post(format!("{}/movies", self.base_url))
            .header("x-api-key", api_key)
            .json(input)
            .send()
            .await?
            .error_for_status()?;

        let body: SubmitResponse = response.json().await?;
        let render_id = body
            .project
            .ok_or_else(|| ProviderError::unexpected("submit response carried no project code"))?;

        Ok(ProviderSubmission { render_id })
    }

    async fn fetch_status(
        &self,
        render_id: &str,
    ) -> Result<ProviderRenderStatus, ProviderError> {
        let api_key = self.api_key()?;
        let response = self
            .http
            .get(format!("{}/movies", self.base_url))
            .query(&[("project", render_id)])
            .header("x-api-key", api_key)
            .send()
            .await?
            .error_for_status()?;

        let body: StatusResponse = response.json().await?;
        let inner = body
            .movie
            .ok_or_else(|| ProviderError::unexpected("status response carried no movie"))?;

        let raw_state = inner
            .status
            .ok_or_else(|| ProviderError::unexpected("status response carried no status"))?;
        let state = normalize_render_state(&raw_state).ok_or_else(|| {
            ProviderError::unexpected(format!("unknown movie status `{raw_state}`"))
        })?;

        Ok(ProviderRenderStatus {
            state,
            output_url: inner.url,
            error: inner.message,
        })
    }
}
