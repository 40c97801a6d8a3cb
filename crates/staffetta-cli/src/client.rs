use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {message}")]
    Api { status: u16, message: String },
}

/// Thin authenticated JSON client over both staffetta listeners.
pub struct ApiClient {
    http: reqwest::Client,
    api_base: String,
    ops_base: String,
    token: String,
}

impl ApiClient {
    pub fn new(api_base: &str, ops_base: &str, token: &str) -> Result<Self, ClientError> {
        Ok(Self {
            http: reqwest::Client::builder().build()?,
            api_base: api_base.trim_end_matches('/').to_string(),
            ops_base: ops_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    pub async fn get_api<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ClientError> {
        self.request::<T>(self.http.get(format!("{}{path}", self.api_base)).query(query))
            .await
    }

    pub async fn post_api<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, ClientError> {
        self.request::<T>(self.http.post(format!("{}{path}", self.api_base)).json(body))
            .await
    }

    pub async fn get_ops<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ClientError> {
        self.request::<T>(self.http.get(format!("{}{path}", self.ops_base)).query(query))
            .await
    }

    pub async fn post_ops<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, ClientError> {
        self.request::<T>(self.http.post(format!("{}{path}", self.ops_base)).json(body))
            .await
    }

    /// POST whose success response carries no body.
    pub async fn post_ops_empty(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<(), ClientError> {
        let response = self
            .http
            .post(format!("{}{path}", self.ops_base))
            .json(body)
            .bearer_auth(&self.token)
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(());
        }
        Err(Self::api_error(response).await)
    }

    async fn request<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, ClientError> {
        let response = builder.bearer_auth(&self.token).send().await?;

        if response.status().is_success() {
            return Ok(response.json::<T>().await?);
        }
        Err(Self::api_error(response).await)
    }

    async fn api_error(response: reqwest::Response) -> ClientError {
        let status = response.status().as_u16();
        let message = match response.text().await {
            Ok(body) if !body.is_empty() => body,
            _ => "no error body".to_string(),
        };
        ClientError::Api { status, message }
    }
}
