pub mod handlers;

use axum::{Router, routing::post};

use crate::application::rate_limit::RateLimitService;
use crate::application::render_jobs::RenderJobService;
use crate::config::WebhookSettings;
use crate::domain::types::Provider;
use crate::infra::http::RouterState;
use crate::infra::http::middleware::log_responses;

pub const SERVICE_NAME: &str = "staffetta";

#[derive(Clone)]
pub struct WebhookState {
    pub renders: RenderJobService,
    pub rate_limits: RateLimitService,
    pub secrets: WebhookSettings,
}

impl WebhookState {
    pub fn secret_for(&self, provider: Provider) -> Option<&str> {
        match provider {
            Provider::Shotstack => self.secrets.shotstack_secret.as_deref(),
            Provider::Json2video => self.secrets.json2video_secret.as_deref(),
        }
    }
}

pub fn build_webhook_router(state: RouterState) -> Router {
    Router::new()
        .route(
            "/webhooks/{provider}",
            post(handlers::receive_webhook).get(handlers::webhook_health),
        )
        .with_state(state)
        .layer(axum::middleware::from_fn(log_responses))
}
