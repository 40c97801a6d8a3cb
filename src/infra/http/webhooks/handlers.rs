//! Provider webhook intake.
//!
//! Signature verification runs over the raw body bytes before anything is
//! parsed; a payload that cannot be authenticated is never processed.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::counter;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{error, warn};

use staffetta_api_types::HealthResponse;

use crate::application::render_jobs::{RenderError, WebhookDisposition};
use crate::application::webhooks::{SignatureError, WebhookEvent, verify_signature};
use crate::domain::types::Provider;

use super::super::api::error::{ApiError, codes};
use super::{SERVICE_NAME, WebhookState};

const WEBHOOK_TIER: &str = "webhook";
const WEBHOOK_ACTION: &str = "webhook";

#[derive(Debug, Serialize)]
struct WebhookAck {
    received: bool,
    job_id: uuid::Uuid,
    disposition: &'static str,
    /// False when this delivery was a duplicate and changed nothing.
    transitioned: bool,
}

pub async fn receive_webhook(
    State(state): State<WebhookState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Ok(provider) = Provider::try_from(provider.as_str()) else {
        return ApiError::not_found("Unknown webhook provider").into_response();
    };

    // Throttle per provider; a storm of callbacks must not starve the API.
    let decision = state
        .rate_limits
        .check(WEBHOOK_TIER, WEBHOOK_ACTION, provider.as_str())
        .await;
    if !decision.allowed {
        return ApiError::rate_limited(&decision);
    }

    let signature = headers
        .get(provider.signature_header())
        .and_then(|value| value.to_str().ok());

    match verify_signature(&body, signature, state.secret_for(provider)) {
        Ok(()) => {}
        Err(SignatureError::MissingSecret) => {
            error!(
                target = "staffetta::webhooks::security",
                provider = provider.as_str(),
                "webhook secret is not configured; rejecting delivery"
            );
            return ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                codes::SIGNATURE_REQUIRED,
                "Webhook verification is not configured",
                None,
            )
            .into_response();
        }
        Err(SignatureError::MissingSignature) => {
            counter!("staffetta_webhook_invalid_signature_total").increment(1);
            warn!(
                target = "staffetta::webhooks::security",
                provider = provider.as_str(),
                "webhook delivery without signature header"
            );
            return ApiError::signature_required();
        }
        Err(SignatureError::Invalid) => {
            counter!("staffetta_webhook_invalid_signature_total").increment(1);
            warn!(
                target = "staffetta::webhooks::security",
                provider = provider.as_str(),
                "webhook signature did not verify"
            );
            return ApiError::signature_invalid();
        }
    }

    let event = match WebhookEvent::parse(&body) {
        Ok(event) => event,
        Err(err) => {
            return ApiError::bad_request("unparseable webhook payload", Some(err.to_string()))
                .into_response();
        }
    };

    match state.renders.handle_webhook(provider, &event).await {
        Ok(disposition) => {
            let (job_id, label, transitioned) = match disposition {
                WebhookDisposition::Completed {
                    job_id,
                    transitioned,
                } => (job_id, "completed", transitioned),
                WebhookDisposition::Failed {
                    job_id,
                    transitioned,
                } => (job_id, "failed", transitioned),
                WebhookDisposition::InProgress { job_id } => (job_id, "in_progress", false),
            };
            Json(WebhookAck {
                received: true,
                job_id,
                disposition: label,
                transitioned,
            })
            .into_response()
        }
        // Reported, never silently dropped: the provider will retry and an
        // operator can see the 404 in the logs.
        Err(RenderError::NotFound) => ApiError::new(
            StatusCode::NOT_FOUND,
            codes::NOT_FOUND,
            "No render job matches the webhook correlation key",
            Some(format!("correlation key `{}`", event.correlation_key)),
        )
        .into_response(),
        Err(err) => ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            codes::REPO,
            "Webhook processing failed",
            Some(err.to_string()),
        )
        .into_response(),
    }
}

/// Provider-facing health probe.
pub async fn webhook_health(Path(provider): Path<String>) -> Response {
    if Provider::try_from(provider.as_str()).is_err() {
        return ApiError::not_found("Unknown webhook provider").into_response();
    }

    Json(HealthResponse {
        status: "OK".to_string(),
        service: SERVICE_NAME.to_string(),
        timestamp: OffsetDateTime::now_utc(),
    })
    .into_response()
}
