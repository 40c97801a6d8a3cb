pub mod api;
mod middleware;
pub mod ops;
pub mod webhooks;

pub use api::{ApiState, build_api_router};
pub use ops::{OpsState, build_ops_router};
pub use webhooks::{WebhookState, build_webhook_router};

use axum::Router;
use axum::extract::FromRef;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use sqlx::Error as SqlxError;

use crate::application::error::ErrorReport;

pub use middleware::{RequestContext, log_responses, set_request_context};

/// State for the public listener: consumer API plus webhook intake.
#[derive(Clone)]
pub struct RouterState {
    pub api: ApiState,
    pub webhooks: WebhookState,
}

impl FromRef<RouterState> for ApiState {
    fn from_ref(state: &RouterState) -> Self {
        state.api.clone()
    }
}

impl FromRef<RouterState> for WebhookState {
    fn from_ref(state: &RouterState) -> Self {
        state.webhooks.clone()
    }
}

/// Assemble the public router: `/api/v1/*` and `/webhooks/*`.
pub fn build_public_router(state: RouterState) -> Router {
    let api = build_api_router(state.clone());
    let webhooks = build_webhook_router(state);

    api.merge(webhooks)
        .layer(axum::middleware::from_fn(set_request_context))
}

fn db_health_response(result: Result<(), SqlxError>) -> Response {
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_error(
                "infra::http::db_health",
                StatusCode::SERVICE_UNAVAILABLE,
                &err,
            )
            .attach(&mut response);
            response
        }
    }
}
