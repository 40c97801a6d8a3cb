pub mod handlers;
mod middleware;

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

use crate::application::api_keys::ApiKeyService;
use crate::application::credits::CreditService;
use crate::application::rate_limit::RateLimitService;
use crate::application::reconciler::StuckJobReconciler;
use crate::application::render_jobs::RenderJobService;
use crate::application::repos::AccountsRepo;
use crate::infra::db::PostgresRepositories;
use crate::infra::http::middleware::{log_responses, set_request_context};

/// State for the operations listener. Everything under `/ops` requires an
/// operator-scoped key; `/health` is unauthenticated for probes.
#[derive(Clone)]
pub struct OpsState {
    pub api_keys: Arc<ApiKeyService>,
    pub accounts: Arc<dyn AccountsRepo>,
    pub credits: CreditService,
    pub renders: RenderJobService,
    pub reconciler: Arc<StuckJobReconciler>,
    pub rate_limits: RateLimitService,
    pub db: Arc<PostgresRepositories>,
}

pub fn build_ops_router(state: OpsState) -> Router {
    let health = Router::new()
        .route("/health", get(handlers::ops_health))
        .with_state(state.clone());

    let ops = Router::new()
        .route("/ops/sweep", post(handlers::trigger_sweep))
        .route("/ops/accounts", post(handlers::create_account))
        .route(
            "/ops/accounts/{id}/credits",
            post(handlers::grant_credits),
        )
        .route("/ops/accounts/{id}/ledger", get(handlers::list_ledger))
        .route("/ops/jobs/{id}", get(handlers::get_job))
        .route("/ops/jobs/{id}/retry", post(handlers::retry_job))
        .route("/ops/jobs/{id}/sync", post(handlers::sync_job))
        .route("/ops/keys/{id}/revoke", post(handlers::revoke_key))
        .route("/ops/rate-limit/reset", post(handlers::reset_rate_limit))
        .route("/ops/rate-limit/status", get(handlers::rate_limit_status))
        .with_state(state.clone())
        .layer(axum_middleware::from_fn_with_state(
            state,
            middleware::ops_auth,
        ));

    health
        .merge(ops)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
