pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod state;

pub use state::ApiState;

use axum::{Router, middleware as axum_middleware, routing::get};

use crate::infra::http::RouterState;
use crate::infra::http::middleware::log_responses;

pub fn build_api_router(state: RouterState) -> Router {
    let api_state = state.api.clone();

    Router::new()
        .route(
            "/api/v1/renders",
            get(handlers::list_renders).post(handlers::create_render),
        )
        .route("/api/v1/renders/{id}", get(handlers::get_render))
        .route("/api/v1/credits", get(handlers::get_credits))
        .route("/api/v1/credits/ledger", get(handlers::list_ledger))
        .route(
            "/api/v1/rate-limit",
            get(handlers::get_rate_limit_status),
        )
        .with_state(state)
        .layer(axum_middleware::from_fn_with_state(
            api_state.clone(),
            middleware::api_rate_limit,
        ))
        .layer(axum_middleware::from_fn_with_state(
            api_state,
            middleware::api_auth,
        ))
        .layer(axum_middleware::from_fn(log_responses))
}
