use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::application::api_keys::{ApiAuthError, ApiPrincipal};

use super::error::{ApiError, apply_rate_limit_headers};
use super::state::ApiState;

/// The tier every authenticated consumer call is accounted against.
const API_TIER: &str = "standard";
const API_ACTION: &str = "api";

pub async fn api_auth(
    State(state): State<ApiState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let token =
        extract_token(request.headers().get(axum::http::header::AUTHORIZATION)).or_else(|| {
            request
                .headers()
                .get("x-api-key")
                .and_then(|v| v.to_str().ok().map(|s| s.to_string()))
        });

    let token = match token {
        Some(value) => value,
        None => return ApiError::unauthorized().into_response(),
    };

    let principal = match state.api_keys.authenticate(&token).await {
        Ok(principal) => principal,
        Err(ApiAuthError::Missing) | Err(ApiAuthError::Invalid) => {
            return ApiError::unauthorized().into_response();
        }
        Err(ApiAuthError::Revoked) => {
            return ApiError::new(
                axum::http::StatusCode::UNAUTHORIZED,
                "revoked",
                "API key revoked",
                None,
            )
            .into_response();
        }
    };

    request.extensions_mut().insert(principal);
    next.run(request).await
}

/// Sliding-window accounting keyed by the authenticated account. Every
/// response carries the `X-RateLimit-*` headers; a violation short-circuits
/// with 429 + `Retry-After`.
pub async fn api_rate_limit(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let principal = match request.extensions().get::<ApiPrincipal>() {
        Some(principal) => principal.clone(),
        None => {
            warn!(
                target = "staffetta::api::rate_limit",
                "missing principal in rate limit middleware"
            );
            return ApiError::unauthorized().into_response();
        }
    };

    let decision = state
        .rate_limits
        .check(API_TIER, API_ACTION, &principal.account_id.to_string())
        .await;

    if !decision.allowed {
        return ApiError::rate_limited(&decision);
    }

    let mut response = next.run(request).await;
    apply_rate_limit_headers(&mut response, &decision);
    response
}

fn extract_token(header: Option<&axum::http::HeaderValue>) -> Option<String> {
    let raw = header?.to_str().ok()?;
    let bearer = raw.strip_prefix("Bearer ")?;
    Some(bearer.to_string())
}
