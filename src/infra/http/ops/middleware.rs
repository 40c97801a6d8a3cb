use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::application::api_keys::ApiAuthError;
use crate::domain::api_keys::ApiScope;

use super::super::api::error::ApiError;
use super::OpsState;

/// Authenticate and require operator scope for every `/ops` route.
pub async fn ops_auth(
    State(state): State<OpsState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let token = extract_token(request.headers().get(axum::http::header::AUTHORIZATION)).or_else(
        || {
            request
                .headers()
                .get("x-api-key")
                .and_then(|v| v.to_str().ok().map(|s| s.to_string()))
        },
    );

    let token = match token {
        Some(value) => value,
        None => return ApiError::unauthorized().into_response(),
    };

    let principal = match state.api_keys.authenticate(&token).await {
        Ok(principal) => principal,
        Err(ApiAuthError::Missing) | Err(ApiAuthError::Invalid) | Err(ApiAuthError::Revoked) => {
            return ApiError::unauthorized().into_response();
        }
    };

    if principal.requires(ApiScope::Operator).is_err() {
        return ApiError::forbidden().into_response();
    }

    request.extensions_mut().insert(principal);
    next.run(request).await
}

fn extract_token(header: Option<&axum::http::HeaderValue>) -> Option<String> {
    let raw = header?.to_str().ok()?;
    let bearer = raw.strip_prefix("Bearer ")?;
    Some(bearer.to_string())
}
