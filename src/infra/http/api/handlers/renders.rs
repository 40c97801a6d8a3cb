//! Render submission and inspection handlers.

use axum::Json;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use crate::application::api_keys::ApiPrincipal;
use crate::application::credits::CreditError;
use crate::application::pagination::{JobCursor, PageRequest};
use crate::application::render_jobs::{RenderError, SubmitRenderCommand};
use crate::application::repos::JobQueryFilter;
use crate::domain::api_keys::ApiScope;
use crate::domain::types::Provider;

use super::super::error::{ApiError, codes};
use super::super::models::{RendersListQuery, job_page, job_view, rate_limit_status_view};
use super::super::state::ApiState;

pub async fn create_render(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Json(body): Json<staffetta_api_types::RenderCreateRequest>,
) -> Response {
    if principal.requires(ApiScope::Render).is_err() {
        return ApiError::forbidden().into_response();
    }

    let Ok(provider) = Provider::try_from(body.provider.as_str()) else {
        return ApiError::bad_request(
            "unknown provider",
            Some(format!("`{}` is not a configured provider", body.provider)),
        )
        .into_response();
    };

    if body.cost <= 0 {
        return ApiError::bad_request("cost must be a positive token amount", None).into_response();
    }

    // Read-only pre-flight; the atomic deduct inside submit stays
    // authoritative under concurrency.
    match state
        .credits
        .check_balance(principal.account_id, body.cost)
        .await
    {
        Ok(check) if !check.has_enough => {
            return ApiError::insufficient_tokens(check.required, check.available);
        }
        Ok(_) => {}
        Err(err) => {
            return ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::REPO,
                "Credit ledger unavailable",
                Some(err.to_string()),
            )
            .into_response();
        }
    }

    let result = state
        .renders
        .submit(
            principal.account_id,
            SubmitRenderCommand {
                provider,
                input: body.input,
                cost: body.cost,
            },
        )
        .await;

    match result {
        Ok(job) => (StatusCode::ACCEPTED, Json(job_view(job))).into_response(),
        Err(err) => render_error_response(err),
    }
}

pub async fn get_render(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path(id): Path<Uuid>,
) -> Response {
    if principal.requires(ApiScope::Render).is_err() {
        return ApiError::forbidden().into_response();
    }

    match state.renders.get_job(principal.account_id, id).await {
        Ok(job) => Json(job_view(job)).into_response(),
        Err(err) => render_error_response(err),
    }
}

pub async fn list_renders(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Query(query): Query<RendersListQuery>,
) -> Response {
    if principal.requires(ApiScope::Render).is_err() {
        return ApiError::forbidden().into_response();
    }

    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let cursor = match query.cursor.as_deref().map(JobCursor::decode).transpose() {
        Ok(cursor) => cursor,
        Err(err) => {
            return ApiError::new(
                StatusCode::BAD_REQUEST,
                codes::INVALID_CURSOR,
                "invalid cursor",
                Some(err.to_string()),
            )
            .into_response();
        }
    };

    let filter = JobQueryFilter {
        status: query.status,
        provider: query.provider,
    };

    match state
        .renders
        .list_jobs(
            principal.account_id,
            &filter,
            PageRequest::new(limit, cursor),
        )
        .await
    {
        Ok(page) => Json(job_page(page)).into_response(),
        Err(err) => render_error_response(err),
    }
}

/// Mutation-free view of the caller's own `standard` window.
pub async fn get_rate_limit_status(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
) -> Response {
    match state
        .rate_limits
        .peek("standard", "api", &principal.account_id.to_string())
        .await
    {
        Ok(status) => Json(rate_limit_status_view(status)).into_response(),
        Err(err) => ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            codes::REPO,
            "Failed to read rate limit status",
            Some(err.to_string()),
        )
        .into_response(),
    }
}

pub(crate) fn render_error_response(err: RenderError) -> Response {
    match err {
        RenderError::Credit(CreditError::Insufficient {
            required,
            available,
        }) => ApiError::insufficient_tokens(required, available),
        RenderError::Credit(inner) => ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            codes::REPO,
            "Credit ledger unavailable",
            Some(inner.to_string()),
        )
        .into_response(),
        RenderError::UnknownProvider(provider) => ApiError::bad_request(
            "unknown provider",
            Some(format!("`{}` is not a configured provider", provider.as_str())),
        )
        .into_response(),
        RenderError::Submission(inner) => ApiError::new(
            StatusCode::BAD_GATEWAY,
            codes::PROVIDER,
            "Provider rejected the render",
            Some(inner.to_string()),
        )
        .into_response(),
        RenderError::NotFound => ApiError::not_found("Render job not found").into_response(),
        RenderError::NotRetryable { status } => ApiError::new(
            StatusCode::CONFLICT,
            codes::CONFLICT,
            "Job is not retryable",
            Some(format!("current status is `{}`", status.as_str())),
        )
        .into_response(),
        RenderError::NotSubmitted => ApiError::new(
            StatusCode::CONFLICT,
            codes::CONFLICT,
            "Job was never submitted to its provider",
            None,
        )
        .into_response(),
        RenderError::Poll(inner) => ApiError::new(
            StatusCode::GATEWAY_TIMEOUT,
            codes::PROVIDER,
            "Provider did not reach a terminal status in time",
            Some(inner.to_string()),
        )
        .into_response(),
        RenderError::Repo(inner) => ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            codes::REPO,
            "Persistence failure",
            Some(inner.to_string()),
        )
        .into_response(),
    }
}
