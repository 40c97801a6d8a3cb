//! Operator endpoints: sweeps, account provisioning, grants, retries, and
//! rate-limit administration.

use std::time::Duration;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use staffetta_api_types::{
    AccountCreateRequest, AccountCreatedResponse, CreditGrantRequest, RateLimitResetRequest,
    SweepResponse,
};

use crate::application::api_keys::IssueApiKeyCommand;
use crate::application::pagination::{LedgerCursor, PageRequest};
use crate::application::repos::NewAccountParams;
use crate::domain::api_keys::ApiScope;

use super::super::api::error::{ApiError, codes};
use super::super::api::handlers::render_error_response;
use super::super::api::models::{
    LedgerListQuery, RateLimitStatusQuery, SweepQuery, balance_view, job_view, ledger_page,
    rate_limit_status_view,
};
use super::super::db_health_response;
use super::OpsState;

pub async fn ops_health(State(state): State<OpsState>) -> Response {
    db_health_response(state.db.health_check().await)
}

/// Manual stuck-job sweep, with an optional threshold override.
pub async fn trigger_sweep(
    State(state): State<OpsState>,
    Query(query): Query<SweepQuery>,
) -> Response {
    let threshold = query
        .stale_after_minutes
        .map(|minutes| Duration::from_secs(minutes * 60));

    match state.reconciler.sweep(threshold).await {
        Ok(outcome) => Json(SweepResponse {
            fixed: outcome.fixed,
        })
        .into_response(),
        Err(err) => render_error_response(err),
    }
}

/// Provision an account with an initial render-scoped key. The token is
/// returned exactly once.
pub async fn create_account(
    State(state): State<OpsState>,
    Json(body): Json<AccountCreateRequest>,
) -> Response {
    if body.name.trim().is_empty() {
        return ApiError::bad_request("account name must not be empty", None).into_response();
    }

    let account = match state
        .accounts
        .create_account(NewAccountParams {
            name: body.name.trim().to_string(),
            notify_url: body.notify_url,
        })
        .await
    {
        Ok(account) => account,
        Err(err) => {
            return ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::REPO,
                "Failed to create account",
                Some(err.to_string()),
            )
            .into_response();
        }
    };

    let mut scopes = vec![ApiScope::Render];
    if body.operator {
        scopes.push(ApiScope::Operator);
    }

    let issued = match state
        .api_keys
        .issue(IssueApiKeyCommand {
            account_id: account.id,
            name: format!("{} default key", account.name),
            scopes: scopes.clone(),
        })
        .await
    {
        Ok(issued) => issued,
        Err(err) => {
            return ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::REPO,
                "Failed to issue api key",
                Some(err.to_string()),
            )
            .into_response();
        }
    };

    (
        StatusCode::CREATED,
        Json(AccountCreatedResponse {
            account_id: account.id,
            name: account.name,
            token: issued.token,
            scopes: scopes.iter().map(|s| s.as_str().to_string()).collect(),
        }),
    )
        .into_response()
}

pub async fn grant_credits(
    State(state): State<OpsState>,
    Path(account_id): Path<Uuid>,
    Json(body): Json<CreditGrantRequest>,
) -> Response {
    if body.amount <= 0 {
        return ApiError::bad_request("grant amount must be positive", None).into_response();
    }

    match state
        .credits
        .grant(account_id, body.amount, &body.reason)
        .await
    {
        Ok(balance) => Json(balance_view(balance)).into_response(),
        Err(err) => ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            codes::REPO,
            "Failed to grant credits",
            Some(err.to_string()),
        )
        .into_response(),
    }
}

pub async fn list_ledger(
    State(state): State<OpsState>,
    Path(account_id): Path<Uuid>,
    Query(query): Query<LedgerListQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let cursor = match query
        .cursor
        .as_deref()
        .map(LedgerCursor::decode)
        .transpose()
    {
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

    match state
        .credits
        .list_entries(account_id, PageRequest::new(limit, cursor))
        .await
    {
        Ok(page) => Json(ledger_page(page)).into_response(),
        Err(err) => ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            codes::REPO,
            "Failed to list ledger entries",
            Some(err.to_string()),
        )
        .into_response(),
    }
}

pub async fn get_job(State(state): State<OpsState>, Path(id): Path<Uuid>) -> Response {
    match state.renders.get_job_any(id).await {
        Ok(job) => Json(job_view(job)).into_response(),
        Err(err) => render_error_response(err),
    }
}

/// Operator-only `failed -> pending` retry: re-deducts the recorded cost and
/// resubmits to the provider.
pub async fn retry_job(State(state): State<OpsState>, Path(id): Path<Uuid>) -> Response {
    match state.renders.reset_for_retry(id).await {
        Ok(job) => Json(job_view(job)).into_response(),
        Err(err) => render_error_response(err),
    }
}

/// Poll the provider for a job whose webhook never arrived and apply the
/// result through the normal guarded transitions.
pub async fn sync_job(State(state): State<OpsState>, Path(id): Path<Uuid>) -> Response {
    match state.renders.sync_from_provider(id).await {
        Ok(job) => Json(job_view(job)).into_response(),
        Err(err) => render_error_response(err),
    }
}

pub async fn revoke_key(State(state): State<OpsState>, Path(id): Path<Uuid>) -> Response {
    match state.api_keys.revoke(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => ApiError::new(
            StatusCode::NOT_FOUND,
            codes::NOT_FOUND,
            "API key not found",
            Some(err.to_string()),
        )
        .into_response(),
    }
}

pub async fn reset_rate_limit(
    State(state): State<OpsState>,
    Json(body): Json<RateLimitResetRequest>,
) -> Response {
    match state
        .rate_limits
        .reset(&body.action, &body.identifier)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            codes::REPO,
            "Failed to reset rate limit",
            Some(err.to_string()),
        )
        .into_response(),
    }
}

pub async fn rate_limit_status(
    State(state): State<OpsState>,
    Query(query): Query<RateLimitStatusQuery>,
) -> Response {
    match state
        .rate_limits
        .peek(&query.tier, &query.action, &query.identifier)
        .await
    {
        Ok(status) => Json(rate_limit_status_view(status)).into_response(),
        Err(err) => ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::INVALID_INPUT,
            "Failed to read rate limit status",
            Some(err.to_string()),
        )
        .into_response(),
    }
}
