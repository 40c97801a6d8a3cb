//! Credit balance and ledger handlers.

use axum::Json;
use axum::extract::{Extension, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use staffetta_api_types::BalanceView;

use crate::application::api_keys::ApiPrincipal;
use crate::application::credits::CreditError;
use crate::application::pagination::{LedgerCursor, PageRequest};

use super::super::error::{ApiError, codes};
use super::super::models::{LedgerListQuery, balance_view, ledger_page};
use super::super::state::ApiState;

pub async fn get_credits(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
) -> Response {
    match state.credits.balance(principal.account_id).await {
        Ok(balance) => Json(balance_view(balance)).into_response(),
        // An account that never received a grant has an empty position.
        Err(CreditError::UnknownAccount(account_id)) => Json(BalanceView {
            account_id,
            remaining: 0,
            total: 0,
        })
        .into_response(),
        Err(err) => ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            codes::REPO,
            "Credit ledger unavailable",
            Some(err.to_string()),
        )
        .into_response(),
    }
}

pub async fn list_ledger(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
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
        .list_entries(principal.account_id, PageRequest::new(limit, cursor))
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
