use std::time::Duration;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::application::error::ErrorReport;
use crate::application::rate_limit::RateLimitDecision;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorMessage,
}

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const FORBIDDEN: &str = "forbidden";
    pub const NOT_FOUND: &str = "not_found";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const INVALID_CURSOR: &str = "invalid_cursor";
    pub const INVALID_INPUT: &str = "invalid_input";
    pub const INSUFFICIENT_TOKENS: &str = "INSUFFICIENT_TOKENS";
    pub const SIGNATURE_REQUIRED: &str = "SIGNATURE_REQUIRED";
    pub const SIGNATURE_INVALID: &str = "SIGNATURE_INVALID";
    pub const PROVIDER: &str = "provider_error";
    pub const REPO: &str = "repo_error";
    pub const CONFLICT: &str = "conflict";
}

#[derive(Debug, Serialize)]
pub struct ApiErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
    hint: Option<String>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: &'static str,
        hint: Option<String>,
    ) -> Self {
        Self {
            status,
            code,
            message,
            hint,
        }
    }

    pub fn bad_request(message: &'static str, hint: Option<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, message, hint)
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            codes::UNAUTHORIZED,
            "API key required",
            None,
        )
    }

    pub fn forbidden() -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            codes::FORBIDDEN,
            "API key lacks required scope",
            None,
        )
    }

    pub fn not_found(message: &'static str) -> Self {
        Self::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, message, None)
    }

    /// HTTP 402 with the shortfall attached in the shape clients render.
    pub fn insufficient_tokens(required: i64, available: i64) -> Response {
        #[derive(Serialize)]
        struct InsufficientTokensBody {
            error: &'static str,
            r#type: &'static str,
            required: i64,
            available: i64,
            message: String,
        }

        let body = InsufficientTokensBody {
            error: "Insufficient credits",
            r#type: codes::INSUFFICIENT_TOKENS,
            required,
            available,
            message: format!("This render costs {required} tokens but only {available} remain"),
        };
        let mut response = (StatusCode::PAYMENT_REQUIRED, Json(body)).into_response();
        ErrorReport::from_message(
            "infra::http::api::credits",
            StatusCode::PAYMENT_REQUIRED,
            format!("insufficient tokens: required={required} available={available}"),
        )
        .attach(&mut response);
        response
    }

    /// HTTP 429 carrying the standard limit headers, `Retry-After`, and a
    /// human-readable countdown.
    pub fn rate_limited(decision: &RateLimitDecision) -> Response {
        #[derive(Serialize)]
        struct RateLimitedBody {
            error: &'static str,
            code: &'static str,
            retry_after_ms: u128,
            message: String,
        }

        let retry_after = decision.retry_after.unwrap_or(Duration::ZERO);
        let body = RateLimitedBody {
            error: "Rate limit exceeded",
            code: codes::RATE_LIMITED,
            retry_after_ms: retry_after.as_millis(),
            message: format!("Too many requests. Try again in {}", countdown(retry_after)),
        };

        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        apply_rate_limit_headers(&mut response, decision);
        if let Ok(value) = axum::http::HeaderValue::from_str(&retry_after.as_secs().to_string()) {
            response
                .headers_mut()
                .insert(axum::http::header::RETRY_AFTER, value);
        }
        ErrorReport::from_message(
            "infra::http::api::rate_limit",
            StatusCode::TOO_MANY_REQUESTS,
            format!("rate_limited: retry_after_ms={}", retry_after.as_millis()),
        )
        .attach(&mut response);
        response
    }

    /// Signature failures on the webhook surface: 401 when absent, 403 when
    /// present but wrong.
    pub fn signature_required() -> Response {
        signature_response(StatusCode::UNAUTHORIZED, codes::SIGNATURE_REQUIRED)
    }

    pub fn signature_invalid() -> Response {
        signature_response(StatusCode::FORBIDDEN, codes::SIGNATURE_INVALID)
    }
}

fn signature_response(status: StatusCode, code: &'static str) -> Response {
    #[derive(Serialize)]
    struct SignatureErrorBody {
        error: &'static str,
        code: &'static str,
    }

    let body = SignatureErrorBody {
        error: "Webhook signature verification failed",
        code,
    };
    let mut response = (status, Json(body)).into_response();
    ErrorReport::from_message("infra::http::webhooks::signature", status, code).attach(&mut response);
    response
}

/// Attach `X-RateLimit-Limit` / `-Remaining` / `-Reset` (unix seconds).
pub fn apply_rate_limit_headers(response: &mut Response, decision: &RateLimitDecision) {
    let headers = response.headers_mut();
    let mut set = |name: &'static str, value: String| {
        if let Ok(value) = axum::http::HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    };
    set("x-ratelimit-limit", decision.limit.to_string());
    set("x-ratelimit-remaining", decision.remaining.to_string());
    set(
        "x-ratelimit-reset",
        decision.reset_at.unix_timestamp().to_string(),
    );
}

fn countdown(duration: Duration) -> String {
    let total = duration.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let hint = self.hint.clone();
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message.to_string(),
                hint: self.hint,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        // Attach a structured report so shared logging middleware can emit rich diagnostics.
        ErrorReport::from_message(
            "infra::http::api",
            self.status,
            format!("{}: {}", self.code, hint.as_deref().unwrap_or(self.message)),
        )
        .attach(&mut response);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn countdown_formats_each_magnitude() {
        assert_eq!(countdown(Duration::from_secs(45)), "45s");
        assert_eq!(countdown(Duration::from_secs(900)), "15m 0s");
        assert_eq!(countdown(Duration::from_secs(3720)), "1h 2m");
    }
}
