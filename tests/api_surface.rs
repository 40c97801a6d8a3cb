//! Consumer API tests: key auth, the insufficient-credit contract, and
//! rate-limit headers on both admitted and rejected requests.

mod support;

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;
use uuid::Uuid;

use staffetta::application::api_keys::{ApiKeyService, IssueApiKeyCommand};
use staffetta::application::credits::CreditService;
use staffetta::application::rate_limit::RateLimitService;
use staffetta::application::render_jobs::RenderJobService;
use staffetta::config::WebhookSettings;
use staffetta::domain::api_keys::ApiScope;
use staffetta::domain::types::Provider;
use staffetta::infra::http::{ApiState, RouterState, WebhookState, build_api_router};
use staffetta::infra::rate_limit::MemoryRateLimitStore;

use support::{
    MemoryApiKeysRepo, MemoryCreditLedgerRepo, MemoryQueueRepo, MemoryRenderJobsRepo,
    StubProvider, registry_with, test_poll_settings,
};

struct TestApp {
    router: Router,
    token: String,
}

async fn test_app(balance: i64) -> TestApp {
    let account_id = Uuid::new_v4();
    let jobs = Arc::new(MemoryRenderJobsRepo::new());
    let ledger = Arc::new(MemoryCreditLedgerRepo::with_balance(account_id, balance).await);
    let queue = Arc::new(MemoryQueueRepo::new());
    let credits = CreditService::new(ledger);
    let renders = RenderJobService::new(
        jobs,
        credits.clone(),
        registry_with(StubProvider::new(Provider::Shotstack)),
        queue,
        test_poll_settings(),
    );

    let api_keys = Arc::new(ApiKeyService::new(Arc::new(MemoryApiKeysRepo::new())));
    let issued = api_keys
        .issue(IssueApiKeyCommand {
            account_id,
            name: "test key".to_string(),
            scopes: vec![ApiScope::Render],
        })
        .await
        .expect("key issued");

    let rate_limits = RateLimitService::new(Arc::new(MemoryRateLimitStore::new()));

    let state = RouterState {
        api: ApiState {
            api_keys,
            renders: renders.clone(),
            credits,
            rate_limits: rate_limits.clone(),
        },
        webhooks: WebhookState {
            renders,
            rate_limits,
            secrets: WebhookSettings {
                shotstack_secret: None,
                json2video_secret: None,
            },
        },
    };

    TestApp {
        router: build_api_router(state),
        token: issued.token,
    }
}

fn render_request(token: Option<&str>, cost: i64) -> Request<Body> {
    let body = serde_json::json!({
        "provider": "shotstack",
        "input": {"timeline": {}},
        "cost": cost,
    });
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/v1/renders")
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("request built")
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body collected")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn requests_without_a_key_are_unauthorized() {
    let app = test_app(100).await;

    let response = app
        .router
        .oneshot(render_request(None, 10))
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn accepted_render_carries_rate_limit_headers() {
    let app = test_app(100).await;

    let response = app
        .router
        .oneshot(render_request(Some(&app.token), 10))
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let headers = response.headers();
    assert_eq!(
        headers
            .get("x-ratelimit-limit")
            .and_then(|v| v.to_str().ok()),
        Some("30")
    );
    assert_eq!(
        headers
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok()),
        Some("29")
    );
    assert!(headers.contains_key("x-ratelimit-reset"));

    let body = body_json(response).await;
    assert_eq!(body["status"], "rendering");
    assert_eq!(body["cost"], 10);
}

#[tokio::test]
async fn insufficient_credits_return_the_402_contract() {
    let app = test_app(5).await;

    let response = app
        .router
        .oneshot(render_request(Some(&app.token), 50))
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let body = body_json(response).await;
    assert_eq!(body["type"], "INSUFFICIENT_TOKENS");
    assert_eq!(body["required"], 50);
    assert_eq!(body["available"], 5);
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn exceeding_the_standard_tier_returns_429_with_retry_after() {
    let app = test_app(10_000).await;

    // The standard tier admits 30 requests per window.
    for n in 0..30 {
        let response = app
            .router
            .clone()
            .oneshot(render_request(Some(&app.token), 1))
            .await
            .expect("router responds");
        assert_eq!(
            response.status(),
            StatusCode::ACCEPTED,
            "request {n} should be admitted"
        );
    }

    let response = app
        .router
        .oneshot(render_request(Some(&app.token), 1))
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));
    assert_eq!(
        response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok()),
        Some("0")
    );
    let body = body_json(response).await;
    assert_eq!(body["code"], "rate_limited");
    assert!(body["retry_after_ms"].as_u64().unwrap_or(0) > 0);
    assert!(
        body["message"]
            .as_str()
            .is_some_and(|message| message.contains("Try again in"))
    );
}

#[tokio::test]
async fn credits_endpoint_reports_the_balance() {
    let app = test_app(250).await;

    let response = app
        .router
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/v1/credits")
                .header("authorization", format!("Bearer {}", app.token))
                .body(Body::empty())
                .expect("request built"),
        )
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["remaining"], 250);
    assert_eq!(body["total"], 250);
}
