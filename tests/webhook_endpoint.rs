//! Router-level tests for the webhook intake surface: signature
//! enforcement over raw bytes, correlation reporting, and the health probe.

mod support;

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;
use uuid::Uuid;

use staffetta::application::api_keys::ApiKeyService;
use staffetta::application::credits::CreditService;
use staffetta::application::rate_limit::RateLimitService;
use staffetta::application::render_jobs::{RenderJobService, SubmitRenderCommand};
use staffetta::application::webhooks::sign_payload;
use staffetta::config::WebhookSettings;
use staffetta::domain::types::Provider;
use staffetta::infra::http::{ApiState, RouterState, WebhookState, build_webhook_router};
use staffetta::infra::rate_limit::MemoryRateLimitStore;

use support::{
    MemoryApiKeysRepo, MemoryCreditLedgerRepo, MemoryQueueRepo, MemoryRenderJobsRepo,
    StubProvider, registry_with, test_poll_settings,
};

const SECRET: &str = "whsec_router_test";

struct TestApp {
    router: Router,
    service: RenderJobService,
    account_id: Uuid,
}

async fn test_app() -> TestApp {
    let account_id = Uuid::new_v4();
    let jobs = Arc::new(MemoryRenderJobsRepo::new());
    let ledger = Arc::new(MemoryCreditLedgerRepo::with_balance(account_id, 1_000).await);
    let queue = Arc::new(MemoryQueueRepo::new());
    let credits = CreditService::new(ledger);
    let service = RenderJobService::new(
        jobs,
        credits.clone(),
        registry_with(StubProvider::new(Provider::Shotstack)),
        queue,
        test_poll_settings(),
    );

    let rate_limits = RateLimitService::new(Arc::new(MemoryRateLimitStore::new()));
    let api_keys = Arc::new(ApiKeyService::new(Arc::new(MemoryApiKeysRepo::new())));

    let state = RouterState {
        api: ApiState {
            api_keys,
            renders: service.clone(),
            credits,
            rate_limits: rate_limits.clone(),
        },
        webhooks: WebhookState {
            renders: service.clone(),
            rate_limits,
            secrets: WebhookSettings {
                shotstack_secret: Some(SECRET.to_string()),
                json2video_secret: None,
            },
        },
    };

    TestApp {
        router: build_webhook_router(state),
        service,
        account_id,
    }
}

async fn submit_job(app: &TestApp) {
    app.service
        .submit(
            app.account_id,
            SubmitRenderCommand {
                provider: Provider::Shotstack,
                input: serde_json::json!({"timeline": {}}),
                cost: 10,
            },
        )
        .await
        .expect("job submitted");
}

fn webhook_request(body: Vec<u8>, signature: Option<String>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhooks/shotstack")
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header("x-shotstack-signature", signature);
    }
    builder.body(Body::from(body)).expect("request built")
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
async fn health_probe_reports_ok() {
    let app = test_app().await;

    let response = app
        .router
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/webhooks/shotstack")
                .body(Body::empty())
                .expect("request built"),
        )
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "OK");
    assert_eq!(body["service"], "staffetta");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn signed_completion_webhook_is_processed() {
    let app = test_app().await;
    submit_job(&app).await;

    let payload = br#"{"id":"rdr-1","status":"done","url":"https://cdn.example.com/o.mp4"}"#;
    let signature = sign_payload(payload, SECRET);

    let response = app
        .router
        .oneshot(webhook_request(payload.to_vec(), Some(signature)))
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["received"], true);
    assert_eq!(body["disposition"], "completed");
    assert_eq!(body["transitioned"], true);
}

#[tokio::test]
async fn duplicate_delivery_acks_without_side_effects() {
    let app = test_app().await;
    submit_job(&app).await;

    let payload = br#"{"id":"rdr-1","status":"done","url":"https://cdn.example.com/o.mp4"}"#;
    let signature = sign_payload(payload, SECRET);

    let first = app
        .router
        .clone()
        .oneshot(webhook_request(payload.to_vec(), Some(signature.clone())))
        .await
        .expect("first delivery");
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .router
        .oneshot(webhook_request(payload.to_vec(), Some(signature)))
        .await
        .expect("duplicate delivery");
    assert_eq!(second.status(), StatusCode::OK);
    let body = body_json(second).await;
    assert_eq!(body["transitioned"], false);
}

#[tokio::test]
async fn tampered_payload_is_rejected() {
    let app = test_app().await;
    submit_job(&app).await;

    let payload = br#"{"id":"rdr-1","status":"done"}"#.to_vec();
    let signature = sign_payload(&payload, SECRET);

    let mut tampered = payload.clone();
    tampered[10] ^= 0x01;

    let response = app
        .router
        .oneshot(webhook_request(tampered, Some(signature)))
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["code"], "SIGNATURE_INVALID");
}

#[tokio::test]
async fn missing_signature_is_rejected() {
    let app = test_app().await;

    let response = app
        .router
        .oneshot(webhook_request(br#"{"id":"rdr-1","status":"done"}"#.to_vec(), None))
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["code"], "SIGNATURE_REQUIRED");
}

#[tokio::test]
async fn missing_secret_fails_closed() {
    let app = test_app().await;

    let payload = br#"{"project":"prj-1","status":"done"}"#;
    // Signed with some key, but the server has no json2video secret at all.
    let signature = sign_payload(payload, "whsec_other");

    let response = app
        .router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/json2video")
                .header("content-type", "application/json")
                .header("x-json2video-signature", signature)
                .body(Body::from(payload.to_vec()))
                .expect("request built"),
        )
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn unmatched_correlation_returns_not_found() {
    let app = test_app().await;

    let payload = br#"{"id":"rdr-ghost","status":"done"}"#;
    let signature = sign_payload(payload, SECRET);

    let response = app
        .router
        .oneshot(webhook_request(payload.to_vec(), Some(signature)))
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_provider_path_is_not_found() {
    let app = test_app().await;

    let response = app
        .router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/rendermagic")
                .body(Body::from("{}"))
                .expect("request built"),
        )
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
