//! End-to-end exercises of the render-job state machine, credit pairing,
//! and the stuck-job reconciler against in-memory repositories.

mod support;

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use staffetta::application::credits::{CreditError, CreditService};
use staffetta::application::reconciler::StuckJobReconciler;
use staffetta::application::render_jobs::{
    RenderError, RenderJobService, SubmitRenderCommand, WebhookDisposition,
};
use staffetta::application::webhooks::WebhookEvent;
use staffetta::domain::types::{Provider, QueueJobType, RenderJobStatus};

use support::{
    MemoryCreditLedgerRepo, MemoryQueueRepo, MemoryRenderJobsRepo, StubProvider, registry_with,
    test_poll_settings,
};

struct Harness {
    jobs: Arc<MemoryRenderJobsRepo>,
    ledger: Arc<MemoryCreditLedgerRepo>,
    queue: Arc<MemoryQueueRepo>,
    credits: CreditService,
    service: RenderJobService,
    account_id: Uuid,
}

async fn harness(balance: i64, provider: StubProvider) -> Harness {
    let account_id = Uuid::new_v4();
    let jobs = Arc::new(MemoryRenderJobsRepo::new());
    let ledger = Arc::new(MemoryCreditLedgerRepo::with_balance(account_id, balance).await);
    let queue = Arc::new(MemoryQueueRepo::new());
    let credits = CreditService::new(ledger.clone());
    let service = RenderJobService::new(
        jobs.clone(),
        credits.clone(),
        registry_with(provider),
        queue.clone(),
        test_poll_settings(),
    );

    Harness {
        jobs,
        ledger,
        queue,
        credits,
        service,
        account_id,
    }
}

fn render_command(cost: i64) -> SubmitRenderCommand {
    SubmitRenderCommand {
        provider: Provider::Shotstack,
        input: serde_json::json!({"timeline": {"tracks": []}}),
        cost,
    }
}

fn success_webhook(render_id: &str, url: &str) -> WebhookEvent {
    WebhookEvent::parse(
        format!(r#"{{"id":"{render_id}","status":"done","url":"{url}"}}"#).as_bytes(),
    )
    .expect("valid webhook payload")
}

fn failure_webhook(render_id: &str) -> WebhookEvent {
    WebhookEvent::parse(
        format!(r#"{{"id":"{render_id}","status":"failed","error":"render exploded"}}"#)
            .as_bytes(),
    )
    .expect("valid webhook payload")
}

#[tokio::test]
async fn submit_deducts_credits_and_marks_rendering() {
    let h = harness(100, StubProvider::new(Provider::Shotstack)).await;

    let job = h
        .service
        .submit(h.account_id, render_command(30))
        .await
        .expect("submission succeeds");

    assert_eq!(job.status, RenderJobStatus::Rendering);
    assert_eq!(job.provider_render_id.as_deref(), Some("rdr-1"));
    assert_eq!(h.ledger.remaining(h.account_id).await, 70);
}

#[tokio::test]
async fn insufficient_credits_rejects_the_request() {
    let h = harness(10, StubProvider::new(Provider::Shotstack)).await;

    let err = h
        .service
        .submit(h.account_id, render_command(30))
        .await
        .expect_err("submission rejected");

    match err {
        RenderError::Credit(CreditError::Insufficient {
            required,
            available,
        }) => {
            assert_eq!(required, 30);
            assert_eq!(available, 10);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // Nothing deducted, nothing queued.
    assert_eq!(h.ledger.remaining(h.account_id).await, 10);
    assert!(h.queue.enqueued().await.is_empty());
}

#[tokio::test]
async fn duplicate_completion_webhook_archives_and_notifies_once() {
    let h = harness(100, StubProvider::new(Provider::Shotstack)).await;
    let job = h
        .service
        .submit(h.account_id, render_command(30))
        .await
        .expect("submission succeeds");

    let event = success_webhook("rdr-1", "https://cdn.example.com/out.mp4");

    let first = h
        .service
        .handle_webhook(Provider::Shotstack, &event)
        .await
        .expect("first delivery");
    assert_eq!(
        first,
        WebhookDisposition::Completed {
            job_id: job.id,
            transitioned: true
        }
    );

    let second = h
        .service
        .handle_webhook(Provider::Shotstack, &event)
        .await
        .expect("duplicate delivery");
    assert_eq!(
        second,
        WebhookDisposition::Completed {
            job_id: job.id,
            transitioned: false
        }
    );

    let enqueued = h.queue.enqueued().await;
    let archives = enqueued
        .iter()
        .filter(|params| params.job_type == QueueJobType::ArchiveOutput)
        .count();
    let notifies = enqueued
        .iter()
        .filter(|params| params.job_type == QueueJobType::Notify)
        .count();
    assert_eq!(archives, 1, "exactly one archive trigger");
    assert_eq!(notifies, 1, "exactly one notification");

    let stored = h.jobs.snapshot(job.id).await.expect("job exists");
    assert_eq!(stored.status, RenderJobStatus::Complete);
    assert_eq!(
        stored.output_url.as_deref(),
        Some("https://cdn.example.com/out.mp4")
    );
    // Completion never refunds.
    assert_eq!(h.ledger.remaining(h.account_id).await, 70);
}

#[tokio::test]
async fn failure_webhook_refunds_exactly_once() {
    let h = harness(100, StubProvider::new(Provider::Shotstack)).await;
    let job = h
        .service
        .submit(h.account_id, render_command(40))
        .await
        .expect("submission succeeds");
    assert_eq!(h.ledger.remaining(h.account_id).await, 60);

    let event = failure_webhook("rdr-1");
    let first = h
        .service
        .handle_webhook(Provider::Shotstack, &event)
        .await
        .expect("first delivery");
    assert_eq!(
        first,
        WebhookDisposition::Failed {
            job_id: job.id,
            transitioned: true
        }
    );

    // Round trip: the full cost came back.
    assert_eq!(h.ledger.remaining(h.account_id).await, 100);

    let second = h
        .service
        .handle_webhook(Provider::Shotstack, &event)
        .await
        .expect("duplicate delivery");
    assert_eq!(
        second,
        WebhookDisposition::Failed {
            job_id: job.id,
            transitioned: false
        }
    );
    assert_eq!(h.ledger.remaining(h.account_id).await, 100);

    let refunds = h
        .ledger
        .entries()
        .await
        .into_iter()
        .filter(|entry| entry.delta > 0)
        .count();
    assert_eq!(refunds, 1, "exactly one refund entry");

    let stored = h.jobs.snapshot(job.id).await.expect("job exists");
    assert_eq!(stored.status, RenderJobStatus::Failed);
    assert_eq!(stored.error_reason.as_deref(), Some("render exploded"));
}

#[tokio::test]
async fn unmatched_webhook_is_reported_not_dropped() {
    let h = harness(100, StubProvider::new(Provider::Shotstack)).await;

    let event = success_webhook("rdr-unknown", "https://cdn.example.com/out.mp4");
    let err = h
        .service
        .handle_webhook(Provider::Shotstack, &event)
        .await
        .expect_err("no matching job");
    assert!(matches!(err, RenderError::NotFound));
}

#[tokio::test]
async fn provider_submission_failure_fails_job_and_refunds() {
    let h = harness(100, StubProvider::failing(Provider::Shotstack)).await;

    let err = h
        .service
        .submit(h.account_id, render_command(25))
        .await
        .expect_err("provider refused");
    assert!(matches!(err, RenderError::Submission(_)));

    // Deducted then refunded inside the same request.
    assert_eq!(h.ledger.remaining(h.account_id).await, 100);
    let entries = h.ledger.entries().await;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].delta, -25);
    assert_eq!(entries[1].delta, 25);
}

#[tokio::test]
async fn reconciler_sweeps_a_job_stuck_for_35_minutes() {
    let h = harness(100, StubProvider::new(Provider::Shotstack)).await;
    let job = h
        .service
        .submit(h.account_id, render_command(30))
        .await
        .expect("submission succeeds");
    assert_eq!(h.ledger.remaining(h.account_id).await, 70);

    h.jobs.age_job(job.id, Duration::from_secs(35 * 60)).await;

    let reconciler = StuckJobReconciler::new(
        h.jobs.clone(),
        h.service.clone(),
        Duration::from_secs(30 * 60),
    );
    let outcome = reconciler.sweep(None).await.expect("sweep succeeds");
    assert_eq!(outcome.fixed, vec![job.id]);

    let stored = h.jobs.snapshot(job.id).await.expect("job exists");
    assert_eq!(stored.status, RenderJobStatus::Failed);
    assert!(stored.error_reason.is_some());
    // The owning account got the job's recorded cost back.
    assert_eq!(h.ledger.remaining(h.account_id).await, 100);
}

#[tokio::test]
async fn reconciler_leaves_fresh_jobs_alone() {
    let h = harness(100, StubProvider::new(Provider::Shotstack)).await;
    let job = h
        .service
        .submit(h.account_id, render_command(30))
        .await
        .expect("submission succeeds");

    let reconciler = StuckJobReconciler::new(
        h.jobs.clone(),
        h.service.clone(),
        Duration::from_secs(30 * 60),
    );
    let outcome = reconciler.sweep(None).await.expect("sweep succeeds");
    assert!(outcome.fixed.is_empty());

    let stored = h.jobs.snapshot(job.id).await.expect("job exists");
    assert_eq!(stored.status, RenderJobStatus::Rendering);
}

#[tokio::test]
async fn completion_after_sweep_is_a_no_op() {
    let h = harness(100, StubProvider::new(Provider::Shotstack)).await;
    let job = h
        .service
        .submit(h.account_id, render_command(30))
        .await
        .expect("submission succeeds");
    h.jobs.age_job(job.id, Duration::from_secs(45 * 60)).await;

    let reconciler = StuckJobReconciler::new(
        h.jobs.clone(),
        h.service.clone(),
        Duration::from_secs(30 * 60),
    );
    reconciler.sweep(None).await.expect("sweep succeeds");
    assert_eq!(h.ledger.remaining(h.account_id).await, 100);

    // The legitimate webhook arrives late; the sweep's transition won.
    let event = success_webhook("rdr-1", "https://cdn.example.com/out.mp4");
    let disposition = h
        .service
        .handle_webhook(Provider::Shotstack, &event)
        .await
        .expect("late delivery");
    assert_eq!(
        disposition,
        WebhookDisposition::Completed {
            job_id: job.id,
            transitioned: false
        }
    );

    let stored = h.jobs.snapshot(job.id).await.expect("job exists");
    assert_eq!(stored.status, RenderJobStatus::Failed);
    assert!(h.queue.enqueued().await.is_empty(), "no archive triggered");
}

#[tokio::test]
async fn concurrent_deductions_never_overdraw() {
    let h = harness(50, StubProvider::new(Provider::Shotstack)).await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let credits = h.credits.clone();
        let account_id = h.account_id;
        handles.push(tokio::spawn(async move {
            credits.deduct(account_id, 20, "test deduction", None).await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        if handle.await.expect("task completed").is_ok() {
            succeeded += 1;
        }
    }

    // floor(50 / 20) = 2 winners; the balance never went negative.
    assert_eq!(succeeded, 2);
    assert_eq!(h.ledger.remaining(h.account_id).await, 10);
}

#[tokio::test]
async fn operator_retry_re_deducts_and_resubmits() {
    let h = harness(100, StubProvider::new(Provider::Shotstack)).await;
    let job = h
        .service
        .submit(h.account_id, render_command(30))
        .await
        .expect("submission succeeds");

    let event = failure_webhook("rdr-1");
    h.service
        .handle_webhook(Provider::Shotstack, &event)
        .await
        .expect("failure delivery");
    assert_eq!(h.ledger.remaining(h.account_id).await, 100);

    let retried = h
        .service
        .reset_for_retry(job.id)
        .await
        .expect("retry succeeds");
    assert_eq!(retried.status, RenderJobStatus::Rendering);
    assert_eq!(retried.provider_render_id.as_deref(), Some("rdr-2"));
    assert!(retried.error_reason.is_none());
    assert_eq!(h.ledger.remaining(h.account_id).await, 70);
}

#[tokio::test]
async fn provider_sync_completes_a_job_with_a_lost_webhook() {
    let h = harness(
        100,
        StubProvider::completing(Provider::Shotstack, "https://cdn.example.com/late.mp4"),
    )
    .await;
    let job = h
        .service
        .submit(h.account_id, render_command(30))
        .await
        .expect("submission succeeds");

    let synced = h
        .service
        .sync_from_provider(job.id)
        .await
        .expect("sync succeeds");

    assert_eq!(synced.status, RenderJobStatus::Complete);
    assert_eq!(
        synced.output_url.as_deref(),
        Some("https://cdn.example.com/late.mp4")
    );
    // Completion through sync behaves like completion through a webhook.
    assert_eq!(h.ledger.remaining(h.account_id).await, 70);
    let archives = h
        .queue
        .enqueued()
        .await
        .iter()
        .filter(|params| params.job_type == QueueJobType::ArchiveOutput)
        .count();
    assert_eq!(archives, 1);
}

#[tokio::test]
async fn provider_sync_gives_up_when_the_render_never_settles() {
    // The default stub always reports `rendering`.
    let h = harness(100, StubProvider::new(Provider::Shotstack)).await;
    let job = h
        .service
        .submit(h.account_id, render_command(30))
        .await
        .expect("submission succeeds");

    let err = h
        .service
        .sync_from_provider(job.id)
        .await
        .expect_err("poll budget exhausted");
    assert!(matches!(err, RenderError::Poll(_)));

    // The job is untouched; the reconciler remains the safety net.
    let stored = h.jobs.snapshot(job.id).await.expect("job exists");
    assert_eq!(stored.status, RenderJobStatus::Rendering);
    assert_eq!(h.ledger.remaining(h.account_id).await, 70);
}

#[tokio::test]
async fn retry_of_a_non_failed_job_is_rejected() {
    let h = harness(100, StubProvider::new(Provider::Shotstack)).await;
    let job = h
        .service
        .submit(h.account_id, render_command(30))
        .await
        .expect("submission succeeds");

    let err = h
        .service
        .reset_for_retry(job.id)
        .await
        .expect_err("rendering jobs cannot be retried");
    assert!(matches!(
        err,
        RenderError::NotRetryable {
            status: RenderJobStatus::Rendering
        }
    ));
    // The guard rejected before any deduction.
    assert_eq!(h.ledger.remaining(h.account_id).await, 70);
}
