//! Best-effort completion callback to the account's configured URL.

use apalis::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::application::repos::{JobQueueRepo, RepoError};
use crate::domain::types::QueueJobType;

use super::{JobWorkerContext, job_failed, queue::enqueue_job};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyJobPayload {
    pub job_id: Uuid,
}

#[derive(Debug, Serialize)]
struct NotificationBody<'a> {
    job_id: Uuid,
    status: &'a str,
    output_url: Option<&'a str>,
    error: Option<&'a str>,
}

pub async fn enqueue_notify_job(
    repo: &(impl JobQueueRepo + ?Sized),
    job_id: Uuid,
) -> Result<String, RepoError> {
    enqueue_job(repo, QueueJobType::Notify, &NotifyJobPayload { job_id }).await
}

/// Deliver the notification once. Failures are logged and swallowed: the
/// job record is the source of truth and the callback is a convenience.
pub async fn process_notify_job(
    payload: NotifyJobPayload,
    ctx: Data<JobWorkerContext>,
) -> Result<(), Error> {
    let Some(job) = ctx
        .jobs
        .find_job(payload.job_id)
        .await
        .map_err(job_failed)?
    else {
        warn!(
            target = "staffetta::jobs::notify",
            job_id = %payload.job_id,
            "notification requested for unknown job"
        );
        return Ok(());
    };

    let Some(account) = ctx
        .accounts
        .find_account(job.account_id)
        .await
        .map_err(job_failed)?
    else {
        warn!(
            target = "staffetta::jobs::notify",
            job_id = %job.id,
            account_id = %job.account_id,
            "notification requested for unknown account"
        );
        return Ok(());
    };

    let Some(notify_url) = account.notify_url.as_deref() else {
        debug!(
            target = "staffetta::jobs::notify",
            job_id = %job.id,
            "account has no notification url"
        );
        return Ok(());
    };

    let body = NotificationBody {
        job_id: job.id,
        status: job.status.as_str(),
        output_url: job.output_url.as_deref(),
        error: job.error_reason.as_deref(),
    };

    match ctx.http.post(notify_url).json(&body).send().await {
        Ok(response) if response.status().is_success() => {
            debug!(
                target = "staffetta::jobs::notify",
                job_id = %job.id,
                "notification delivered"
            );
        }
        Ok(response) => {
            warn!(
                target = "staffetta::jobs::notify",
                job_id = %job.id,
                status = response.status().as_u16(),
                "notification endpoint returned an error"
            );
        }
        Err(err) => {
            warn!(
                target = "staffetta::jobs::notify",
                job_id = %job.id,
                error = %err,
                "notification delivery failed"
            );
        }
    }

    Ok(())
}
