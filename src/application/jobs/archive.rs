//! Queued job that copies a completed render's output into permanent storage.

use apalis::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::repos::{JobQueueRepo, RepoError};
use crate::domain::types::QueueJobType;

use super::{JobWorkerContext, job_failed, queue::enqueue_job};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveOutputJobPayload {
    pub job_id: Uuid,
}

pub async fn enqueue_archive_output_job(
    repo: &(impl JobQueueRepo + ?Sized),
    job_id: Uuid,
) -> Result<String, RepoError> {
    enqueue_job(
        repo,
        QueueJobType::ArchiveOutput,
        &ArchiveOutputJobPayload { job_id },
    )
    .await
}

/// Download the provider-hosted output and record its stored path. Provider
/// URLs expire, so this runs soon after completion rather than lazily.
pub async fn process_archive_output_job(
    payload: ArchiveOutputJobPayload,
    ctx: Data<JobWorkerContext>,
) -> Result<(), Error> {
    let job = ctx
        .jobs
        .find_job(payload.job_id)
        .await
        .map_err(job_failed)?;

    let Some(job) = job else {
        warn!(
            target = "staffetta::jobs::archive",
            job_id = %payload.job_id,
            "archive requested for unknown job"
        );
        return Ok(());
    };

    let Some(output_url) = job.output_url.as_deref() else {
        warn!(
            target = "staffetta::jobs::archive",
            job_id = %job.id,
            "archive requested but job has no output url"
        );
        return Ok(());
    };

    let stored = ctx
        .storage
        .archive(job.id, output_url)
        .await
        .map_err(job_failed)?;

    ctx.jobs
        .set_stored_path(job.id, &stored.stored_path)
        .await
        .map_err(job_failed)?;

    info!(
        target = "staffetta::jobs::archive",
        job_id = %job.id,
        stored_path = %stored.stored_path,
        size_bytes = stored.size_bytes,
        "render output archived"
    );
    Ok(())
}
