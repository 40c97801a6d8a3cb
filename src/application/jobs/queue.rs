use time::OffsetDateTime;

use crate::{
    application::repos::{JobQueueRepo, NewQueueJobParams, RepoError},
    domain::types::QueueJobType,
};

const DEFAULT_MAX_ATTEMPTS: i32 = 5;

/// Enqueue a background job with the provided payload, returning the assigned id.
pub async fn enqueue_job<P>(
    repo: &(impl JobQueueRepo + ?Sized),
    job_type: QueueJobType,
    payload: &P,
) -> Result<String, RepoError>
where
    P: serde::Serialize,
{
    let payload = serde_json::to_value(payload)
        .map_err(|err| RepoError::from_persistence(err.to_string()))?;

    repo.enqueue_job(NewQueueJobParams {
        job_type,
        payload,
        run_at: OffsetDateTime::now_utc(),
        max_attempts: DEFAULT_MAX_ATTEMPTS,
        priority: 0,
    })
    .await
}
