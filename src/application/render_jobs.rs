//! Render-job lifecycle: creation, provider submission, webhook-driven
//! transitions, and operator retries.
//!
//! Transition guards live in the repository (`WHERE status = 'rendering'`),
//! so duplicate webhook deliveries and reconciler races collapse to no-ops;
//! whichever transition lands first wins and pairs the job's deduction with
//! exactly one outcome.

use std::sync::Arc;

use metrics::counter;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::credits::{CreditError, CreditService};
use crate::application::jobs::{enqueue_archive_output_job, enqueue_notify_job};
use crate::application::pagination::{CursorPage, JobCursor, PageRequest};
use crate::application::providers::{
    PollSettings, ProviderError, ProviderRegistry, ProviderRenderState, poll_until_terminal,
};
use crate::application::repos::{
    JobQueryFilter, JobQueueRepo, NewRenderJobParams, RenderJobsRepo, RepoError,
};
use crate::application::webhooks::{WebhookEvent, WebhookStatus};
use crate::domain::entities::RenderJobRecord;
use crate::domain::types::{Provider, RenderJobStatus};

const DEDUCT_REASON: &str = "render deduction";
const RETRY_DEDUCT_REASON: &str = "retry deduction";
const REFUND_REASON: &str = "render failed";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Credit(#[from] CreditError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("no client configured for provider `{0:?}`")]
    UnknownProvider(Provider),
    #[error("provider submission failed: {0}")]
    Submission(#[source] ProviderError),
    #[error("render job not found")]
    NotFound,
    #[error("job is `{status:?}`, only failed jobs can be retried")]
    NotRetryable { status: RenderJobStatus },
    #[error("job has no provider render id to poll")]
    NotSubmitted,
    #[error("provider status poll gave up: {0}")]
    Poll(#[source] ProviderError),
}

#[derive(Debug, Clone)]
pub struct SubmitRenderCommand {
    pub provider: Provider,
    pub input: serde_json::Value,
    pub cost: i64,
}

/// What a webhook delivery did to the matched job. `transitioned` is false
/// for duplicate terminal deliveries, which carry no side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookDisposition {
    Completed { job_id: Uuid, transitioned: bool },
    Failed { job_id: Uuid, transitioned: bool },
    InProgress { job_id: Uuid },
}

#[derive(Clone)]
pub struct RenderJobService {
    jobs: Arc<dyn RenderJobsRepo>,
    credits: CreditService,
    providers: ProviderRegistry,
    queue: Arc<dyn JobQueueRepo>,
    poll: PollSettings,
}

impl RenderJobService {
    pub fn new(
        jobs: Arc<dyn RenderJobsRepo>,
        credits: CreditService,
        providers: ProviderRegistry,
        queue: Arc<dyn JobQueueRepo>,
        poll: PollSettings,
    ) -> Self {
        Self {
            jobs,
            credits,
            providers,
            queue,
            poll,
        }
    }

    /// Accept a render request: deduct credits, persist the job, submit it
    /// upstream. A submission failure fails the job and refunds in the same
    /// request, so the caller never holds a deducted-but-dead job.
    pub async fn submit(
        &self,
        account_id: Uuid,
        cmd: SubmitRenderCommand,
    ) -> Result<RenderJobRecord, RenderError> {
        let client = self
            .providers
            .get(cmd.provider)
            .ok_or(RenderError::UnknownProvider(cmd.provider))?;

        let job = self
            .jobs
            .create_job(NewRenderJobParams {
                account_id,
                provider: cmd.provider,
                input: cmd.input,
                cost: cmd.cost,
            })
            .await?;

        if let Err(err) = self
            .credits
            .deduct(account_id, cmd.cost, DEDUCT_REASON, Some(job.id))
            .await
        {
            // Nothing was deducted; record why the job never started.
            let reason = format!("credit deduction failed: {err}");
            self.jobs.fail_if_active(job.id, &reason).await?;
            return Err(err.into());
        }

        match client.submit(&job.input).await {
            Ok(submission) => {
                self.jobs
                    .mark_rendering(job.id, &submission.render_id)
                    .await?;
                info!(
                    target = "staffetta::render",
                    job_id = %job.id,
                    provider = cmd.provider.as_str(),
                    render_id = %submission.render_id,
                    "render submitted"
                );
                self.jobs
                    .find_job(job.id)
                    .await?
                    .ok_or(RenderError::NotFound)
            }
            Err(err) => {
                let reason = format!("provider submission failed: {err}");
                self.fail_job(&job, &reason).await?;
                Err(RenderError::Submission(err))
            }
        }
    }

    /// Apply a verified, normalized webhook to the job it correlates with.
    pub async fn handle_webhook(
        &self,
        provider: Provider,
        event: &WebhookEvent,
    ) -> Result<WebhookDisposition, RenderError> {
        let job = self
            .jobs
            .find_by_correlation(provider, &event.correlation_key)
            .await?
            .ok_or(RenderError::NotFound)?;

        match event.status {
            WebhookStatus::Succeeded => {
                let transitioned = self
                    .complete_job(&job, event.output_url.as_deref())
                    .await?;
                Ok(WebhookDisposition::Completed {
                    job_id: job.id,
                    transitioned,
                })
            }
            WebhookStatus::Failed => {
                let reason = event
                    .error
                    .as_deref()
                    .unwrap_or("provider reported failure");
                let transitioned = self.fail_job(&job, reason).await?;
                Ok(WebhookDisposition::Failed {
                    job_id: job.id,
                    transitioned,
                })
            }
            WebhookStatus::InProgress => Ok(WebhookDisposition::InProgress { job_id: job.id }),
        }
    }

    /// `rendering -> complete`. Returns whether this call performed the
    /// transition; follow-up jobs are enqueued only on the first delivery.
    pub async fn complete_job(
        &self,
        job: &RenderJobRecord,
        output_url: Option<&str>,
    ) -> Result<bool, RenderError> {
        let transitioned = self.jobs.complete_if_rendering(job.id, output_url).await?;
        if !transitioned {
            return Ok(false);
        }

        counter!("staffetta_jobs_completed_total").increment(1);
        if output_url.is_some() {
            if let Err(err) = enqueue_archive_output_job(self.queue.as_ref(), job.id).await {
                warn!(
                    target = "staffetta::render",
                    job_id = %job.id,
                    error = %err,
                    "failed to enqueue archive job"
                );
            }
        }
        if let Err(err) = enqueue_notify_job(self.queue.as_ref(), job.id).await {
            warn!(
                target = "staffetta::render",
                job_id = %job.id,
                error = %err,
                "failed to enqueue notify job"
            );
        }

        info!(target = "staffetta::render", job_id = %job.id, "render complete");
        Ok(true)
    }

    /// `pending|rendering -> failed`, refunding the job's cost exactly once.
    /// The refund rides on the transition guard: a second failure report
    /// finds the job already terminal and does nothing.
    pub async fn fail_job(
        &self,
        job: &RenderJobRecord,
        reason: &str,
    ) -> Result<bool, RenderError> {
        let transitioned = self.jobs.fail_if_active(job.id, reason).await?;
        if !transitioned {
            return Ok(false);
        }

        counter!("staffetta_jobs_failed_total").increment(1);
        self.credits
            .refund(job.account_id, job.cost, REFUND_REASON, Some(job.id))
            .await?;
        warn!(
            target = "staffetta::render",
            job_id = %job.id,
            reason,
            "render failed; credits refunded"
        );
        Ok(true)
    }

    /// Operator-only `failed -> pending` reset. The earlier failure refunded
    /// the job's cost, so the retry deducts it again before resubmitting.
    pub async fn reset_for_retry(&self, job_id: Uuid) -> Result<RenderJobRecord, RenderError> {
        let job = self
            .jobs
            .find_job(job_id)
            .await?
            .ok_or(RenderError::NotFound)?;

        if job.status != RenderJobStatus::Failed {
            return Err(RenderError::NotRetryable { status: job.status });
        }

        let client = self
            .providers
            .get(job.provider)
            .ok_or(RenderError::UnknownProvider(job.provider))?;

        self.credits
            .deduct(job.account_id, job.cost, RETRY_DEDUCT_REASON, Some(job.id))
            .await?;

        let moved = self.jobs.reset_for_retry(job_id).await?;
        if !moved {
            // A concurrent retry won the reset; hand the tokens back.
            self.credits
                .refund(job.account_id, job.cost, "retry aborted", Some(job.id))
                .await?;
            return Err(RenderError::NotRetryable { status: job.status });
        }

        match client.submit(&job.input).await {
            Ok(submission) => {
                self.jobs
                    .mark_rendering(job_id, &submission.render_id)
                    .await?;
                info!(
                    target = "staffetta::render",
                    job_id = %job_id,
                    render_id = %submission.render_id,
                    "render retry submitted"
                );
                self.jobs
                    .find_job(job_id)
                    .await?
                    .ok_or(RenderError::NotFound)
            }
            Err(err) => {
                let refreshed = self
                    .jobs
                    .find_job(job_id)
                    .await?
                    .ok_or(RenderError::NotFound)?;
                let reason = format!("provider submission failed: {err}");
                self.fail_job(&refreshed, &reason).await?;
                Err(RenderError::Submission(err))
            }
        }
    }

    /// Ask the provider for a job's current status instead of waiting for a
    /// webhook that may never come, then apply the usual guarded transition.
    /// Polling is bounded by the configured interval × attempt budget.
    pub async fn sync_from_provider(&self, job_id: Uuid) -> Result<RenderJobRecord, RenderError> {
        let job = self
            .jobs
            .find_job(job_id)
            .await?
            .ok_or(RenderError::NotFound)?;

        if !job.status.is_active() {
            return Ok(job);
        }
        let Some(render_id) = job.provider_render_id.clone() else {
            return Err(RenderError::NotSubmitted);
        };
        let client = self
            .providers
            .get(job.provider)
            .ok_or(RenderError::UnknownProvider(job.provider))?;

        let status = poll_until_terminal(
            client.as_ref(),
            &render_id,
            self.poll.interval,
            self.poll.max_attempts,
        )
        .await
        .map_err(RenderError::Poll)?;

        match status.state {
            ProviderRenderState::Done => {
                self.complete_job(&job, status.output_url.as_deref())
                    .await?;
            }
            ProviderRenderState::Failed => {
                let reason = status
                    .error
                    .as_deref()
                    .unwrap_or("provider reported failure during sync");
                self.fail_job(&job, reason).await?;
            }
            // poll_until_terminal only returns terminal states.
            ProviderRenderState::Queued | ProviderRenderState::Rendering => {}
        }

        self.jobs
            .find_job(job_id)
            .await?
            .ok_or(RenderError::NotFound)
    }

    /// Fetch a job, scoped to its owning account.
    pub async fn get_job(
        &self,
        account_id: Uuid,
        job_id: Uuid,
    ) -> Result<RenderJobRecord, RenderError> {
        let job = self
            .jobs
            .find_job(job_id)
            .await?
            .ok_or(RenderError::NotFound)?;
        if job.account_id != account_id {
            return Err(RenderError::NotFound);
        }
        Ok(job)
    }

    /// Unscoped lookup for the operator surface.
    pub async fn get_job_any(&self, job_id: Uuid) -> Result<RenderJobRecord, RenderError> {
        self.jobs
            .find_job(job_id)
            .await?
            .ok_or(RenderError::NotFound)
    }

    pub async fn list_jobs(
        &self,
        account_id: Uuid,
        filter: &JobQueryFilter,
        page: PageRequest<JobCursor>,
    ) -> Result<CursorPage<RenderJobRecord>, RenderError> {
        self.jobs
            .list_jobs(account_id, filter, page)
            .await
            .map_err(RenderError::from)
    }
}
