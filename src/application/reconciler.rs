//! Safety net for jobs whose terminating webhook never arrived.

use std::{sync::Arc, time::Duration};

use metrics::counter;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::render_jobs::{RenderError, RenderJobService};
use crate::application::repos::RenderJobsRepo;

const SWEEP_REASON: &str = "render timed out; terminated by reconciler";

#[derive(Debug, Clone, Default)]
pub struct SweepOutcome {
    pub fixed: Vec<Uuid>,
}

#[derive(Clone)]
pub struct StuckJobReconciler {
    jobs: Arc<dyn RenderJobsRepo>,
    render_jobs: RenderJobService,
    stale_after: Duration,
}

impl StuckJobReconciler {
    pub fn new(
        jobs: Arc<dyn RenderJobsRepo>,
        render_jobs: RenderJobService,
        stale_after: Duration,
    ) -> Self {
        Self {
            jobs,
            render_jobs,
            stale_after,
        }
    }

    /// Force-fail every active job older than the threshold, refunding its
    /// credits through the regular guarded path. A completion webhook racing
    /// the sweep is harmless: the first transition wins and the loser is a
    /// no-op.
    pub async fn sweep(&self, stale_after: Option<Duration>) -> Result<SweepOutcome, RenderError> {
        let threshold = stale_after.unwrap_or(self.stale_after);
        let cutoff = OffsetDateTime::now_utc() - threshold;
        let stale = self.jobs.list_stale(cutoff).await?;

        let mut outcome = SweepOutcome::default();
        for job in stale {
            match self.render_jobs.fail_job(&job, SWEEP_REASON).await {
                Ok(true) => {
                    counter!("staffetta_jobs_swept_total").increment(1);
                    outcome.fixed.push(job.id);
                }
                Ok(false) => {
                    // Lost the race to a webhook between listing and failing.
                }
                Err(err) => {
                    warn!(
                        target = "staffetta::reconciler",
                        job_id = %job.id,
                        error = %err,
                        "failed to terminate stale job"
                    );
                }
            }
        }

        if !outcome.fixed.is_empty() {
            info!(
                target = "staffetta::reconciler",
                fixed = outcome.fixed.len(),
                threshold_secs = threshold.as_secs(),
                "stuck-job sweep terminated jobs"
            );
        }

        Ok(outcome)
    }
}
