//! Cron job driving the stuck-job reconciler.

use std::str::FromStr;
use std::sync::Arc;

use apalis::prelude::*;
use apalis_cron::Schedule;
use thiserror::Error;

use crate::application::reconciler::StuckJobReconciler;

/// Marker struct for the cron-triggered sweep.
/// Must implement `From<chrono::DateTime<chrono::Utc>>` for apalis-cron compatibility.
#[derive(Default, Debug, Clone)]
pub struct ReconcileJob;

impl From<chrono::DateTime<chrono::Utc>> for ReconcileJob {
    fn from(_: chrono::DateTime<chrono::Utc>) -> Self {
        Self
    }
}

/// Context for the sweep worker.
#[derive(Clone)]
pub struct ReconcileContext {
    pub reconciler: Arc<StuckJobReconciler>,
}

#[derive(Debug, Error)]
#[error("invalid cron expression `{expr}`: {message}")]
pub struct ScheduleError {
    expr: String,
    message: String,
}

/// Parse the configured cron expression for the sweep cadence.
pub fn reconcile_schedule(expr: &str) -> Result<Schedule, ScheduleError> {
    Schedule::from_str(expr).map_err(|err| ScheduleError {
        expr: expr.to_string(),
        message: err.to_string(),
    })
}

/// Run one sweep with the configured threshold.
pub async fn process_reconcile_job(
    _job: ReconcileJob,
    ctx: Data<ReconcileContext>,
) -> Result<(), Error> {
    match ctx.reconciler.sweep(None).await {
        Ok(outcome) if !outcome.fixed.is_empty() => {
            tracing::info!(
                target = "staffetta::jobs::reconcile",
                fixed = outcome.fixed.len(),
                "sweep terminated stuck jobs"
            );
        }
        Err(err) => {
            tracing::warn!(
                target = "staffetta::jobs::reconcile",
                error = %err,
                "sweep failed"
            );
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_parses_correctly() {
        let schedule = reconcile_schedule("0 */5 * * * *").expect("valid cron expression");
        let upcoming: Vec<_> = schedule.upcoming(chrono::Utc).take(3).collect();
        assert_eq!(upcoming.len(), 3);
    }

    #[test]
    fn invalid_schedule_is_reported() {
        let err = reconcile_schedule("not a cron").expect_err("invalid cron expression");
        assert!(err.to_string().contains("not a cron"));
    }
}
