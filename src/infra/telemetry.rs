use std::sync::Once;

use metrics::{Unit, describe_counter};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "staffetta_rate_limit_allowed_total",
            Unit::Count,
            "Total number of requests admitted by the rate limiter."
        );
        describe_counter!(
            "staffetta_rate_limit_blocked_total",
            Unit::Count,
            "Total number of requests rejected by the rate limiter."
        );
        describe_counter!(
            "staffetta_rate_limit_fail_open_total",
            Unit::Count,
            "Total number of requests admitted because the limit store was unavailable."
        );
        describe_counter!(
            "staffetta_credits_deducted_total",
            Unit::Count,
            "Total credits deducted for accepted renders."
        );
        describe_counter!(
            "staffetta_credits_refunded_total",
            Unit::Count,
            "Total credits refunded for failed or terminated renders."
        );
        describe_counter!(
            "staffetta_jobs_completed_total",
            Unit::Count,
            "Total render jobs that reached the complete state."
        );
        describe_counter!(
            "staffetta_jobs_failed_total",
            Unit::Count,
            "Total render jobs that reached the failed state."
        );
        describe_counter!(
            "staffetta_jobs_swept_total",
            Unit::Count,
            "Total stuck jobs terminated by the reconciler."
        );
        describe_counter!(
            "staffetta_webhook_invalid_signature_total",
            Unit::Count,
            "Total webhook deliveries rejected for signature failures."
        );
    });
}
