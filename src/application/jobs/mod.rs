mod archive;
mod context;
mod notify;
mod queue;
mod reconcile;

pub use archive::{
    ArchiveOutputJobPayload, enqueue_archive_output_job, process_archive_output_job,
};
pub use context::{JobWorkerContext, job_failed};
pub use notify::{NotifyJobPayload, enqueue_notify_job, process_notify_job};
pub use queue::enqueue_job;
pub use reconcile::{
    ReconcileContext, ReconcileJob, ScheduleError, process_reconcile_job, reconcile_schedule,
};
