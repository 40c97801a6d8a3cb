use std::sync::Arc;

use apalis::prelude::Error as ApalisError;

use crate::{
    application::repos::{AccountsRepo, RenderJobsRepo},
    infra::storage::OutputStorage,
};

/// Shared context passed to job workers so they can access infrastructure capabilities.
#[derive(Clone)]
pub struct JobWorkerContext {
    pub jobs: Arc<dyn RenderJobsRepo>,
    pub accounts: Arc<dyn AccountsRepo>,
    pub storage: Arc<OutputStorage>,
    pub http: reqwest::Client,
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convert any error into an [`ApalisError::Failed`].
pub fn job_failed<E>(err: E) -> ApalisError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let boxed: BoxError = Box::new(err);
    ApalisError::Failed(Arc::new(boxed))
}
