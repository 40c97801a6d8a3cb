//! Application services layer scaffolding.

pub mod api_keys;
pub mod credits;
pub mod error;
pub mod jobs;
pub mod pagination;
pub mod providers;
pub mod rate_limit;
pub mod reconciler;
pub mod render_jobs;
pub mod repos;
pub mod webhooks;
