use std::sync::Arc;

use crate::application::api_keys::ApiKeyService;
use crate::application::credits::CreditService;
use crate::application::rate_limit::RateLimitService;
use crate::application::render_jobs::RenderJobService;

#[derive(Clone)]
pub struct ApiState {
    pub api_keys: Arc<ApiKeyService>,
    pub renders: RenderJobService,
    pub credits: CreditService,
    pub rate_limits: RateLimitService,
}
