mod credits;
mod renders;

pub use credits::{get_credits, list_ledger};
pub(crate) use renders::render_error_response;
pub use renders::{create_render, get_rate_limit_status, get_render, list_renders};
