pub mod handlers;
pub mod models;
pub mod relay;
pub mod routes;
pub mod validate;


use std::sync::Arc;

use crate::config::Config;
use crate::upstream::UpstreamClient;

/// Shared state handed to every handler. Nothing in here is mutated after
/// startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub upstream: Arc<dyn UpstreamClient>,
}
