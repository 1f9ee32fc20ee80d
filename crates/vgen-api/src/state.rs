//! Application state.

use vgen_queue::JobQueue;

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub queue: JobQueue,
}

impl AppState {
    pub fn new(config: ApiConfig, queue: JobQueue) -> Self {
        Self { config, queue }
    }
}
