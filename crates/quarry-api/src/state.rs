//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use quarry_chat::ChatEngine;
use quarry_core::config::QuarryConfig;

/// Shared application state, cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<QuarryConfig>,
    /// Session registry and turn runner.
    pub engine: Arc<ChatEngine>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: QuarryConfig, engine: ChatEngine) -> Self {
        Self {
            config: Arc::new(config),
            engine: Arc::new(engine),
            start_time: Instant::now(),
        }
    }
}
