use opensite_core::{Config, RunSnapshot, SanitizedConfig};
use tokio::sync::watch;

/// Shared application state
pub struct AppState {
    config: Config,
    status: watch::Receiver<RunSnapshot>,
}

impl AppState {
    pub fn new(config: Config, status: watch::Receiver<RunSnapshot>) -> Self {
        Self { config, status }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    /// Latest snapshot published by the orchestrator.
    pub fn snapshot(&self) -> RunSnapshot {
        self.status.borrow().clone()
    }
}
