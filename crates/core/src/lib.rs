pub mod branch;
pub mod catalog;
pub mod config;
pub mod downloader;
pub mod grid;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod registry;
pub mod testing;
pub mod unzip;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use model::{Node, NodeAction, Tree, TreeError, Urn};
pub use orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorError, RunOutcome, RunSnapshot};
