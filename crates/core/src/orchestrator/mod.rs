//! Dependency-aware task orchestrator.
//!
//! The orchestrator drives every node of a tree through its lifecycle:
//! - **Frontier**: a node runs once all of its children are processed
//! - **I/O pool**: download, unzip, concatenate (many at once)
//! - **CPU pool**: import, buffer, run, amalgamate (one per core)
//!
//! Nodes sharing a global urn are dispatched once and updated together.

mod config;
mod frontier;
mod lifecycle;
mod priority;
mod runner;
mod task;
mod types;

pub use config::{default_format_priority, ActionGroup, ActionGroups, OrchestratorConfig};
pub use frontier::{
    blocked_nodes, candidate_nodes, children_processed, sync_global_status, unfinished_nodes,
};
pub use lifecycle::advance;
pub use priority::{priority_key, sort_runnable};
pub use runner::Orchestrator;
pub use task::{CpuTask, CpuTaskError, CpuTaskHandler, TaskContext};
pub use types::{BlockedNode, OrchestratorError, RunOutcome, RunSnapshot, TaskError};
