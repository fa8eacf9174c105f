//! Types for the orchestrator.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::model::{NodeAction, NodeSummary, Urn};

/// Errors that abort an orchestration run.
///
/// Task failures are not errors: they mark the node `failed` and the run
/// continues.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Invalid orchestrator configuration.
    #[error("invalid orchestrator configuration: {0}")]
    Config(String),

    /// Tree inconsistency.
    #[error("tree error: {0}")]
    Tree(#[from] crate::model::TreeError),

    /// Spatial registry error.
    #[error("registry error: {0}")]
    Registry(#[from] crate::registry::RegistryError),
}

/// Why a dispatched task did not complete its step.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Download(#[from] crate::downloader::DownloadError),

    #[error(transparent)]
    Unzip(#[from] crate::unzip::UnzipError),

    #[error(transparent)]
    Cpu(#[from] super::task::CpuTaskError),

    #[error("concatenation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("action '{0}' has no I/O worker")]
    Unsupported(NodeAction),

    #[error("worker pool closed")]
    PoolClosed,

    #[error("task aborted: {0}")]
    Join(String),
}

/// An unfinished node left behind by a stalled run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedNode {
    pub urn: Urn,
    pub name: String,
    pub action: NodeAction,
    /// Children that have not reached `processed`.
    pub blocked_by: Vec<Urn>,
}

/// How an orchestration run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every node reached a terminal action.
    Completed {
        processed: usize,
        failed: usize,
        skipped: usize,
    },
    /// Unfinished nodes remain but none can run.
    Stalled { unfinished: Vec<BlockedNode> },
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Completed { .. } => "completed",
            RunOutcome::Stalled { .. } => "stalled",
        }
    }

    pub fn is_stalled(&self) -> bool {
        matches!(self, RunOutcome::Stalled { .. })
    }
}

/// Point-in-time view of a run, published after every pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSnapshot {
    /// Whether a run is in progress.
    pub running: bool,
    pub run_id: Option<Uuid>,
    /// Tasks dispatched and not yet completed.
    pub in_flight: usize,
    /// Node count per action.
    pub counts: BTreeMap<NodeAction, usize>,
    pub outcome: Option<RunOutcome>,
    pub nodes: Vec<NodeSummary>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_outcome_serialization() {
        let outcome = RunOutcome::Stalled {
            unfinished: vec![BlockedNode {
                urn: 4,
                name: "c".to_string(),
                action: NodeAction::Buffer,
                blocked_by: vec![5],
            }],
        };

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "stalled");
        assert_eq!(json["unfinished"][0]["action"], "buffer");

        let parsed: RunOutcome = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, outcome);
        assert!(parsed.is_stalled());
    }

    #[test]
    fn test_run_snapshot_default() {
        let snapshot = RunSnapshot::default();
        assert!(!snapshot.running);
        assert_eq!(snapshot.in_flight, 0);
        assert!(snapshot.outcome.is_none());
        assert!(snapshot.nodes.is_empty());
    }

    #[test]
    fn test_error_display() {
        let err = OrchestratorError::Config("groups overlap".to_string());
        assert_eq!(
            err.to_string(),
            "invalid orchestrator configuration: groups overlap"
        );

        let completed = RunOutcome::Completed {
            processed: 3,
            failed: 0,
            skipped: 1,
        };
        assert_eq!(completed.as_str(), "completed");
    }
}
