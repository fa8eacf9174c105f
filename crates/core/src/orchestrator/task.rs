//! Worker task payloads and the per-run task context.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::grid::SpatialError;
use crate::model::{DatabaseAction, NodeAction, Urn};

/// Handle shared by every CPU task of one orchestration run.
///
/// The log lock keeps multi-line progress output from different workers
/// from interleaving. It guards nothing else.
#[derive(Debug, Clone)]
pub struct TaskContext {
    run_id: Uuid,
    log_lock: Arc<Mutex<()>>,
    remaining: Arc<AtomicUsize>,
}

impl Default for TaskContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskContext {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            log_lock: Arc::new(Mutex::new(())),
            remaining: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Hold while emitting a sequence of log lines that belong together.
    pub fn log_guard(&self) -> MutexGuard<'_, ()> {
        self.log_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// CPU tasks dispatched but not yet finished.
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::SeqCst)
    }

    pub(crate) fn task_started(&self) {
        self.remaining.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a finished CPU task and return how many are still running.
    pub fn task_finished(&self) -> usize {
        let previous = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        previous.saturating_sub(1)
    }
}

/// Serializable payload of a CPU-bound task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuTask {
    pub urn: Urn,
    pub action: NodeAction,
    /// Downloaded file or extracted directory for imports.
    pub input: PathBuf,
    pub name: String,
    pub database_table: Option<String>,
    pub database_action: Option<DatabaseAction>,
    pub custom_properties: Map<String, Value>,
    /// Tables of the node's children, for amalgamation.
    #[serde(default)]
    pub inputs: Vec<String>,
}

impl CpuTask {
    pub fn buffer_distance(&self) -> Option<f64> {
        self.custom_properties.get("buffer_value").and_then(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }
}

/// Errors raised by CPU task handlers.
#[derive(Debug, Error)]
pub enum CpuTaskError {
    #[error("spatial error: {0}")]
    Spatial(#[from] SpatialError),

    #[error("node '{0}' has no database_table")]
    MissingTable(String),

    #[error("action '{0}' is not handled by the CPU pool")]
    Unsupported(NodeAction),

    #[error("{0}")]
    Failed(String),
}

/// Runs CPU-bound node actions. Called on a blocking thread.
pub trait CpuTaskHandler: Send + Sync {
    fn run(&self, task: &CpuTask, ctx: &TaskContext) -> Result<(), CpuTaskError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_remaining_counter_saturates() {
        let ctx = TaskContext::new();
        ctx.task_started();
        ctx.task_started();
        assert_eq!(ctx.remaining(), 2);
        assert_eq!(ctx.task_finished(), 1);
        assert_eq!(ctx.task_finished(), 0);
        assert_eq!(ctx.task_finished(), 0);
    }

    #[test]
    fn test_context_clones_share_state() {
        let ctx = TaskContext::new();
        let clone = ctx.clone();
        clone.task_started();
        assert_eq!(ctx.remaining(), 1);
        assert_eq!(ctx.run_id(), clone.run_id());
        drop(ctx.log_guard());
        drop(clone.log_guard());
    }

    #[test]
    fn test_cpu_task_serializes() {
        let task = CpuTask {
            urn: 5,
            action: NodeAction::Buffer,
            input: PathBuf::from("/data/parks.gpkg"),
            name: "parks".to_string(),
            database_table: Some("opensite_x_y".to_string()),
            database_action: Some(DatabaseAction::Buffer),
            custom_properties: Map::from_iter([("buffer_value".to_string(), json!("165.5"))]),
            inputs: vec![],
        };
        let json = serde_json::to_string(&task).unwrap();
        let parsed: CpuTask = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, task);
        assert_eq!(parsed.buffer_distance(), Some(165.5));
    }
}
