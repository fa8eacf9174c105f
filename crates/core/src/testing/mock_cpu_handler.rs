//! Mock CPU task handler for testing.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::orchestrator::{CpuTask, CpuTaskError, CpuTaskHandler, TaskContext};

/// Mock implementation of the CpuTaskHandler trait.
///
/// Runs on blocking threads, so its state sits behind std locks rather
/// than tokio ones.
///
/// # Example
///
/// ```rust,ignore
/// use opensite_core::testing::MockCpuHandler;
///
/// let handler = MockCpuHandler::new();
/// handler.fail_on("contaminated");
/// handler.set_duration(Duration::from_millis(20));
///
/// // Run the orchestrator...
///
/// let tasks = handler.recorded_tasks();
/// assert!(tasks.iter().any(|t| t.action == NodeAction::Buffer));
/// ```
#[derive(Debug, Default)]
pub struct MockCpuHandler {
    tasks: Arc<RwLock<Vec<CpuTask>>>,
    failing: Arc<RwLock<HashSet<String>>>,
    duration_ms: Arc<RwLock<u64>>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl MockCpuHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get every task received, in start order.
    pub fn recorded_tasks(&self) -> Vec<CpuTask> {
        self.tasks.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Make tasks for nodes with this name fail.
    pub fn fail_on(&self, name: &str) {
        self.failing
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string());
    }

    /// Set the simulated task duration.
    pub fn set_duration(&self, duration: Duration) {
        *self.duration_ms.write().unwrap_or_else(|e| e.into_inner()) =
            duration.as_millis() as u64;
    }

    /// Highest number of tasks that ran at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl CpuTaskHandler for MockCpuHandler {
    fn run(&self, task: &CpuTask, _ctx: &TaskContext) -> Result<(), CpuTaskError> {
        let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        self.tasks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(task.clone());

        let duration_ms = *self.duration_ms.read().unwrap_or_else(|e| e.into_inner());
        if duration_ms > 0 {
            std::thread::sleep(Duration::from_millis(duration_ms));
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let failing = self.failing.read().unwrap_or_else(|e| e.into_inner());
        if failing.contains(&task.name) {
            return Err(CpuTaskError::Failed(format!("mock failure for {}", task.name)));
        }
        Ok(())
    }
}
