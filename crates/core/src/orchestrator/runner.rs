//! Dependency-aware dispatch loop.
//!
//! The loop owns the tree for the whole run. Each pass computes the
//! runnable frontier, dispatches it to one of two worker pools and applies
//! finished results:
//! - I/O pool: download, unzip and concatenate as tokio tasks
//! - CPU pool: import, buffer, run and amalgamate on blocking threads
//!
//! Workers get owned snapshots and return the node's next action. Only the
//! loop writes to the tree.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::sync::{watch, Semaphore};
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use super::config::{ActionGroup, OrchestratorConfig};
use super::frontier::{blocked_nodes, candidate_nodes, sync_global_status};
use super::lifecycle::advance;
use super::priority::sort_runnable;
use super::task::{CpuTask, CpuTaskHandler, TaskContext};
use super::types::{OrchestratorError, RunOutcome, RunSnapshot, TaskError};
use crate::downloader::Downloader;
use crate::metrics::{RUN_OUTCOMES, SIZE_PROBES, TASKS_DISPATCHED, TASKS_FINISHED, TASK_DURATION};
use crate::model::{NodeAction, NodeSnapshot, Tree, Urn};
use crate::registry::SpatialRegistry;
use crate::unzip::{extract_dir, Unzipper};

type TaskResult = Result<NodeAction, TaskError>;

/// Bookkeeping for one dispatched task.
#[derive(Debug, Clone, Copy)]
struct InFlight {
    urn: Urn,
    group: ActionGroup,
    started: Instant,
}

/// Drives a tree to completion with the configured collaborators.
pub struct Orchestrator {
    config: OrchestratorConfig,
    downloader: Arc<dyn Downloader>,
    unzipper: Arc<dyn Unzipper>,
    cpu_handler: Arc<dyn CpuTaskHandler>,
    registry: Option<Arc<dyn SpatialRegistry>>,
    status_tx: watch::Sender<RunSnapshot>,
}

impl Orchestrator {
    /// Create a new orchestrator.
    pub fn new(
        config: OrchestratorConfig,
        downloader: Arc<dyn Downloader>,
        unzipper: Arc<dyn Unzipper>,
        cpu_handler: Arc<dyn CpuTaskHandler>,
    ) -> Self {
        let (status_tx, _) = watch::channel(RunSnapshot::default());
        Self {
            config,
            downloader,
            unzipper,
            cpu_handler,
            registry: None,
            status_tx,
        }
    }

    /// Mark registry rows completed as their nodes reach `processed`.
    pub fn with_registry(mut self, registry: Arc<dyn SpatialRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Receiver of the snapshot published after every pass.
    pub fn subscribe(&self) -> watch::Receiver<RunSnapshot> {
        self.status_tx.subscribe()
    }

    /// Runnable nodes in dispatch order.
    ///
    /// With `check_sizes`, download nodes without a cached size are probed
    /// first. Failed probes cache a size of zero.
    pub async fn runnable_nodes(
        &self,
        tree: &mut Tree,
        filter: Option<&[NodeAction]>,
        check_sizes: bool,
    ) -> Vec<Urn> {
        self.runnable_excluding(tree, filter, check_sizes, &HashSet::new())
            .await
    }

    async fn runnable_excluding(
        &self,
        tree: &mut Tree,
        filter: Option<&[NodeAction]>,
        check_sizes: bool,
        busy: &HashSet<Urn>,
    ) -> Vec<Urn> {
        let mut urns = candidate_nodes(tree, &self.config.action_groups, filter, busy);
        if check_sizes {
            self.probe_sizes(tree, &urns).await;
        }
        sort_runnable(tree, &mut urns, &self.config.format_priority);
        urns
    }

    async fn probe_sizes(&self, tree: &mut Tree, urns: &[Urn]) {
        let pending: Vec<NodeSnapshot> = urns
            .iter()
            .filter_map(|urn| tree.get(*urn))
            .filter(|node| node.action == NodeAction::Download && node.size_hint.is_none())
            .map(NodeSnapshot::from)
            .collect();
        if pending.is_empty() {
            return;
        }

        debug!("Checking remote size of {} dataset(s)", pending.len());
        let downloader = &self.downloader;
        let sizes: Vec<(Urn, Option<u64>)> = stream::iter(pending)
            .map(|node| async move {
                let size = downloader.estimate_remote_size(&node).await;
                (node.urn, size)
            })
            .buffer_unordered(self.config.size_probe_concurrency.max(1))
            .collect()
            .await;

        for (urn, size) in sizes {
            let result = if size.is_some() { "known" } else { "unknown" };
            SIZE_PROBES.with_label_values(&[result]).inc();
            if let Some(node) = tree.get_mut(urn) {
                node.size_hint = Some(size.unwrap_or(0));
            }
        }
    }

    /// The first pass is unfiltered and may probe sizes. Later passes try
    /// the steady-state actions first and fall back to every action.
    async fn next_batch(&self, tree: &mut Tree, busy: &HashSet<Urn>, first_pass: bool) -> Vec<Urn> {
        if first_pass {
            return self
                .runnable_excluding(tree, None, self.config.check_remote_sizes, busy)
                .await;
        }
        let filter = self.config.steady_state_actions.as_slice();
        if !filter.is_empty() {
            let filtered = self
                .runnable_excluding(tree, Some(filter), false, busy)
                .await;
            if !filtered.is_empty() {
                return filtered;
            }
        }
        self.runnable_excluding(tree, None, false, busy).await
    }

    /// Run until every node is finished or the run stalls.
    pub async fn run(&self, tree: &mut Tree) -> Result<RunOutcome, OrchestratorError> {
        self.config
            .action_groups
            .validate()
            .map_err(OrchestratorError::Config)?;

        let ctx = TaskContext::new();
        let io_workers = self.config.io_workers();
        let cpu_workers = self.config.cpu_workers();
        let io_permits = Arc::new(Semaphore::new(io_workers));
        let cpu_permits = Arc::new(Semaphore::new(cpu_workers));
        let poll = Duration::from_millis(self.config.poll_interval_ms);
        let pause = Duration::from_millis(self.config.yield_ms);

        info!(
            run_id = %ctx.run_id(),
            io_workers,
            cpu_workers,
            "Starting orchestration of {} node(s)",
            tree.len()
        );

        let mut tasks: JoinSet<TaskResult> = JoinSet::new();
        let mut in_flight: HashMap<Id, InFlight> = HashMap::new();
        let mut first_pass = true;

        loop {
            let busy: HashSet<Urn> = in_flight.values().map(|task| task.urn).collect();
            let runnable = self.next_batch(tree, &busy, first_pass).await;
            first_pass = false;

            let mut progressed = false;
            for urn in runnable {
                let Some(action) = tree.get(urn).map(|node| node.action) else {
                    continue;
                };
                let group = match self.config.action_groups.group_of(action) {
                    Some(ActionGroup::Terminal) => continue,
                    Some(group) => group,
                    None => {
                        debug!(urn, "Prerequisites processed, completing {} inline", action);
                        TASKS_DISPATCHED.with_label_values(&["inline"]).inc();
                        self.propagate(tree, urn, NodeAction::Processed);
                        progressed = true;
                        continue;
                    }
                };

                let id = match group {
                    ActionGroup::IoBound => self.spawn_io(&mut tasks, &io_permits, tree, urn),
                    _ => self.spawn_cpu(&mut tasks, &cpu_permits, tree, urn, &ctx),
                };
                let Some(id) = id else {
                    continue;
                };
                info!(urn, action = %action, pool = group.as_str(), "Dispatched");
                TASKS_DISPATCHED.with_label_values(&[group.as_str()]).inc();
                in_flight.insert(
                    id,
                    InFlight {
                        urn,
                        group,
                        started: Instant::now(),
                    },
                );
            }

            self.publish(tree, &ctx, in_flight.len(), None);

            if tasks.is_empty() {
                if progressed {
                    continue;
                }
                let outcome = self.finish(tree);
                self.publish(tree, &ctx, 0, Some(&outcome));
                return Ok(outcome);
            }

            match tokio::time::timeout(poll, tasks.join_next_with_id()).await {
                Ok(Some(joined)) => {
                    self.complete(tree, &ctx, joined, &mut in_flight);
                    while let Some(joined) = tasks.try_join_next_with_id() {
                        self.complete(tree, &ctx, joined, &mut in_flight);
                    }
                }
                Ok(None) => {}
                Err(_) => debug!("No task finished within {:?}, rescanning", poll),
            }

            tokio::time::sleep(pause).await;
        }
    }

    fn spawn_io(
        &self,
        tasks: &mut JoinSet<TaskResult>,
        permits: &Arc<Semaphore>,
        tree: &Tree,
        urn: Urn,
    ) -> Option<Id> {
        let node = tree.snapshot(urn)?;
        let inputs: Vec<PathBuf> = tree
            .get(urn)?
            .children()
            .iter()
            .filter_map(|child| tree.snapshot(*child))
            .map(|child| self.downloader.local_path(&child))
            .collect();
        let downloader = self.downloader.clone();
        let unzipper = self.unzipper.clone();
        let permits = permits.clone();

        let handle = tasks.spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| TaskError::PoolClosed)?;
            run_io(downloader.as_ref(), unzipper.as_ref(), &node, &inputs).await
        });
        Some(handle.id())
    }

    fn spawn_cpu(
        &self,
        tasks: &mut JoinSet<TaskResult>,
        permits: &Arc<Semaphore>,
        tree: &Tree,
        urn: Urn,
        ctx: &TaskContext,
    ) -> Option<Id> {
        let task = self.cpu_task(tree, urn)?;
        let is_archive = tree.get(urn)?.is_archive();
        let handler = self.cpu_handler.clone();
        let permits = permits.clone();
        let ctx = ctx.clone();
        ctx.task_started();

        let handle = tasks.spawn(async move {
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|_| TaskError::PoolClosed)?;
            let (action, database_action) = (task.action, task.database_action);
            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                handler.run(&task, &ctx)
            })
            .await
            .map_err(|e| TaskError::Join(e.to_string()))??;
            Ok::<_, TaskError>(advance(action, database_action, is_archive))
        });
        Some(handle.id())
    }

    fn cpu_task(&self, tree: &Tree, urn: Urn) -> Option<CpuTask> {
        let node = tree.get(urn)?;
        let local = self.downloader.local_path(&NodeSnapshot::from(node));
        let input = if node.is_archive() {
            extract_dir(&local)
        } else {
            local
        };
        let inputs = node
            .children()
            .iter()
            .filter_map(|child| tree.get(*child)?.database_table.clone())
            .collect();

        Some(CpuTask {
            urn,
            action: node.action,
            input,
            name: node.name.clone(),
            database_table: node.database_table.clone(),
            database_action: node.database_action,
            custom_properties: node.custom_properties.clone(),
            inputs,
        })
    }

    fn complete(
        &self,
        tree: &mut Tree,
        ctx: &TaskContext,
        joined: Result<(Id, TaskResult), JoinError>,
        in_flight: &mut HashMap<Id, InFlight>,
    ) {
        let (id, result) = match joined {
            Ok((id, result)) => (id, result),
            Err(e) => (e.id(), Err(TaskError::Join(e.to_string()))),
        };
        let Some(task) = in_flight.remove(&id) else {
            warn!("Completed task {} was not tracked", id);
            return;
        };

        TASK_DURATION
            .with_label_values(&[task.group.as_str()])
            .observe(task.started.elapsed().as_secs_f64());
        if task.group == ActionGroup::CpuBound {
            ctx.task_finished();
        }

        let action = match result {
            Ok(action) => action,
            Err(e) => {
                let name = tree.get(task.urn).map(|n| n.name.as_str()).unwrap_or("?");
                error!(urn = task.urn, "Task for {} failed: {}", name, e);
                NodeAction::Failed
            }
        };
        TASKS_FINISHED.with_label_values(&[action.as_str()]).inc();
        debug!(urn = task.urn, action = %action, "Task finished");
        self.propagate(tree, task.urn, action);
    }

    /// Apply a result to a node and its clones. Failures are logged and
    /// leave the node `failed`.
    fn propagate(&self, tree: &mut Tree, urn: Urn, action: NodeAction) {
        if let Err(e) = self.apply_status(tree, urn, action) {
            error!(urn, "Failed to apply {}: {}", action, e);
            if let Err(e) = sync_global_status(tree, urn, NodeAction::Failed) {
                error!(urn, "Failed to mark node failed: {}", e);
            }
        }
    }

    fn apply_status(
        &self,
        tree: &mut Tree,
        urn: Urn,
        action: NodeAction,
    ) -> Result<(), OrchestratorError> {
        let updated = sync_global_status(tree, urn, action)?;
        if updated.len() > 1 {
            debug!(urn, "Synchronised {} clone(s) to {}", updated.len() - 1, action);
        }

        if action == NodeAction::Processed {
            if let Some(registry) = &self.registry {
                for urn in updated {
                    if let Some(table) = tree.get(urn).and_then(|n| n.database_table.as_deref()) {
                        registry.mark_completed(table)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn finish(&self, tree: &Tree) -> RunOutcome {
        let blocked = blocked_nodes(tree, &self.config.action_groups);
        let outcome = if blocked.is_empty() {
            let counts = tree.action_counts();
            let count = |action: NodeAction| counts.get(&action).copied().unwrap_or(0);
            let outcome = RunOutcome::Completed {
                processed: count(NodeAction::Processed),
                failed: count(NodeAction::Failed),
                skipped: count(NodeAction::Skipped),
            };
            info!("All nodes finished: {:?}", outcome);
            outcome
        } else {
            error!(
                "Stalled: {} unfinished node(s) and none can run",
                blocked.len()
            );
            for node in &blocked {
                warn!(
                    urn = node.urn,
                    action = %node.action,
                    "Unfinished: {} blocked by {:?}",
                    node.name,
                    node.blocked_by
                );
            }
            RunOutcome::Stalled { unfinished: blocked }
        };
        RUN_OUTCOMES.with_label_values(&[outcome.as_str()]).inc();
        outcome
    }

    fn publish(
        &self,
        tree: &Tree,
        ctx: &TaskContext,
        in_flight: usize,
        outcome: Option<&RunOutcome>,
    ) {
        let snapshot = RunSnapshot {
            running: outcome.is_none(),
            run_id: Some(ctx.run_id()),
            in_flight,
            counts: tree.action_counts().into_iter().collect(),
            outcome: outcome.cloned(),
            nodes: tree.to_list(),
            updated_at: Some(Utc::now()),
        };
        self.status_tx.send_replace(snapshot);
    }
}

async fn run_io(
    downloader: &dyn Downloader,
    unzipper: &dyn Unzipper,
    node: &NodeSnapshot,
    inputs: &[PathBuf],
) -> TaskResult {
    match node.action {
        NodeAction::Download => {
            downloader.fetch(node).await?;
        }
        NodeAction::Unzip => {
            let archive = downloader.local_path(node);
            unzipper.run(node, &archive).await?;
        }
        NodeAction::Concatenate => {
            concatenate(inputs, &downloader.local_path(node)).await?;
        }
        other => return Err(TaskError::Unsupported(other)),
    }
    Ok(advance(node.action, node.database_action, node.is_archive()))
}

/// Join the children's files into one, in child order.
async fn concatenate(inputs: &[PathBuf], destination: &Path) -> Result<(), std::io::Error> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut out = tokio::fs::File::create(destination).await?;
    for input in inputs {
        let bytes = tokio::fs::read(input).await?;
        out.write_all(&bytes).await?;
    }
    out.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NodeAttrs, NodeType};
    use crate::testing::{MockCpuHandler, MockDownloader, MockUnzipper};

    fn orchestrator(downloader: Arc<MockDownloader>) -> Orchestrator {
        Orchestrator::new(
            OrchestratorConfig::default()
                .with_cpu_workers(2)
                .with_poll_interval_ms(20)
                .with_yield_ms(1),
            downloader,
            Arc::new(MockUnzipper::new()),
            Arc::new(MockCpuHandler::new()),
        )
    }

    fn download_node(tree: &mut Tree, name: &str, format: &str) -> Urn {
        let urn = tree
            .add_child(
                tree.root(),
                name,
                NodeAttrs::default()
                    .with_type(NodeType::Source)
                    .with_url(format!("https://data.example/{}", name))
                    .with_format(format),
            )
            .unwrap();
        tree.set_action(urn, NodeAction::Download).unwrap();
        urn
    }

    #[tokio::test]
    async fn test_size_probe_orders_and_caches() {
        let downloader = Arc::new(MockDownloader::new());
        downloader.set_remote_size("small", Some(10)).await;
        downloader.set_remote_size("large", Some(5000)).await;
        let orchestrator = orchestrator(downloader.clone());

        let mut tree = Tree::new();
        let small = download_node(&mut tree, "small", "GPKG");
        let large = download_node(&mut tree, "large", "GPKG");
        let unknown = download_node(&mut tree, "unknown", "GPKG");

        let order = orchestrator.runnable_nodes(&mut tree, None, true).await;
        assert_eq!(order, vec![large, small, unknown]);
        assert_eq!(tree.get(unknown).unwrap().size_hint, Some(0));
        assert_eq!(downloader.size_probe_count().await, 3);

        let again = orchestrator.runnable_nodes(&mut tree, None, true).await;
        assert_eq!(again, order);
        assert_eq!(downloader.size_probe_count().await, 3);
    }

    #[tokio::test]
    async fn test_concatenate_joins_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, b"first\n").unwrap();
        std::fs::write(&b, b"second\n").unwrap();

        let out = dir.path().join("out").join("joined.txt");
        concatenate(&[a, b], &out).await.unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "first\nsecond\n");
    }

    #[tokio::test]
    async fn test_invalid_action_groups_abort_run() {
        let mut config = OrchestratorConfig::default();
        config.action_groups.cpu_bound.push(NodeAction::Download);
        let orchestrator = Orchestrator::new(
            config,
            Arc::new(MockDownloader::new()),
            Arc::new(MockUnzipper::new()),
            Arc::new(MockCpuHandler::new()),
        );
        let mut tree = Tree::new();
        assert!(matches!(
            orchestrator.run(&mut tree).await,
            Err(OrchestratorError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_tree_completes_and_publishes() {
        let orchestrator = orchestrator(Arc::new(MockDownloader::new()));
        let status = orchestrator.subscribe();
        let mut tree = Tree::new();

        let outcome = orchestrator.run(&mut tree).await.unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Completed {
                processed: 1,
                failed: 0,
                skipped: 0
            }
        );
        let snapshot = status.borrow().clone();
        assert!(!snapshot.running);
        assert_eq!(snapshot.outcome, Some(outcome));
        assert_eq!(snapshot.nodes.len(), 1);
    }
}
