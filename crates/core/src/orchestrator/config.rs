//! Orchestrator configuration.

use serde::{Deserialize, Serialize};

use crate::model::NodeAction;

/// Worker pool an action is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionGroup {
    IoBound,
    CpuBound,
    Terminal,
}

impl ActionGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionGroup::IoBound => "io_bound",
            ActionGroup::CpuBound => "cpu_bound",
            ActionGroup::Terminal => "terminal",
        }
    }
}

/// Classification of lifecycle actions into pools.
///
/// Every action except `unprocessed` must appear in exactly one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionGroups {
    #[serde(default = "default_io_bound")]
    pub io_bound: Vec<NodeAction>,
    #[serde(default = "default_cpu_bound")]
    pub cpu_bound: Vec<NodeAction>,
    #[serde(default = "default_terminal")]
    pub terminal: Vec<NodeAction>,
}

fn default_io_bound() -> Vec<NodeAction> {
    vec![NodeAction::Download, NodeAction::Unzip, NodeAction::Concatenate]
}

fn default_cpu_bound() -> Vec<NodeAction> {
    vec![
        NodeAction::Amalgamate,
        NodeAction::Import,
        NodeAction::Buffer,
        NodeAction::Run,
    ]
}

fn default_terminal() -> Vec<NodeAction> {
    vec![NodeAction::Processed, NodeAction::Failed, NodeAction::Skipped]
}

impl Default for ActionGroups {
    fn default() -> Self {
        Self {
            io_bound: default_io_bound(),
            cpu_bound: default_cpu_bound(),
            terminal: default_terminal(),
        }
    }
}

impl ActionGroups {
    /// Group an action belongs to, if any.
    pub fn group_of(&self, action: NodeAction) -> Option<ActionGroup> {
        if self.io_bound.contains(&action) {
            Some(ActionGroup::IoBound)
        } else if self.cpu_bound.contains(&action) {
            Some(ActionGroup::CpuBound)
        } else if self.terminal.contains(&action) {
            Some(ActionGroup::Terminal)
        } else {
            None
        }
    }

    pub fn is_terminal(&self, action: NodeAction) -> bool {
        self.terminal.contains(&action)
    }

    /// Check that the groups are disjoint, cover every action but
    /// `unprocessed`, and that the terminal group is exactly
    /// processed/failed/skipped.
    pub fn validate(&self) -> Result<(), String> {
        for action in NodeAction::ALL {
            let count = [&self.io_bound, &self.cpu_bound, &self.terminal]
                .iter()
                .filter(|group| group.contains(&action))
                .count();
            match (action, count) {
                (NodeAction::Unprocessed, 0) => {}
                (NodeAction::Unprocessed, _) => {
                    return Err("action 'unprocessed' cannot belong to a group".to_string())
                }
                (_, 0) => return Err(format!("action '{}' is not in any group", action)),
                (_, 1) => {}
                (_, _) => {
                    return Err(format!("action '{}' appears in more than one group", action))
                }
            }
        }

        let mut terminal = self.terminal.clone();
        terminal.sort();
        terminal.dedup();
        if terminal != default_terminal() {
            return Err("terminal group must be exactly processed, failed, skipped".to_string());
        }
        Ok(())
    }
}

/// Configuration for the task orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Size of the CPU pool. Defaults to the available parallelism.
    #[serde(default)]
    pub cpu_workers: Option<usize>,

    /// I/O pool size as a multiple of the CPU pool size.
    #[serde(default = "default_io_multiplier")]
    pub io_worker_multiplier: usize,

    /// Upper bound on concurrent remote size probes.
    #[serde(default = "default_size_probe_concurrency")]
    pub size_probe_concurrency: usize,

    /// How long to wait for a completion before re-scanning (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Pause between loop iterations (milliseconds).
    #[serde(default = "default_yield")]
    pub yield_ms: u64,

    /// Probe remote sizes on the first pass.
    #[serde(default = "default_true")]
    pub check_remote_sizes: bool,

    /// Actions dispatched by the steady-state loop. Empty means no filter.
    #[serde(default = "default_steady_state_actions")]
    pub steady_state_actions: Vec<NodeAction>,

    #[serde(default)]
    pub action_groups: ActionGroups,

    /// Format ordering used as the sort tie-break. Unlisted formats sort last.
    #[serde(default = "default_format_priority")]
    pub format_priority: Vec<String>,
}

fn default_io_multiplier() -> usize {
    4
}

fn default_size_probe_concurrency() -> usize {
    20
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_yield() -> u64 {
    50
}

fn default_true() -> bool {
    true
}

fn default_steady_state_actions() -> Vec<NodeAction> {
    vec![NodeAction::Download, NodeAction::Unzip]
}

pub fn default_format_priority() -> Vec<String> {
    [
        "GPKG",
        "ArcGIS GeoServices REST API",
        "GeoJSON",
        "WFS",
        "KML",
        "osm-export-tool YML",
        "Open Site Energy YML",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            cpu_workers: None,
            io_worker_multiplier: default_io_multiplier(),
            size_probe_concurrency: default_size_probe_concurrency(),
            poll_interval_ms: default_poll_interval(),
            yield_ms: default_yield(),
            check_remote_sizes: true,
            steady_state_actions: default_steady_state_actions(),
            action_groups: ActionGroups::default(),
            format_priority: default_format_priority(),
        }
    }
}

impl OrchestratorConfig {
    pub fn cpu_workers(&self) -> usize {
        self.cpu_workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    pub fn io_workers(&self) -> usize {
        self.cpu_workers() * self.io_worker_multiplier
    }

    pub fn with_cpu_workers(mut self, workers: usize) -> Self {
        self.cpu_workers = Some(workers);
        self
    }

    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_yield_ms(mut self, ms: u64) -> Self {
        self.yield_ms = ms;
        self
    }

    pub fn with_steady_state_actions(mut self, actions: Vec<NodeAction>) -> Self {
        self.steady_state_actions = actions;
        self
    }

    pub fn with_format_priority(mut self, formats: Vec<String>) -> Self {
        self.format_priority = formats;
        self
    }

    pub fn with_remote_size_check(mut self, enabled: bool) -> Self {
        self.check_remote_sizes = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.io_worker_multiplier, 4);
        assert_eq!(config.size_probe_concurrency, 20);
        assert_eq!(config.poll_interval_ms, 1000);
        assert_eq!(config.yield_ms, 50);
        assert!(config.check_remote_sizes);
        assert_eq!(
            config.steady_state_actions,
            vec![NodeAction::Download, NodeAction::Unzip]
        );
        assert_eq!(config.format_priority[0], "GPKG");
        assert!(config.cpu_workers() >= 1);
        assert_eq!(config.io_workers(), config.cpu_workers() * 4);
    }

    #[test]
    fn test_deserialize_full() {
        let toml = r#"
            cpu_workers = 2
            io_worker_multiplier = 3
            poll_interval_ms = 250
            steady_state_actions = []
            format_priority = ["GeoJSON", "GPKG"]

            [action_groups]
            io_bound = ["download", "unzip", "concatenate"]
            cpu_bound = ["amalgamate", "import", "buffer", "run"]
            terminal = ["processed", "failed", "skipped"]
        "#;
        let config: OrchestratorConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.cpu_workers(), 2);
        assert_eq!(config.io_workers(), 6);
        assert_eq!(config.poll_interval_ms, 250);
        assert!(config.steady_state_actions.is_empty());
        assert_eq!(config.format_priority, vec!["GeoJSON", "GPKG"]);
        assert!(config.action_groups.validate().is_ok());
    }

    #[test]
    fn test_group_of() {
        let groups = ActionGroups::default();
        assert_eq!(groups.group_of(NodeAction::Download), Some(ActionGroup::IoBound));
        assert_eq!(groups.group_of(NodeAction::Buffer), Some(ActionGroup::CpuBound));
        assert_eq!(groups.group_of(NodeAction::Skipped), Some(ActionGroup::Terminal));
        assert_eq!(groups.group_of(NodeAction::Unprocessed), None);
        assert!(groups.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_overlap() {
        let mut groups = ActionGroups::default();
        groups.cpu_bound.push(NodeAction::Download);
        let err = groups.validate().unwrap_err();
        assert!(err.contains("download"));
    }

    #[test]
    fn test_validate_rejects_missing_action() {
        let mut groups = ActionGroups::default();
        groups.cpu_bound.retain(|a| *a != NodeAction::Run);
        assert!(groups.validate().unwrap_err().contains("run"));
    }

    #[test]
    fn test_validate_rejects_moved_terminal() {
        let mut groups = ActionGroups::default();
        groups.terminal.retain(|a| *a != NodeAction::Skipped);
        groups.io_bound.push(NodeAction::Skipped);
        assert!(groups.validate().is_err());
    }
}
