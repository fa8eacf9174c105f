use std::sync::Arc;

use tracing::{info, warn};

use super::{
    buffered_table_name, processed_table_name, quote_ident, GridJob, GridProcessor,
    SpatialConfig, SpatialError, SpatialExecutor,
};
use crate::model::NodeAction;
use crate::orchestrator::{CpuTask, CpuTaskError, CpuTaskHandler, TaskContext};

/// CPU task handler backed by a [`SpatialExecutor`].
pub struct SpatialTaskHandler {
    executor: Arc<dyn SpatialExecutor>,
    config: SpatialConfig,
}

impl SpatialTaskHandler {
    pub fn new(executor: Arc<dyn SpatialExecutor>, config: SpatialConfig) -> Self {
        Self { executor, config }
    }

    fn import(&self, task: &CpuTask, table: &str) -> Result<(), CpuTaskError> {
        if self.executor.table_exists(table)? {
            if !self.config.regenerate {
                info!(urn = task.urn, "Table {} exists, skipping import", table);
                return Ok(());
            }
            self.executor
                .execute(&format!("DROP TABLE IF EXISTS {};", quote_ident(table)))?;
        }
        info!(urn = task.urn, "Importing {} into {}", task.input.display(), table);
        self.executor.import_file(&task.input, table)?;
        Ok(())
    }

    fn grid(
        &self,
        task: &CpuTask,
        table: &str,
        buffer: Option<f64>,
        ctx: &TaskContext,
    ) -> Result<(), CpuTaskError> {
        let job = GridJob {
            urn: task.urn,
            name: task.name.clone(),
            source_table: table.to_string(),
            buffer,
        };
        GridProcessor::new(self.executor.as_ref(), &self.config).process(&job, ctx)?;
        Ok(())
    }

    fn amalgamate(&self, task: &CpuTask, table: &str) -> Result<(), CpuTaskError> {
        let output = processed_table_name(table);
        if self.executor.table_exists(&output)? {
            if !self.config.regenerate {
                info!(urn = task.urn, "Table {} exists, skipping amalgamation", output);
                return Ok(());
            }
            self.executor
                .execute(&format!("DROP TABLE IF EXISTS {};", quote_ident(&output)))?;
        }

        let mut selects = Vec::new();
        for input in &task.inputs {
            let candidates = [
                processed_table_name(&buffered_table_name(input)),
                processed_table_name(input),
                input.clone(),
            ];
            let mut source = None;
            for candidate in candidates {
                if self.executor.table_exists(&candidate)? {
                    source = Some(candidate);
                    break;
                }
            }
            match source {
                Some(source) => selects.push(format!("SELECT geom FROM {}", quote_ident(&source))),
                None => warn!(urn = task.urn, "No table for input {}, leaving it out", input),
            }
        }
        if selects.is_empty() {
            return Err(SpatialError::TableNotFound(format!("inputs of {}", task.name)).into());
        }

        info!(
            urn = task.urn,
            "Amalgamating {} table(s) into {}",
            selects.len(),
            output
        );
        self.executor.execute(&format!(
            "CREATE TABLE {} AS SELECT (ST_Dump(ST_Union(geom))).geom geom FROM ({}) inputs;",
            quote_ident(&output),
            selects.join(" UNION ALL ")
        ))?;
        self.executor.execute(&format!(
            "CREATE INDEX {} ON {} USING GIST (geom);",
            quote_ident(&format!("{}_idx", output)),
            quote_ident(&output)
        ))?;
        Ok(())
    }
}

impl CpuTaskHandler for SpatialTaskHandler {
    fn run(&self, task: &CpuTask, ctx: &TaskContext) -> Result<(), CpuTaskError> {
        let table = task
            .database_table
            .as_deref()
            .ok_or_else(|| CpuTaskError::MissingTable(task.name.clone()))?;

        match task.action {
            NodeAction::Import => self.import(task, table),
            NodeAction::Buffer => {
                let distance = task.buffer_distance().ok_or_else(|| {
                    CpuTaskError::Failed(format!("no buffer distance for {}", task.name))
                })?;
                self.grid(task, table, Some(distance), ctx)
            }
            NodeAction::Run => self.grid(task, table, None, ctx),
            NodeAction::Amalgamate => self.amalgamate(task, table),
            other => Err(CpuTaskError::Unsupported(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::DryRunExecutor;
    use crate::model::DatabaseAction;
    use serde_json::{json, Map};
    use std::path::PathBuf;

    fn task(action: NodeAction) -> CpuTask {
        CpuTask {
            urn: 3,
            action,
            input: PathBuf::from("/data/opensite_a_b.gpkg"),
            name: "parks".to_string(),
            database_table: Some("opensite_a_b".to_string()),
            database_action: None,
            custom_properties: Map::new(),
            inputs: vec![],
        }
    }

    fn handler(executor: &Arc<DryRunExecutor>) -> SpatialTaskHandler {
        SpatialTaskHandler::new(executor.clone(), SpatialConfig::default())
    }

    #[test]
    fn test_import_creates_table_once() {
        let executor = Arc::new(DryRunExecutor::new());
        let handler = handler(&executor);
        handler.run(&task(NodeAction::Import), &TaskContext::new()).unwrap();
        assert!(executor.tables().contains("opensite_a_b"));

        let before = executor.statements().len();
        handler.run(&task(NodeAction::Import), &TaskContext::new()).unwrap();
        assert_eq!(executor.statements().len(), before);
    }

    #[test]
    fn test_buffer_requires_distance() {
        let executor = Arc::new(DryRunExecutor::new().with_tables(["opensite_a_b"]));
        let handler = handler(&executor);

        let mut buffer = task(NodeAction::Buffer);
        buffer.database_action = Some(DatabaseAction::Buffer);
        assert!(matches!(
            handler.run(&buffer, &TaskContext::new()),
            Err(CpuTaskError::Failed(_))
        ));

        buffer
            .custom_properties
            .insert("buffer_value".to_string(), json!(50));
        handler.run(&buffer, &TaskContext::new()).unwrap();
        assert!(executor.tables().contains("opensite_a_b_buf_out"));
    }

    #[test]
    fn test_run_processes_without_buffer() {
        let executor = Arc::new(DryRunExecutor::new().with_tables(["opensite_a_b"]));
        handler(&executor)
            .run(&task(NodeAction::Run), &TaskContext::new())
            .unwrap();
        assert!(executor.tables().contains("opensite_a_b_out"));
    }

    #[test]
    fn test_amalgamate_prefers_processed_inputs() {
        let executor = Arc::new(
            DryRunExecutor::new().with_tables([
                "opensite_c1",
                "opensite_c1_out",
                "opensite_c2",
                "opensite_c3_buf_out",
            ]),
        );
        let mut amalgamate = task(NodeAction::Amalgamate);
        amalgamate.inputs = vec![
            "opensite_c1".to_string(),
            "opensite_c2".to_string(),
            "opensite_c3".to_string(),
            "opensite_missing".to_string(),
        ];
        handler(&executor)
            .run(&amalgamate, &TaskContext::new())
            .unwrap();

        let create = executor
            .statements()
            .into_iter()
            .find(|s| s.starts_with("CREATE TABLE \"opensite_a_b_out\""))
            .unwrap();
        assert!(create.contains("FROM \"opensite_c1_out\""));
        assert!(create.contains("FROM \"opensite_c2\""));
        assert!(create.contains("FROM \"opensite_c3_buf_out\""));
        assert!(!create.contains("opensite_missing"));
    }

    #[test]
    fn test_amalgamate_without_inputs_fails() {
        let executor = Arc::new(DryRunExecutor::new());
        let result = handler(&executor).run(&task(NodeAction::Amalgamate), &TaskContext::new());
        assert!(matches!(
            result,
            Err(CpuTaskError::Spatial(SpatialError::TableNotFound(_)))
        ));
    }

    #[test]
    fn test_missing_table_and_unsupported_action() {
        let executor = Arc::new(DryRunExecutor::new());
        let handler = handler(&executor);

        let mut no_table = task(NodeAction::Import);
        no_table.database_table = None;
        assert!(matches!(
            handler.run(&no_table, &TaskContext::new()),
            Err(CpuTaskError::MissingTable(_))
        ));
        assert!(matches!(
            handler.run(&task(NodeAction::Download), &TaskContext::new()),
            Err(CpuTaskError::Unsupported(NodeAction::Download))
        ));
    }
}
