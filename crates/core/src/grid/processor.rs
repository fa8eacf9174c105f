//! Buffer, clip and per-cell dissolve of one dataset.

use tracing::info;

use super::{
    buffered_table_name, processed_table_name, quote_ident, SpatialConfig, SpatialError,
    SpatialExecutor,
};
use crate::model::Urn;
use crate::orchestrator::TaskContext;

/// One dataset to process.
#[derive(Debug, Clone, PartialEq)]
pub struct GridJob {
    pub urn: Urn,
    pub name: String,
    /// Imported source table.
    pub source_table: String,
    /// Buffer distance in metres.
    pub buffer: Option<f64>,
}

impl GridJob {
    fn prefix(&self) -> String {
        format!("[{:04}] ", self.urn)
    }

    fn scratch_tables(&self) -> [String; 3] {
        [1, 2, 3].map(|n| format!("_scratch_table_{}_{:04}", n, self.urn))
    }

    /// Hedgerow polygons are field boundaries and are buffered as lines.
    fn buffer_polygons_as_lines(&self) -> bool {
        self.name.contains("hedgerow")
    }
}

pub struct GridProcessor<'a> {
    executor: &'a dyn SpatialExecutor,
    config: &'a SpatialConfig,
}

impl<'a> GridProcessor<'a> {
    pub fn new(executor: &'a dyn SpatialExecutor, config: &'a SpatialConfig) -> Self {
        Self { executor, config }
    }

    fn drop_table(&self, table: &str) -> Result<(), SpatialError> {
        if self.executor.table_exists(table)? {
            self.executor
                .execute(&format!("DROP TABLE IF EXISTS {};", quote_ident(table)))?;
        }
        Ok(())
    }

    fn create_gist_index(&self, table: &str) -> Result<(), SpatialError> {
        self.executor.execute(&format!(
            "CREATE INDEX {} ON {} USING GIST (geom);",
            quote_ident(&format!("{}_idx", table)),
            quote_ident(table)
        ))
    }

    /// Run the job, returning the processed table name.
    pub fn process(&self, job: &GridJob, ctx: &TaskContext) -> Result<String, SpatialError> {
        let prefix = job.prefix();
        let scratch = job.scratch_tables();
        for table in &scratch {
            self.drop_table(table)?;
        }

        if !self.executor.table_exists(&job.source_table)? {
            return Err(SpatialError::TableNotFound(job.source_table.clone()));
        }

        {
            let _guard = ctx.log_guard();
            info!(
                "{}STARTING: Processing: {} [{} dataset(s) to be processed]",
                prefix,
                job.source_table,
                ctx.remaining()
            );
        }

        let mut source = job.source_table.clone();
        if let Some(distance) = job.buffer {
            source = self.buffer(job, distance)?;
        }

        let processed = processed_table_name(&source);
        let exists = self.executor.table_exists(&processed)?;
        if exists && !self.config.regenerate {
            info!("{}{}: processed table exists, skipping", prefix, processed);
            return Ok(processed);
        }
        if exists {
            self.drop_table(&processed)?;
        }

        let [scratch_1, scratch_2, scratch_3] = &scratch;
        let clipping = quote_ident(&self.config.clipping_table);

        info!("{}{}: Select only polygons, dump and make valid", prefix, source);
        self.executor.execute(&format!(
            "CREATE TABLE {} AS SELECT ST_MakeValid(dumped.geom) geom \
             FROM (SELECT (ST_Dump(geom)).geom geom FROM {}) dumped \
             WHERE ST_GeometryType(dumped.geom) = 'ST_Polygon';",
            quote_ident(scratch_1),
            quote_ident(&source)
        ))?;
        self.create_gist_index(scratch_1)?;

        info!("{}{}: Clipping partially overlapping polygons", prefix, source);
        self.executor.execute(&format!(
            "CREATE TABLE {} AS SELECT ST_Intersection(clipping.geom, data.geom) geom \
             FROM {} data, {} clipping \
             WHERE (NOT ST_Contains(clipping.geom, data.geom) AND ST_Intersects(clipping.geom, data.geom));",
            quote_ident(scratch_2),
            quote_ident(scratch_1),
            clipping
        ))?;

        info!("{}{}: Adding fully enclosed polygons", prefix, source);
        self.executor.execute(&format!(
            "INSERT INTO {} SELECT data.geom FROM {} data, {} clipping \
             WHERE ST_Contains(clipping.geom, data.geom);",
            quote_ident(scratch_2),
            quote_ident(scratch_1),
            clipping
        ))?;

        info!("{}{}: Dumping geometries", prefix, source);
        self.executor.execute(&format!(
            "CREATE TABLE {} AS SELECT (ST_Dump(geom)).geom geom FROM {};",
            quote_ident(scratch_3),
            quote_ident(scratch_2)
        ))?;
        self.create_gist_index(scratch_3)?;

        info!("{}{}: Dissolving dataset", prefix, source);
        self.executor.execute(&format!(
            "CREATE TABLE {} (id INTEGER, geom GEOMETRY(Polygon, 4326));",
            quote_ident(&processed)
        ))?;
        self.executor.execute(&format!(
            "CREATE INDEX {} ON {}(id);",
            quote_ident(&format!("{}_id_idx", processed)),
            quote_ident(&processed)
        ))?;

        let grid = quote_ident(&self.config.grid_table);
        let cells = self.executor.grid_cell_ids(&self.config.grid_table)?;
        for (index, cell) in cells.iter().enumerate() {
            info!(
                "{}{}: Processing grid square {}/{}",
                prefix,
                source,
                index + 1,
                cells.len()
            );
            self.executor.execute(&format!(
                "INSERT INTO {} SELECT grid.id, \
                 (ST_Dump(ST_Union(ST_Intersection(grid.geom, dataset.geom)))).geom geom \
                 FROM {} grid, {} dataset \
                 WHERE grid.id = {} AND ST_GeometryType(dataset.geom) = 'ST_Polygon' GROUP BY grid.id;",
                quote_ident(&processed),
                grid,
                quote_ident(scratch_3),
                cell
            ))?;
        }
        self.create_gist_index(&processed)?;

        for table in &scratch {
            self.drop_table(table)?;
        }

        let _guard = ctx.log_guard();
        info!(
            "{}FINISHED: Processed table: {} [{} dataset(s) to be processed]",
            prefix,
            processed,
            ctx.remaining().saturating_sub(1)
        );
        Ok(processed)
    }

    fn buffer(&self, job: &GridJob, distance: f64) -> Result<String, SpatialError> {
        let prefix = job.prefix();
        let source = quote_ident(&job.source_table);
        let buffered = buffered_table_name(&job.source_table);
        let exists = self.executor.table_exists(&buffered)?;
        if exists && !self.config.regenerate {
            return Ok(buffered);
        }

        info!(
            "{}Adding {}m buffer: {} -> {}",
            prefix, distance, job.source_table, buffered
        );
        if exists {
            self.drop_table(&buffered)?;
        }

        let sql = if job.buffer_polygons_as_lines() {
            format!(
                "CREATE TABLE {buffered} AS (\
                 (SELECT ST_Buffer(geom::geography, {d})::geometry geom FROM {src} \
                 WHERE ST_GeometryType(geom) = 'ST_LineString') UNION \
                 (SELECT ST_Buffer(ST_Boundary(geom)::geography, {d})::geometry geom FROM {src} \
                 WHERE ST_GeometryType(geom) IN ('ST_Polygon', 'ST_MultiPolygon')));",
                buffered = quote_ident(&buffered),
                d = distance,
                src = source
            )
        } else {
            format!(
                "CREATE TABLE {} AS SELECT ST_Buffer(geom::geography, {})::geometry geom FROM {};",
                quote_ident(&buffered),
                distance,
                source
            )
        };
        self.executor.execute(&sql)?;
        self.create_gist_index(&buffered)?;
        Ok(buffered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::DryRunExecutor;

    fn job(name: &str, buffer: Option<f64>) -> GridJob {
        GridJob {
            urn: 7,
            name: name.to_string(),
            source_table: "opensite_src".to_string(),
            buffer,
        }
    }

    #[test]
    fn test_process_creates_processed_table_and_drops_scratch() {
        let executor = DryRunExecutor::new()
            .with_grid_ids(vec![1, 2, 3])
            .with_tables(["opensite_src"]);
        let config = SpatialConfig::default();
        let processor = GridProcessor::new(&executor, &config);

        let processed = processor.process(&job("parks", None), &TaskContext::new()).unwrap();
        assert_eq!(processed, "opensite_src_out");

        let tables = executor.tables();
        assert!(tables.contains("opensite_src_out"));
        assert!(!tables.iter().any(|t| t.starts_with("_scratch_table_")));

        let statements = executor.statements();
        let per_cell = statements
            .iter()
            .filter(|s| s.contains("ST_Dump(ST_Union(ST_Intersection"))
            .count();
        assert_eq!(per_cell, 3);
        assert!(statements.iter().any(|s| s.contains("\"_scratch_table_1_0007\"")));
    }

    #[test]
    fn test_buffer_then_process() {
        let executor = DryRunExecutor::new().with_tables(["opensite_src"]);
        let config = SpatialConfig::default();
        let processor = GridProcessor::new(&executor, &config);

        let processed = processor
            .process(&job("parks", Some(165.0)), &TaskContext::new())
            .unwrap();
        assert_eq!(processed, "opensite_src_buf_out");
        assert!(executor
            .statements()
            .iter()
            .any(|s| s.contains("ST_Buffer(geom::geography, 165)")));
    }

    #[test]
    fn test_hedgerow_buffers_boundaries() {
        let executor = DryRunExecutor::new().with_tables(["opensite_src"]);
        let config = SpatialConfig::default();
        GridProcessor::new(&executor, &config)
            .process(&job("hedgerow", Some(20.0)), &TaskContext::new())
            .unwrap();
        assert!(executor
            .statements()
            .iter()
            .any(|s| s.contains("ST_Boundary(geom)::geography")));
    }

    #[test]
    fn test_existing_output_is_kept_unless_regenerating() {
        let executor =
            DryRunExecutor::new().with_tables(["opensite_src", "opensite_src_out"]);
        let config = SpatialConfig::default();
        GridProcessor::new(&executor, &config)
            .process(&job("parks", None), &TaskContext::new())
            .unwrap();
        assert!(!executor
            .statements()
            .iter()
            .any(|s| s.starts_with("CREATE TABLE \"opensite_src_out\"")));

        let regenerate = SpatialConfig {
            regenerate: true,
            ..SpatialConfig::default()
        };
        GridProcessor::new(&executor, &regenerate)
            .process(&job("parks", None), &TaskContext::new())
            .unwrap();
        assert!(executor
            .statements()
            .iter()
            .any(|s| s.starts_with("CREATE TABLE \"opensite_src_out\"")));
    }

    #[test]
    fn test_missing_source_table() {
        let executor = DryRunExecutor::new();
        let config = SpatialConfig::default();
        let err = GridProcessor::new(&executor, &config)
            .process(&job("parks", None), &TaskContext::new())
            .unwrap_err();
        assert!(matches!(err, SpatialError::TableNotFound(t) if t == "opensite_src"));
    }
}
