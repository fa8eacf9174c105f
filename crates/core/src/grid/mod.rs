//! Spatial processing of imported datasets.
//!
//! Datasets are optionally buffered, cut to the usable area and dissolved
//! per grid cell. The SQL runs on a [`SpatialExecutor`]; scratch tables are
//! dropped before and after use so every step can be re-run.

mod config;
mod dry_run;
mod handler;
mod processor;

pub use config::SpatialConfig;
pub use dry_run::DryRunExecutor;
pub use handler::SpatialTaskHandler;
pub use processor::{GridJob, GridProcessor};

use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpatialError {
    #[error("statement failed: {0}")]
    Execution(String),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("import of {path} failed: {message}")]
    Import { path: String, message: String },
}

/// Blocking access to the spatial database.
pub trait SpatialExecutor: Send + Sync {
    fn execute(&self, sql: &str) -> Result<(), SpatialError>;

    fn table_exists(&self, table: &str) -> Result<bool, SpatialError>;

    /// Ids of the cells in the processing grid.
    fn grid_cell_ids(&self, grid_table: &str) -> Result<Vec<i64>, SpatialError>;

    /// Load a downloaded file or directory into `table`.
    fn import_file(&self, path: &Path, table: &str) -> Result<(), SpatialError>;
}

/// Double-quoted SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Table holding a dataset's buffered geometries.
pub fn buffered_table_name(table: &str) -> String {
    format!("{}_buf", table)
}

/// Table holding a dataset's final, dissolved geometries.
pub fn processed_table_name(table: &str) -> String {
    format!("{}_out", table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("opensite_ab"), "\"opensite_ab\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_derived_names() {
        assert_eq!(buffered_table_name("t"), "t_buf");
        assert_eq!(processed_table_name("t"), "t_out");
    }
}
