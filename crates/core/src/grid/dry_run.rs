//! Executor that records statements instead of running them.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

use tracing::info;

use super::{SpatialError, SpatialExecutor};

#[derive(Debug, Default)]
struct State {
    statements: Vec<String>,
    tables: BTreeSet<String>,
}

/// Logs each statement and tracks which tables would exist.
#[derive(Debug)]
pub struct DryRunExecutor {
    state: Mutex<State>,
    grid_ids: Vec<i64>,
}

impl Default for DryRunExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl DryRunExecutor {
    /// A single-cell grid and no tables.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            grid_ids: vec![1],
        }
    }

    pub fn with_grid_ids(mut self, ids: Vec<i64>) -> Self {
        self.grid_ids = ids;
        self
    }

    pub fn with_tables<I, S>(self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock().tables.extend(tables.into_iter().map(Into::into));
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    pub fn tables(&self) -> BTreeSet<String> {
        self.lock().tables.clone()
    }
}

/// Name following `prefix` in a statement, unquoted.
fn table_after<'a>(sql: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = sql.trim_start().strip_prefix(prefix)?;
    let name = rest.split_whitespace().next()?;
    Some(name.trim_matches(|c| c == '"' || c == ';' || c == '('))
}

impl SpatialExecutor for DryRunExecutor {
    fn execute(&self, sql: &str) -> Result<(), SpatialError> {
        let statement = sql.split_whitespace().collect::<Vec<_>>().join(" ");
        info!("[dry run] {}", statement);

        let mut state = self.lock();
        if let Some(table) = table_after(&statement, "CREATE TABLE ") {
            state.tables.insert(table.to_string());
        } else if let Some(table) = table_after(&statement, "DROP TABLE IF EXISTS ") {
            state.tables.remove(table);
        }
        state.statements.push(statement);
        Ok(())
    }

    fn table_exists(&self, table: &str) -> Result<bool, SpatialError> {
        Ok(self.lock().tables.contains(table))
    }

    fn grid_cell_ids(&self, grid_table: &str) -> Result<Vec<i64>, SpatialError> {
        info!("[dry run] SELECT id FROM {}", grid_table);
        Ok(self.grid_ids.clone())
    }

    fn import_file(&self, path: &Path, table: &str) -> Result<(), SpatialError> {
        let statement = format!("IMPORT {} INTO {}", path.display(), table);
        info!("[dry run] {}", statement);
        let mut state = self.lock();
        state.tables.insert(table.to_string());
        state.statements.push(statement);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracks_created_and_dropped_tables() {
        let executor = DryRunExecutor::new();
        executor
            .execute("CREATE TABLE \"a\" AS\n   SELECT 1;")
            .unwrap();
        executor.execute("CREATE TABLE \"b\" (id INTEGER);").unwrap();
        executor.execute("DROP TABLE IF EXISTS \"a\";").unwrap();

        assert!(!executor.table_exists("a").unwrap());
        assert!(executor.table_exists("b").unwrap());
        assert_eq!(executor.statements()[0], "CREATE TABLE \"a\" AS SELECT 1;");
    }

    #[test]
    fn test_import_registers_table() {
        let executor = DryRunExecutor::new().with_grid_ids(vec![3, 4]);
        executor.import_file(Path::new("/d/x.gpkg"), "x").unwrap();
        assert!(executor.table_exists("x").unwrap());
        assert_eq!(executor.grid_cell_ids("grid").unwrap(), vec![3, 4]);
    }
}
