//! SQLite-backed registry.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use super::{RegistryEntry, RegistryError, SpatialRegistry, SyncReport};
use crate::model::{Node, HASH_PROPERTY};

const BRANCH_TABLE: &str = "opensite_branch";
const REGISTRY_TABLE: &str = "opensite_registry";

/// Tables sync never drops.
const PROTECTED_TABLES: [&str; 7] = [
    BRANCH_TABLE,
    REGISTRY_TABLE,
    "spatial_ref_sys",
    "geography_columns",
    "geometry_columns",
    "raster_columns",
    "raster_overview",
];

/// SQLite-backed registry. Physical tables are those of the same database.
pub struct SqliteRegistry {
    conn: Mutex<Connection>,
}

impl SqliteRegistry {
    /// Open (or create) the registry database at `path`.
    pub fn new(path: &Path) -> Result<Self, RegistryError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| RegistryError::Database(e.to_string()))?;
        }
        let conn = Connection::open(path).map_err(|e| RegistryError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory registry (useful for testing).
    pub fn in_memory() -> Result<Self, RegistryError> {
        let conn =
            Connection::open_in_memory().map_err(|e| RegistryError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), RegistryError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS opensite_branch (
                yml_hash TEXT PRIMARY KEY,
                branch_name TEXT NOT NULL,
                config_json TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS opensite_registry (
                completed INTEGER NOT NULL DEFAULT 0,
                table_id TEXT PRIMARY KEY,
                human_name TEXT NOT NULL,
                branch_name TEXT NOT NULL,
                yml_hash TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_registry_branch ON opensite_registry(branch_name);
            "#,
        )
        .map_err(|e| RegistryError::Database(e.to_string()))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, RegistryError> {
        self.conn
            .lock()
            .map_err(|e| RegistryError::Database(format!("lock poisoned: {}", e)))
    }

    /// Run arbitrary SQL against the registry database.
    pub fn execute_batch(&self, sql: &str) -> Result<(), RegistryError> {
        self.lock()?
            .execute_batch(sql)
            .map_err(|e| RegistryError::Database(e.to_string()))
    }

    /// Stored configuration for a branch hash.
    pub fn branch_config(&self, hash: &str) -> Result<Option<serde_json::Value>, RegistryError> {
        let conn = self.lock()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT config_json FROM opensite_branch WHERE yml_hash = ?1",
                params![hash],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| RegistryError::Database(e.to_string()))?;
        json.map(|j| serde_json::from_str(&j).map_err(|e| RegistryError::Database(e.to_string())))
            .transpose()
    }

    fn physical_tables(conn: &Connection) -> Result<HashSet<String>, RegistryError> {
        let mut stmt = conn
            .prepare(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
            )
            .map_err(|e| RegistryError::Database(e.to_string()))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| RegistryError::Database(e.to_string()))?
            .collect::<Result<HashSet<_>, _>>()
            .map_err(|e| RegistryError::Database(e.to_string()))?;
        Ok(names
            .into_iter()
            .filter(|t| !PROTECTED_TABLES.contains(&t.as_str()))
            .collect())
    }

    fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<RegistryEntry> {
        let created_at_str: String = row.get(5)?;
        let created_at = DateTime::parse_from_rfc3339(&created_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        Ok(RegistryEntry {
            completed: row.get(0)?,
            table_id: row.get(1)?,
            human_name: row.get(2)?,
            branch_name: row.get(3)?,
            yml_hash: row.get(4)?,
            created_at,
        })
    }
}

impl SpatialRegistry for SqliteRegistry {
    fn register_branch(
        &self,
        name: &str,
        hash: &str,
        config: &serde_json::Value,
    ) -> Result<(), RegistryError> {
        debug!("Registering branch {} {}", hash, name);
        let config_json =
            serde_json::to_string(config).map_err(|e| RegistryError::Database(e.to_string()))?;
        self.lock()?
            .execute(
                r#"
                INSERT INTO opensite_branch (yml_hash, branch_name, config_json, created_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT (yml_hash) DO UPDATE SET config_json = excluded.config_json
                "#,
                params![hash, name, config_json, Utc::now().to_rfc3339()],
            )
            .map_err(|e| RegistryError::Database(e.to_string()))?;
        Ok(())
    }

    fn register_node(&self, node: &Node, branch: &Node) -> Result<(), RegistryError> {
        let table = node
            .database_table
            .as_deref()
            .ok_or_else(|| RegistryError::MissingTable(node.name.clone()))?;
        let hash = branch
            .custom_properties
            .get(HASH_PROPERTY)
            .and_then(|h| h.as_str())
            .ok_or_else(|| RegistryError::MissingHash(branch.name.clone()))?;

        self.lock()?
            .execute(
                r#"
                INSERT INTO opensite_registry (table_id, human_name, branch_name, yml_hash, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT (table_id) DO UPDATE SET
                    human_name = excluded.human_name,
                    branch_name = excluded.branch_name
                "#,
                params![table, node.name, branch.name, hash, Utc::now().to_rfc3339()],
            )
            .map_err(|e| RegistryError::Database(e.to_string()))?;
        Ok(())
    }

    fn mark_completed(&self, table_id: &str) -> Result<bool, RegistryError> {
        let updated = self
            .lock()?
            .execute(
                "UPDATE opensite_registry SET completed = 1 WHERE table_id = ?1",
                params![table_id],
            )
            .map_err(|e| RegistryError::Database(e.to_string()))?;
        Ok(updated > 0)
    }

    fn entries(&self) -> Result<Vec<RegistryEntry>, RegistryError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT completed, table_id, human_name, branch_name, yml_hash, created_at \
                 FROM opensite_registry ORDER BY table_id",
            )
            .map_err(|e| RegistryError::Database(e.to_string()))?;
        let entries = stmt
            .query_map([], Self::row_to_entry)
            .map_err(|e| RegistryError::Database(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| RegistryError::Database(e.to_string()))?;
        Ok(entries)
    }

    fn sync_registry(&self) -> Result<SyncReport, RegistryError> {
        info!("Starting registry synchronization");
        let entries = self.entries()?;
        let conn = self.lock()?;
        let physical = Self::physical_tables(&conn)?;
        let mut report = SyncReport::default();
        let mut tracked: HashSet<String> = entries.iter().map(|e| e.table_id.clone()).collect();

        for entry in &entries {
            let orphaned = entry.completed && !physical.contains(&entry.table_id);
            if entry.completed && !orphaned {
                continue;
            }
            conn.execute(
                "DELETE FROM opensite_registry WHERE table_id = ?1",
                params![entry.table_id],
            )
            .map_err(|e| RegistryError::Database(e.to_string()))?;
            tracked.remove(&entry.table_id);
            if orphaned {
                debug!("Removing orphaned registry entry (no table found): {}", entry.table_id);
                report.removed_orphaned.push(entry.table_id.clone());
            } else {
                debug!("Removing incomplete registry entry: {}", entry.table_id);
                report.removed_incomplete.push(entry.table_id.clone());
            }
        }

        let mut untracked: Vec<&String> = physical.iter().filter(|t| !tracked.contains(*t)).collect();
        untracked.sort();
        for table in untracked {
            warn!("Dropping untracked table: {}", table);
            conn.execute_batch(&format!("DROP TABLE IF EXISTS \"{}\"", table.replace('"', "\"\"")))
                .map_err(|e| RegistryError::Database(e.to_string()))?;
            report.dropped_tables.push(table.clone());
        }

        let orphaned_branches = {
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT b.branch_name FROM opensite_branch b
                    LEFT JOIN opensite_registry r ON b.branch_name = r.branch_name
                    WHERE r.branch_name IS NULL
                    "#,
                )
                .map_err(|e| RegistryError::Database(e.to_string()))?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| RegistryError::Database(e.to_string()))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| RegistryError::Database(e.to_string()))?;
            names
        };
        for branch in orphaned_branches {
            warn!("Removing orphaned branch metadata: {}", branch);
            conn.execute(
                "DELETE FROM opensite_branch WHERE branch_name = ?1",
                params![branch],
            )
            .map_err(|e| RegistryError::Database(e.to_string()))?;
            report.removed_branches.push(branch);
        }

        info!(
            incomplete = report.removed_incomplete.len(),
            orphaned = report.removed_orphaned.len(),
            dropped = report.dropped_tables.len(),
            branches = report.removed_branches.len(),
            "Registry synchronization complete"
        );
        Ok(report)
    }
}
