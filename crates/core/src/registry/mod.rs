//! Bookkeeping of branch configurations and node tables.
//!
//! The registry records which table belongs to which node and branch, and
//! whether it was completed. Synchronising it against the database removes
//! incomplete or orphaned rows, drops tables nothing tracks and forgets
//! branches with no remaining rows.

mod sqlite;

pub use sqlite::SqliteRegistry;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::model::{Node, Tree, HASH_PROPERTY};

/// Errors that can occur in registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("database error: {0}")]
    Database(String),

    #[error("node '{0}' has no database_table")]
    MissingTable(String),

    #[error("branch '{0}' has no content hash")]
    MissingHash(String),
}

/// One node table row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub table_id: String,
    pub human_name: String,
    pub branch_name: String,
    pub yml_hash: String,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

/// What a registry synchronisation removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub removed_incomplete: Vec<String>,
    pub removed_orphaned: Vec<String>,
    pub dropped_tables: Vec<String>,
    pub removed_branches: Vec<String>,
}

/// Persistent registry of branches and node tables.
pub trait SpatialRegistry: Send + Sync {
    /// Store a branch configuration under its content hash.
    fn register_branch(
        &self,
        name: &str,
        hash: &str,
        config: &serde_json::Value,
    ) -> Result<(), RegistryError>;

    /// Record a node's table. Fails if the node has no table name.
    fn register_node(&self, node: &Node, branch: &Node) -> Result<(), RegistryError>;

    /// Flag a table as complete. Returns false if the table is unknown.
    fn mark_completed(&self, table_id: &str) -> Result<bool, RegistryError>;

    fn entries(&self) -> Result<Vec<RegistryEntry>, RegistryError>;

    /// Reconcile registry rows, physical tables and branch metadata.
    fn sync_registry(&self) -> Result<SyncReport, RegistryError>;
}

/// Register every branch under the root and all of its nodes.
///
/// Returns the number of node rows written.
pub fn register_tree(tree: &Tree, registry: &dyn SpatialRegistry) -> Result<usize, RegistryError> {
    info!("Starting database synchronization");
    let mut registered = 0;

    for branch_urn in tree.branches() {
        let Some(branch) = tree.get(branch_urn) else {
            continue;
        };
        let hash = branch
            .custom_properties
            .get(HASH_PROPERTY)
            .and_then(|h| h.as_str())
            .ok_or_else(|| RegistryError::MissingHash(branch.name.clone()))?;
        info!(
            "Syncing branch: {} [{}]",
            branch.name,
            &hash[..hash.len().min(8)]
        );

        let config = serde_json::Value::Object(branch.custom_properties.clone());
        registry.register_branch(&branch.name, hash, &config)?;

        for urn in tree.subtree(branch_urn) {
            if let Some(node) = tree.get(urn) {
                debug!("Mapping node: {} -> {:?}", node.name, node.database_table);
                registry.register_node(node, branch)?;
                registered += 1;
            }
        }
    }

    info!("Database synchronization complete, {} node(s) registered", registered);
    Ok(registered)
}
