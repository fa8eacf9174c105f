//! Building branches from site YAML.

use std::path::Path;

use serde_json::{Map, Value};
use serde_yaml::Value as Yaml;
use tracing::{debug, info};

use crate::model::{content_hash, NodeAttrs, NodeType, Tree, Urn, HASH_PROPERTY, PAYLOAD_PROPERTY};

use super::enrich::enrich_branch;
use super::BranchError;

/// Loads site YAML documents into a tree as branches.
#[derive(Debug, Clone, Default)]
pub struct BranchLoader {
    overrides: Map<String, Value>,
    defaults: Map<String, Value>,
}

impl BranchLoader {
    /// Top-level `overrides` replace keys in every loaded document. They
    /// also act as defaults for branch properties a document leaves out.
    pub fn new(overrides: Map<String, Value>) -> Self {
        Self {
            defaults: overrides.clone(),
            overrides,
        }
    }

    /// Defaults for branch properties. Overrides still win.
    pub fn with_defaults(mut self, defaults: Map<String, Value>) -> Self {
        let mut merged = defaults;
        merged.extend(self.overrides.clone());
        self.defaults = merged;
        self
    }

    pub fn defaults(&self) -> &Map<String, Value> {
        &self.defaults
    }

    /// Load a YAML file as a new branch named after the file.
    ///
    /// Returns `None` when the document is empty.
    pub fn add_yaml_file(&self, tree: &mut Tree, path: &Path) -> Result<Option<Urn>, BranchError> {
        if !path.exists() {
            return Err(BranchError::NotFound(path.display().to_string()));
        }
        let contents = std::fs::read_to_string(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.add_yaml_str(tree, &name, &contents)
    }

    /// Load a YAML document as a new branch called `name`.
    pub fn add_yaml_str(
        &self,
        tree: &mut Tree,
        name: &str,
        yaml: &str,
    ) -> Result<Option<Urn>, BranchError> {
        let document: Yaml = serde_yaml::from_str(yaml)
            .map_err(|e| BranchError::Parse(format!("{}: {}", name, e)))?;

        let Yaml::Mapping(mut mapping) = document else {
            if document.is_null() {
                debug!("Empty document {}, nothing to load", name);
                return Ok(None);
            }
            return Err(BranchError::Parse(format!(
                "{}: top level must be a mapping",
                name
            )));
        };
        if mapping.is_empty() {
            return Ok(None);
        }

        for (key, value) in &self.overrides {
            let value = serde_yaml::to_value(value)
                .map_err(|e| BranchError::Parse(format!("override '{}': {}", key, e)))?;
            mapping.insert(Yaml::String(key.clone()), value);
        }
        let document = Yaml::Mapping(mapping);

        let payload = serde_json::to_value(&document)
            .map_err(|e| BranchError::Parse(format!("{}: {}", name, e)))?;
        let hash = content_hash(&payload);

        let attrs = NodeAttrs::default()
            .with_type(NodeType::Branch)
            .with_property(PAYLOAD_PROPERTY, payload)
            .with_property(HASH_PROPERTY, Value::String(hash.clone()));
        let branch = tree.add_child(tree.root(), name, attrs)?;

        build_from_yaml(tree, &document, branch)?;
        enrich_branch(tree, branch, &self.defaults)?;
        tree.set_node_table_names(branch, branch)?;

        info!(branch = %name, hash = %hash, "Loaded branch with {} node(s)", tree.subtree(branch).len());
        Ok(Some(branch))
    }

    /// Load several files, returning the branches that were created.
    pub fn add_yaml_files(
        &self,
        tree: &mut Tree,
        paths: &[impl AsRef<Path>],
    ) -> Result<Vec<Urn>, BranchError> {
        info!("Batch processing {} YAML file(s)", paths.len());
        let mut branches = Vec::new();
        for path in paths {
            if let Some(branch) = self.add_yaml_file(tree, path.as_ref())? {
                branches.push(branch);
            }
        }
        info!("Added {}/{} file(s) to tree", branches.len(), paths.len());
        Ok(branches)
    }
}

/// Load a YAML file as a branch with the given top-level overrides.
pub fn add_yaml_file(
    tree: &mut Tree,
    path: &Path,
    overrides: &Map<String, Value>,
) -> Result<Option<Urn>, BranchError> {
    BranchLoader::new(overrides.clone()).add_yaml_file(tree, path)
}

/// Load a YAML string as a branch with the given top-level overrides.
pub fn add_yaml_str(
    tree: &mut Tree,
    name: &str,
    yaml: &str,
    overrides: &Map<String, Value>,
) -> Result<Option<Urn>, BranchError> {
    BranchLoader::new(overrides.clone()).add_yaml_str(tree, name, yaml)
}

/// Mapping keys become nodes. Scalar values are kept as the node's `value`
/// property; scalar list items become child nodes.
fn build_from_yaml(tree: &mut Tree, data: &Yaml, parent: Urn) -> Result<(), BranchError> {
    match data {
        Yaml::Mapping(mapping) => {
            for (key, value) in mapping {
                let child = tree.add_child(parent, scalar_name(key), NodeAttrs::default())?;
                match value {
                    Yaml::Mapping(_) | Yaml::Sequence(_) => build_from_yaml(tree, value, child)?,
                    scalar => {
                        let value = serde_json::to_value(scalar)
                            .map_err(|e| BranchError::Parse(e.to_string()))?;
                        if let Some(node) = tree.get_mut(child) {
                            node.custom_properties.insert("value".to_string(), value);
                        }
                    }
                }
            }
        }
        Yaml::Sequence(items) => {
            for item in items {
                match item {
                    Yaml::Mapping(_) | Yaml::Sequence(_) => build_from_yaml(tree, item, parent)?,
                    scalar => {
                        tree.add_child(parent, scalar_name(scalar), NodeAttrs::default())?;
                    }
                }
            }
        }
        _ => {}
    }
    Ok(())
}

fn scalar_name(value: &Yaml) -> String {
    match value {
        Yaml::String(s) => s.clone(),
        Yaml::Bool(b) => b.to_string(),
        Yaml::Number(n) => n.to_string(),
        Yaml::Null => "null".to_string(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}
