//! Reshaping a raw YAML branch into groups and sources.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::model::{DatabaseAction, NodeType, Tree, Urn};

use super::expr::{evaluate, math_context};
use super::BranchError;

/// Branch properties usable in buffer expressions.
pub const FUNCTION_KEYS: [&str; 2] = ["height-to-tip", "blade-radius"];

/// Plain branch properties.
pub const DEFAULT_KEYS: [&str; 5] = ["title", "type", "clipping-path", "osm", "ckan"];

const STRUCTURE: &str = "structure";
const STYLE: &str = "style";
const BUFFERS: &str = "buffers";

/// Copy registry properties onto the branch, turn `structure` into groups
/// and sources, then drop every other raw YAML node.
pub fn enrich_branch(
    tree: &mut Tree,
    branch: Urn,
    defaults: &Map<String, Value>,
) -> Result<(), BranchError> {
    for key in FUNCTION_KEYS.iter().chain(DEFAULT_KEYS.iter()) {
        let local = tree
            .find_child(branch, key)
            .and_then(|n| tree.get(n))
            .and_then(|n| n.custom_properties.get("value").cloned());
        let Some(value) = local.or_else(|| defaults.get(*key).cloned()) else {
            continue;
        };
        let Some(node) = tree.get_mut(branch) else {
            continue;
        };
        if *key == "title" {
            node.title = Some(match value {
                Value::String(s) => s,
                other => other.to_string(),
            });
        } else {
            node.custom_properties.insert(key.to_string(), value);
        }
    }

    let context = match tree.get(branch) {
        Some(node) => math_context(&node.custom_properties, &FUNCTION_KEYS),
        None => return Ok(()),
    };

    let Some(structure) = tree.find_child(branch, STRUCTURE) else {
        let children = tree.get(branch).map(|n| n.children().to_vec()).unwrap_or_default();
        debug!(branch, "No structure in branch, pruning {} node(s)", children.len());
        for child in children {
            tree.delete_node(child);
        }
        return Ok(());
    };
    let style_root = tree.find_child(branch, STYLE);
    let buffer_root = tree.find_child(branch, BUFFERS);

    let categories = tree
        .get(structure)
        .map(|n| n.children().to_vec())
        .unwrap_or_default();

    for category in &categories {
        let category_name = match tree.get_mut(*category) {
            Some(node) => {
                node.node_type = None;
                node.name.clone()
            }
            None => continue,
        };

        if let Some(style) = style_root.and_then(|s| tree.find_child(s, &category_name)) {
            let entries: Map<String, Value> = tree
                .get(style)
                .map(|n| n.children().to_vec())
                .unwrap_or_default()
                .into_iter()
                .filter_map(|c| tree.get(c))
                .map(|c| {
                    (
                        c.name.clone(),
                        c.custom_properties.get("value").cloned().unwrap_or(Value::Null),
                    )
                })
                .collect();
            if let Some(node) = tree.get_mut(*category) {
                node.style = Some(entries);
            }
        }

        let datasets = tree
            .get(*category)
            .map(|n| n.children().to_vec())
            .unwrap_or_default();
        for dataset in datasets {
            let buffer = match tree.get(dataset) {
                Some(node) => buffer_root
                    .and_then(|b| tree.find_child(b, &node.name))
                    .and_then(|b| tree.get(b))
                    .and_then(|b| b.custom_properties.get("value").cloned()),
                None => continue,
            };
            let Some(node) = tree.get_mut(dataset) else {
                continue;
            };
            node.node_type = Some(NodeType::Source);
            if let Some(raw) = buffer {
                node.database_action = Some(DatabaseAction::Buffer);
                let value = match evaluate(&raw, &context) {
                    Ok(distance) => Value::from(distance),
                    Err(e) => {
                        warn!(
                            dataset = %node.name,
                            "Failed to resolve buffer '{}': {}, keeping raw value",
                            raw,
                            e
                        );
                        raw
                    }
                };
                node.custom_properties.insert("buffer_value".to_string(), value);
            }
        }
    }

    for sibling in tree.siblings(structure) {
        tree.delete_node(sibling);
    }
    for category in categories {
        tree.attach(branch, category)?;
    }
    tree.delete_node(structure);
    Ok(())
}
