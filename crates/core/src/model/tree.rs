//! Registry-backed work tree.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use super::naming;
use super::node::{
    DatabaseAction, GlobalUrn, Node, NodeAction, NodeAttrs, NodeSnapshot, NodeSummary, NodeType,
    Urn,
};

/// Custom property holding a branch's content hash.
pub const HASH_PROPERTY: &str = "hash";

/// Custom property holding a branch's resolved configuration payload.
pub const PAYLOAD_PROPERTY: &str = "yml";

/// Errors raised by structural operations on the tree.
#[derive(Debug, Error)]
pub enum TreeError {
    #[error("node not found: {0}")]
    NodeNotFound(Urn),

    #[error("branch '{0}' has no content hash, table names cannot be derived")]
    MissingBranchHash(String),

    #[error("cannot attach node {child} under {parent}: would create a cycle")]
    Cycle { parent: Urn, child: Urn },
}

/// The work tree: an urn registry plus parent/child edges.
///
/// The registry owns every node. Edges are urns, so removing a subtree from
/// the registry and from its parent's child list is the whole deletion.
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: BTreeMap<Urn, Node>,
    next_urn: Urn,
    next_global_urn: GlobalUrn,
    root: Urn,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    /// Create a tree holding only the root node.
    pub fn new() -> Self {
        let mut tree = Self {
            nodes: BTreeMap::new(),
            next_urn: 1,
            next_global_urn: 1,
            root: 0,
        };
        tree.root = tree.create_node("root", NodeAttrs::default().with_type(NodeType::Root));
        tree
    }

    pub fn root(&self) -> Urn {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, urn: Urn) -> bool {
        self.nodes.contains_key(&urn)
    }

    pub fn get(&self, urn: Urn) -> Option<&Node> {
        self.nodes.get(&urn)
    }

    pub fn get_mut(&mut self, urn: Urn) -> Option<&mut Node> {
        self.nodes.get_mut(&urn)
    }

    fn node(&self, urn: Urn) -> Result<&Node, TreeError> {
        self.nodes.get(&urn).ok_or(TreeError::NodeNotFound(urn))
    }

    fn node_mut(&mut self, urn: Urn) -> Result<&mut Node, TreeError> {
        self.nodes.get_mut(&urn).ok_or(TreeError::NodeNotFound(urn))
    }

    /// All registered nodes in urn order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Allocate the next urn and register a detached node.
    pub fn create_node(&mut self, name: impl Into<String>, attrs: NodeAttrs) -> Urn {
        let urn = self.next_urn;
        self.next_urn += 1;
        if let Some(global_urn) = attrs.global_urn {
            self.next_global_urn = self.next_global_urn.max(global_urn + 1);
        }
        self.nodes.insert(urn, Node::new(urn, name, attrs));
        urn
    }

    /// Allocate a fresh global urn for a set of clones.
    pub fn allocate_global_urn(&mut self) -> GlobalUrn {
        let global_urn = self.next_global_urn;
        self.next_global_urn += 1;
        global_urn
    }

    /// Move `child` under `parent`, detaching it from any previous parent.
    pub fn attach(&mut self, parent: Urn, child: Urn) -> Result<(), TreeError> {
        self.node(parent)?;
        self.node(child)?;
        if self.is_ancestor_or_self(child, parent) {
            return Err(TreeError::Cycle { parent, child });
        }
        self.detach(child);
        self.node_mut(child)?.parent = Some(parent);
        self.node_mut(parent)?.children.push(child);
        Ok(())
    }

    /// Create a node and attach it under `parent`.
    pub fn add_child(
        &mut self,
        parent: Urn,
        name: impl Into<String>,
        attrs: NodeAttrs,
    ) -> Result<Urn, TreeError> {
        self.node(parent)?;
        let urn = self.create_node(name, attrs);
        self.attach(parent, urn)?;
        Ok(urn)
    }

    fn detach(&mut self, urn: Urn) {
        let Some(parent) = self.nodes.get_mut(&urn).and_then(|n| n.parent.take()) else {
            return;
        };
        if let Some(parent) = self.nodes.get_mut(&parent) {
            parent.children.retain(|c| *c != urn);
        }
    }

    fn is_ancestor_or_self(&self, ancestor: Urn, mut urn: Urn) -> bool {
        loop {
            if urn == ancestor {
                return true;
            }
            match self.nodes.get(&urn).and_then(|n| n.parent) {
                Some(parent) => urn = parent,
                None => return false,
            }
        }
    }

    /// Remove a node and its whole subtree from the registry.
    ///
    /// Returns the urns that were unregistered. Unknown urns are a no-op.
    pub fn delete_node(&mut self, urn: Urn) -> Vec<Urn> {
        if !self.nodes.contains_key(&urn) {
            return Vec::new();
        }
        self.detach(urn);

        let mut removed = Vec::new();
        let mut stack = vec![urn];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.remove(&current) {
                stack.extend(node.children);
                removed.push(current);
            }
        }
        if urn == self.root {
            debug!("Root deleted, tree is now empty");
        }
        removed
    }

    /// Depth-first search by name from `start` (the root by default).
    /// First match in pre-order wins.
    pub fn find_node(&self, name: &str, start: Option<Urn>) -> Option<Urn> {
        let start = start.unwrap_or(self.root);
        let node = self.nodes.get(&start)?;
        if node.name == name {
            return Some(start);
        }
        node.children
            .iter()
            .find_map(|child| self.find_node(name, Some(*child)))
    }

    /// Direct-children lookup by name.
    pub fn find_child(&self, parent: Urn, name: &str) -> Option<Urn> {
        self.nodes
            .get(&parent)?
            .children
            .iter()
            .copied()
            .find(|c| self.nodes.get(c).is_some_and(|n| n.name == name))
    }

    /// All other children of the node's parent.
    pub fn siblings(&self, urn: Urn) -> Vec<Urn> {
        let Some(parent) = self.nodes.get(&urn).and_then(|n| n.parent) else {
            return Vec::new();
        };
        self.nodes
            .get(&parent)
            .map(|p| p.children.iter().copied().filter(|c| *c != urn).collect())
            .unwrap_or_default()
    }

    /// Property lookup on the node, then on each ancestor.
    pub fn property(&self, urn: Urn, key: &str) -> Option<&Value> {
        let mut current = self.nodes.get(&urn);
        while let Some(node) = current {
            if let Some(value) = node.custom_properties.get(key) {
                return Some(value);
            }
            current = node.parent.and_then(|p| self.nodes.get(&p));
        }
        None
    }

    /// Nearest node of type `branch` at or above `urn`.
    pub fn branch_of(&self, urn: Urn) -> Option<Urn> {
        let mut current = self.nodes.get(&urn);
        while let Some(node) = current {
            if node.node_type == Some(NodeType::Branch) {
                return Some(node.urn);
            }
            current = node.parent.and_then(|p| self.nodes.get(&p));
        }
        None
    }

    /// Branch nodes directly under the root.
    pub fn branches(&self) -> Vec<Urn> {
        self.nodes
            .get(&self.root)
            .map(|root| {
                root.children
                    .iter()
                    .copied()
                    .filter(|c| {
                        self.nodes
                            .get(c)
                            .is_some_and(|n| n.node_type == Some(NodeType::Branch))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Table name for `urn` under `branch`.
    pub fn table_name(&self, urn: Urn, branch: Urn) -> Result<String, TreeError> {
        let node = self.node(urn)?;
        let branch = self.node(branch)?;
        let hash = branch
            .custom_properties
            .get(HASH_PROPERTY)
            .and_then(Value::as_str)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| TreeError::MissingBranchHash(branch.name.clone()))?;
        Ok(naming::table_name(&node.name, hash))
    }

    /// Set `database_table` on `urn` and every descendant.
    pub fn set_node_table_names(&mut self, urn: Urn, branch: Urn) -> Result<(), TreeError> {
        for current in self.subtree(urn) {
            let table = self.table_name(current, branch)?;
            let node = self.node_mut(current)?;
            debug!(urn = current, table = %table, "Setting database_table of {}", node.name);
            node.database_table = Some(table);
        }
        Ok(())
    }

    /// Pre-order list of `urn` and its descendants.
    pub fn subtree(&self, urn: Urn) -> Vec<Urn> {
        let mut out = Vec::new();
        let mut stack = vec![urn];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(&current) {
                out.push(current);
                stack.extend(node.children.iter().rev());
            }
        }
        out
    }

    /// Nodes sharing `global_urn`, in urn order.
    pub fn nodes_with_global_urn(&self, global_urn: GlobalUrn) -> Vec<Urn> {
        self.nodes
            .values()
            .filter(|n| n.global_urn == Some(global_urn))
            .map(|n| n.urn)
            .collect()
    }

    /// Set a node's lifecycle action and record it in the node log.
    pub fn set_action(&mut self, urn: Urn, action: NodeAction) -> Result<(), TreeError> {
        let node = self.node_mut(urn)?;
        node.action = action;
        node.add_log(action);
        Ok(())
    }

    pub fn snapshot(&self, urn: Urn) -> Option<NodeSnapshot> {
        self.nodes.get(&urn).map(NodeSnapshot::from)
    }

    /// Give source nodes that produce the same table one shared global urn.
    ///
    /// Clones share the origin (URL when known, otherwise node name), the
    /// target table, the database action and the buffer distance. Sources in
    /// branches with different content hashes never share, since their
    /// tables differ.
    ///
    /// Returns the number of clone groups.
    pub fn assign_global_urns(&mut self) -> usize {
        let mut groups: BTreeMap<String, Vec<Urn>> = BTreeMap::new();
        for node in self.nodes.values().filter(|n| n.is_source()) {
            groups.entry(clone_key(node)).or_default().push(node.urn);
        }

        let mut assigned = 0;
        for members in groups.into_values() {
            if members.len() < 2 {
                for urn in members {
                    if let Some(node) = self.nodes.get_mut(&urn) {
                        node.global_urn = None;
                    }
                }
                continue;
            }
            let global_urn = self.allocate_global_urn();
            for urn in &members {
                if let Some(node) = self.nodes.get_mut(urn) {
                    node.global_urn = Some(global_urn);
                }
            }
            assigned += 1;
        }
        info!("Assigned {} global urn group(s)", assigned);
        assigned
    }

    /// Give every still-unprocessed node its first lifecycle action.
    pub fn plan_actions(&mut self) {
        let pending: Vec<Urn> = self
            .nodes
            .values()
            .filter(|n| n.action == NodeAction::Unprocessed)
            .map(|n| n.urn)
            .collect();

        for urn in pending {
            let Some(node) = self.nodes.get(&urn) else {
                continue;
            };
            let action = if node.is_source() {
                if node.url.is_some() {
                    NodeAction::Download
                } else {
                    info!(urn, "No source location for {}, skipping", node.name);
                    NodeAction::Skipped
                }
            } else if node.database_action == Some(DatabaseAction::Amalgamate) {
                NodeAction::Amalgamate
            } else {
                continue;
            };
            if let Some(node) = self.nodes.get_mut(&urn) {
                node.action = action;
                node.add_log(action);
            }
        }
    }

    /// Pre-order listing with depth, starting at the root.
    pub fn to_list(&self) -> Vec<NodeSummary> {
        let mut out = Vec::new();
        let mut stack = vec![(self.root, 0usize)];
        while let Some((urn, depth)) = stack.pop() {
            let Some(node) = self.nodes.get(&urn) else {
                continue;
            };
            out.push(NodeSummary {
                depth,
                urn,
                name: node.name.clone(),
                title: node.title.clone(),
                url: node.url.clone(),
                format: node.format.clone(),
                action: node.action,
                database_table: node.database_table.clone(),
            });
            stack.extend(node.children.iter().rev().map(|c| (*c, depth + 1)));
        }
        out
    }

    /// Count of nodes per action.
    pub fn action_counts(&self) -> HashMap<NodeAction, usize> {
        let mut counts = HashMap::new();
        for node in self.nodes.values() {
            *counts.entry(node.action).or_insert(0) += 1;
        }
        counts
    }
}

/// Identity of the physical output a source node builds.
fn clone_key(node: &Node) -> String {
    let origin = match &node.url {
        Some(url) => format!("url:{}", url),
        None => format!("name:{}", node.name),
    };
    let buffer = node
        .custom_properties
        .get("buffer_value")
        .map(Value::to_string)
        .unwrap_or_default();
    format!(
        "{}|table:{}|action:{:?}|buffer:{}",
        origin,
        node.database_table.as_deref().unwrap_or_default(),
        node.database_action,
        buffer
    )
}
