//! Runnable-frontier queries and status propagation over the tree.

use std::collections::HashSet;

use tracing::debug;

use super::config::ActionGroups;
use super::types::BlockedNode;
use crate::model::{NodeAction, Tree, TreeError, Urn};

/// Nodes whose action is not terminal, in urn order.
pub fn unfinished_nodes(tree: &Tree, groups: &ActionGroups) -> Vec<Urn> {
    tree.nodes()
        .filter(|node| !groups.is_terminal(node.action))
        .map(|node| node.urn)
        .collect()
}

/// True when every child of `urn` has been processed.
pub fn children_processed(tree: &Tree, urn: Urn) -> bool {
    tree.get(urn).is_some_and(|node| {
        node.children().iter().all(|child| {
            tree.get(*child)
                .is_some_and(|c| c.action == NodeAction::Processed)
        })
    })
}

/// Unsorted runnable set.
///
/// A node qualifies when it is unfinished, its action passes `filter`, all
/// of its children are processed and it is not `busy`. Only one node per
/// global urn is returned, and none for a global urn that is already busy.
pub fn candidate_nodes(
    tree: &Tree,
    groups: &ActionGroups,
    filter: Option<&[NodeAction]>,
    busy: &HashSet<Urn>,
) -> Vec<Urn> {
    let mut seen_globals: HashSet<_> = busy
        .iter()
        .filter_map(|urn| tree.get(*urn).and_then(|node| node.global_urn))
        .collect();

    let mut out = Vec::new();
    for node in tree.nodes() {
        if groups.is_terminal(node.action) || busy.contains(&node.urn) {
            continue;
        }
        if filter.is_some_and(|actions| !actions.contains(&node.action)) {
            continue;
        }
        if !children_processed(tree, node.urn) {
            continue;
        }
        if let Some(global_urn) = node.global_urn {
            if !seen_globals.insert(global_urn) {
                debug!(urn = node.urn, global_urn, "Clone already selected, skipping");
                continue;
            }
        }
        out.push(node.urn);
    }
    out
}

/// Set `action` on `urn` and every node sharing its global urn.
///
/// Returns the urns that were updated.
pub fn sync_global_status(
    tree: &mut Tree,
    urn: Urn,
    action: NodeAction,
) -> Result<Vec<Urn>, TreeError> {
    let global_urn = tree
        .get(urn)
        .ok_or(TreeError::NodeNotFound(urn))?
        .global_urn;

    let targets = match global_urn {
        Some(global_urn) => tree.nodes_with_global_urn(global_urn),
        None => vec![urn],
    };
    for target in &targets {
        tree.set_action(*target, action)?;
    }
    Ok(targets)
}

/// Unfinished nodes with the children holding them back.
pub fn blocked_nodes(tree: &Tree, groups: &ActionGroups) -> Vec<BlockedNode> {
    unfinished_nodes(tree, groups)
        .into_iter()
        .filter_map(|urn| {
            let node = tree.get(urn)?;
            let blocked_by = node
                .children()
                .iter()
                .copied()
                .filter(|child| {
                    tree.get(*child)
                        .is_some_and(|c| c.action != NodeAction::Processed)
                })
                .collect();
            Some(BlockedNode {
                urn,
                name: node.name.clone(),
                action: node.action,
                blocked_by,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NodeAttrs, NodeType};

    fn source(tree: &mut Tree, parent: Urn, name: &str) -> Urn {
        let urn = tree
            .add_child(
                parent,
                name,
                NodeAttrs::default()
                    .with_type(NodeType::Source)
                    .with_url(format!("https://data.example/{}", name)),
            )
            .unwrap();
        tree.set_action(urn, NodeAction::Download).unwrap();
        urn
    }

    #[test]
    fn test_parent_waits_for_children() {
        let mut tree = Tree::new();
        let groups = ActionGroups::default();
        let b = tree.add_child(tree.root(), "b", NodeAttrs::default()).unwrap();
        tree.set_action(b, NodeAction::Buffer).unwrap();
        let a = source(&mut tree, b, "a");

        let busy = HashSet::new();
        assert_eq!(candidate_nodes(&tree, &groups, None, &busy), vec![a]);
        assert_eq!(candidate_nodes(&tree, &groups, None, &busy), vec![a]);

        tree.set_action(a, NodeAction::Processed).unwrap();
        assert_eq!(candidate_nodes(&tree, &groups, None, &busy), vec![b]);
    }

    #[test]
    fn test_filter_and_busy_exclusion() {
        let mut tree = Tree::new();
        let groups = ActionGroups::default();
        let root = tree.root();
        let a = source(&mut tree, root, "a");
        let c = source(&mut tree, root, "c");
        tree.set_action(c, NodeAction::Import).unwrap();

        let busy = HashSet::new();
        let filter = [NodeAction::Download, NodeAction::Unzip];
        assert_eq!(candidate_nodes(&tree, &groups, Some(&filter), &busy), vec![a]);

        let busy = HashSet::from([a]);
        assert_eq!(candidate_nodes(&tree, &groups, None, &busy), vec![c]);
    }

    #[test]
    fn test_one_candidate_per_global_urn() {
        let mut tree = Tree::new();
        let groups = ActionGroups::default();
        let root = tree.root();
        let x = tree.add_child(root, "x", NodeAttrs::default()).unwrap();
        let y = tree.add_child(root, "y", NodeAttrs::default()).unwrap();
        let first = source(&mut tree, x, "shared");
        let second = source(&mut tree, y, "shared");
        assert_eq!(tree.assign_global_urns(), 1);

        let candidates = candidate_nodes(&tree, &groups, None, &HashSet::new());
        assert_eq!(candidates, vec![first]);

        let busy = HashSet::from([first]);
        let candidates = candidate_nodes(&tree, &groups, None, &busy);
        assert!(!candidates.contains(&second));
    }

    #[test]
    fn test_sync_global_status_updates_clones() {
        let mut tree = Tree::new();
        let root = tree.root();
        let x = tree.add_child(root, "x", NodeAttrs::default()).unwrap();
        let y = tree.add_child(root, "y", NodeAttrs::default()).unwrap();
        let first = source(&mut tree, x, "shared");
        let second = source(&mut tree, y, "shared");
        let lone = source(&mut tree, y, "lone");
        tree.assign_global_urns();

        let updated = sync_global_status(&mut tree, first, NodeAction::Processed).unwrap();
        assert_eq!(updated, vec![first, second]);
        assert_eq!(tree.get(second).unwrap().action, NodeAction::Processed);
        assert_eq!(tree.get(lone).unwrap().action, NodeAction::Download);

        assert_eq!(
            sync_global_status(&mut tree, lone, NodeAction::Failed).unwrap(),
            vec![lone]
        );
        assert!(matches!(
            sync_global_status(&mut tree, 999, NodeAction::Failed),
            Err(TreeError::NodeNotFound(999))
        ));
    }

    #[test]
    fn test_blocked_nodes_lists_unprocessed_children() {
        let mut tree = Tree::new();
        let groups = ActionGroups::default();
        let c = tree.add_child(tree.root(), "c", NodeAttrs::default()).unwrap();
        tree.set_action(c, NodeAction::Run).unwrap();
        let d = source(&mut tree, c, "d");
        tree.set_action(d, NodeAction::Failed).unwrap();

        let blocked = blocked_nodes(&tree, &groups);
        let entry = blocked.iter().find(|b| b.urn == c).unwrap();
        assert_eq!(entry.blocked_by, vec![d]);
        assert_eq!(entry.action, NodeAction::Run);
        assert!(blocked.iter().all(|b| b.urn != d));
        assert!(blocked.iter().any(|b| b.urn == tree.root()));
    }
}
