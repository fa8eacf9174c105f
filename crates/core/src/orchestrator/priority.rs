//! Dispatch ordering of runnable nodes.

use std::cmp::Reverse;

use crate::model::{Node, NodeAction, Tree, Urn};

/// Sort key: downloads first, then by format priority (unknown formats
/// last), then largest known size first. A missing size counts as zero.
pub fn priority_key(node: &Node, format_priority: &[String]) -> (u8, usize, Reverse<u64>) {
    let action_weight = if node.action == NodeAction::Download { 0 } else { 1 };
    let format_weight = node
        .format
        .as_deref()
        .and_then(|format| format_priority.iter().position(|f| f == format))
        .unwrap_or(format_priority.len());
    (action_weight, format_weight, Reverse(node.size_hint.unwrap_or(0)))
}

/// Stable in-place sort of `urns` by [`priority_key`].
pub fn sort_runnable(tree: &Tree, urns: &mut [Urn], format_priority: &[String]) {
    urns.sort_by_key(|urn| {
        tree.get(*urn)
            .map(|node| priority_key(node, format_priority))
            .unwrap_or((u8::MAX, usize::MAX, Reverse(0)))
    });
}
