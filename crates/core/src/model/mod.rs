//! Work tree model: nodes, their hierarchy and table naming.

mod naming;
mod node;
mod tree;

pub use naming::{content_hash, table_name, TABLE_PREFIX};
pub use node::{
    DatabaseAction, GlobalUrn, LogEntry, Node, NodeAction, NodeAttrs, NodeSnapshot, NodeSummary,
    NodeType, Urn,
};
pub(crate) use node::is_archive;
pub use tree::{Tree, TreeError, HASH_PROPERTY, PAYLOAD_PROPERTY};
