//! Node types for the work tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Process-unique node identity. Allocated monotonically, never reused.
pub type Urn = u64;

/// Identity shared by nodes that stand for the same physical resource.
pub type GlobalUrn = u64;

/// Lifecycle state of a node.
///
/// A single field carries the whole lifecycle: pending containers are
/// `Unprocessed`, work in progress is one of the step actions, and
/// `Processed`/`Failed`/`Skipped` end it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeAction {
    Unprocessed,
    Download,
    Unzip,
    Concatenate,
    Amalgamate,
    Import,
    Buffer,
    Run,
    Processed,
    Failed,
    Skipped,
}

impl NodeAction {
    /// Every lifecycle value, in declaration order.
    pub const ALL: [NodeAction; 11] = [
        NodeAction::Unprocessed,
        NodeAction::Download,
        NodeAction::Unzip,
        NodeAction::Concatenate,
        NodeAction::Amalgamate,
        NodeAction::Import,
        NodeAction::Buffer,
        NodeAction::Run,
        NodeAction::Processed,
        NodeAction::Failed,
        NodeAction::Skipped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeAction::Unprocessed => "unprocessed",
            NodeAction::Download => "download",
            NodeAction::Unzip => "unzip",
            NodeAction::Concatenate => "concatenate",
            NodeAction::Amalgamate => "amalgamate",
            NodeAction::Import => "import",
            NodeAction::Buffer => "buffer",
            NodeAction::Run => "run",
            NodeAction::Processed => "processed",
            NodeAction::Failed => "failed",
            NodeAction::Skipped => "skipped",
        }
    }
}

impl fmt::Display for NodeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structural role of a node. Groups carry no type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Root,
    Branch,
    Source,
    Destination,
}

/// Transform applied to a node's table once its data is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseAction {
    Buffer,
    Simplify,
    Grid,
    Amalgamate,
    Invert,
}

/// One audit entry in a node's log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub action: NodeAction,
    pub timestamp: DateTime<Utc>,
}

/// Optional attributes supplied when a node is created.
#[derive(Debug, Clone, Default)]
pub struct NodeAttrs {
    pub title: Option<String>,
    pub node_type: Option<NodeType>,
    pub url: Option<String>,
    pub format: Option<String>,
    pub database_action: Option<DatabaseAction>,
    pub global_urn: Option<GlobalUrn>,
    pub custom_properties: Map<String, Value>,
}

impl NodeAttrs {
    pub fn with_type(mut self, node_type: NodeType) -> Self {
        self.node_type = Some(node_type);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_database_action(mut self, action: DatabaseAction) -> Self {
        self.database_action = Some(action);
        self
    }

    pub fn with_global_urn(mut self, global_urn: GlobalUrn) -> Self {
        self.global_urn = Some(global_urn);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.custom_properties.insert(key.into(), value);
        self
    }
}

/// A unit of work or a grouping container.
///
/// `children` are prerequisites: a node may run once every child has been
/// processed. `parent` is a traversal-only back-reference; lifetime is owned
/// by the tree registry and flows strictly from parent to children.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub urn: Urn,
    pub global_urn: Option<GlobalUrn>,
    pub name: String,
    pub title: Option<String>,
    pub action: NodeAction,
    pub node_type: Option<NodeType>,
    pub url: Option<String>,
    pub format: Option<String>,
    pub database_table: Option<String>,
    pub database_action: Option<DatabaseAction>,
    pub style: Option<Map<String, Value>>,
    pub custom_properties: Map<String, Value>,
    /// Cached remote size in bytes; `Some(0)` when probing failed.
    pub size_hint: Option<u64>,
    pub log: Vec<LogEntry>,
    pub(crate) parent: Option<Urn>,
    pub(crate) children: Vec<Urn>,
}

impl Node {
    pub(crate) fn new(urn: Urn, name: impl Into<String>, attrs: NodeAttrs) -> Self {
        Self {
            urn,
            global_urn: attrs.global_urn,
            name: name.into(),
            title: attrs.title,
            action: NodeAction::Unprocessed,
            node_type: attrs.node_type,
            url: attrs.url,
            format: attrs.format,
            database_table: None,
            database_action: attrs.database_action,
            style: None,
            custom_properties: attrs.custom_properties,
            size_hint: None,
            log: Vec::new(),
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn parent(&self) -> Option<Urn> {
        self.parent
    }

    pub fn children(&self) -> &[Urn] {
        &self.children
    }

    pub fn is_source(&self) -> bool {
        self.node_type == Some(NodeType::Source)
    }

    /// Whether the node's download is an archive that needs unpacking.
    pub fn is_archive(&self) -> bool {
        is_archive(self.url.as_deref(), self.format.as_deref())
    }

    pub(crate) fn add_log(&mut self, action: NodeAction) {
        self.log.push(LogEntry {
            action,
            timestamp: Utc::now(),
        });
    }
}

pub(crate) fn is_archive(url: Option<&str>, format: Option<&str>) -> bool {
    if format.is_some_and(|f| f.eq_ignore_ascii_case("zip")) {
        return true;
    }
    url.map(|u| u.split(['?', '#']).next().unwrap_or(u))
        .is_some_and(|path| path.to_ascii_lowercase().ends_with(".zip"))
}

/// Owned copy of the fields a worker needs. Workers never touch the tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub urn: Urn,
    pub global_urn: Option<GlobalUrn>,
    pub name: String,
    pub title: Option<String>,
    pub action: NodeAction,
    pub node_type: Option<NodeType>,
    pub url: Option<String>,
    pub format: Option<String>,
    pub database_table: Option<String>,
    pub database_action: Option<DatabaseAction>,
    pub custom_properties: Map<String, Value>,
}

impl NodeSnapshot {
    pub fn is_archive(&self) -> bool {
        is_archive(self.url.as_deref(), self.format.as_deref())
    }
}

impl From<&Node> for NodeSnapshot {
    fn from(node: &Node) -> Self {
        Self {
            urn: node.urn,
            global_urn: node.global_urn,
            name: node.name.clone(),
            title: node.title.clone(),
            action: node.action,
            node_type: node.node_type,
            url: node.url.clone(),
            format: node.format.clone(),
            database_table: node.database_table.clone(),
            database_action: node.database_action,
            custom_properties: node.custom_properties.clone(),
        }
    }
}

/// Flattened row of the tree listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSummary {
    pub depth: usize,
    pub urn: Urn,
    pub name: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub format: Option<String>,
    pub action: NodeAction,
    pub database_table: Option<String>,
}
