use serde::Serialize;
use std::collections::BTreeSet;

use super::id::{NodeId, NodeKind};
use crate::extractor::SourceRange;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub label: String,
    pub locator: String,
    pub range: Option<SourceRange>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub tags: BTreeSet<String>,
}

impl TestNode {
    /// Suites are the only nodes that survive losing all their children.
    pub fn is_root(&self) -> bool {
        self.kind == NodeKind::Suite
    }
}

/// Extended per-node data, kept in a map keyed by node id and always created
/// and dropped together with the node itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_fqn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub data_providers: Vec<String>,
    pub has_data: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suite: Option<String>,
    /// PSR-4 prefix that anchored the class, when one applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapping_prefix: Option<String>,
}

/// Everything needed to create or refresh one node.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub id: NodeId,
    pub kind: NodeKind,
    pub label: String,
    pub locator: String,
    pub range: Option<SourceRange>,
    pub tags: BTreeSet<String>,
    pub metadata: NodeMetadata,
}

impl NodeSpec {
    pub fn new(id: NodeId, kind: NodeKind, label: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            label: label.into(),
            locator: locator.into(),
            range: None,
            tags: BTreeSet::new(),
            metadata: NodeMetadata::default(),
        }
    }

    pub fn with_range(mut self, range: SourceRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_tags<I: IntoIterator<Item = String>>(mut self, tags: I) -> Self {
        self.tags = tags.into_iter().collect();
        self
    }

    pub fn with_metadata(mut self, metadata: NodeMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeChange {
    Created,
    Unchanged,
    Updated,
    Reparented,
}
