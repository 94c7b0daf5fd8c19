//! The test identity tree.
//!
//! Nodes live in an arena keyed by their derived [`NodeId`]. Besides the
//! parent/child links the tree keeps three side tables that are always
//! updated together with the arena: per-node metadata, a reverse index from
//! source locator to the class/method nodes that file contributed, and the
//! results of the most recent run.

mod id;
mod node;
mod sync;

use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, trace};

use crate::correlator::{ExecutionResult, ResultSink};
use crate::error::TreeError;
use crate::extractor::SourceRange;
pub use id::{NodeId, NodeKind};
pub use node::{NodeChange, NodeMetadata, NodeSpec, TestNode};
pub use sync::{SyncContext, SyncReport};

#[derive(Debug, Clone, Default)]
pub struct TestTree {
    nodes: HashMap<NodeId, TestNode>,
    /// Children of the implicit root, in insertion order.
    roots: Vec<NodeId>,
    metadata: HashMap<NodeId, NodeMetadata>,
    file_index: HashMap<String, BTreeSet<NodeId>>,
    results: HashMap<NodeId, ExecutionResult>,
}

impl TestTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &NodeId) -> Option<&TestNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn children(&self, id: &NodeId) -> &[NodeId] {
        self.nodes
            .get(id)
            .map(|node| node.children.as_slice())
            .unwrap_or_default()
    }

    pub fn metadata(&self, id: &NodeId) -> Option<&NodeMetadata> {
        self.metadata.get(id)
    }

    pub fn ids(&self) -> BTreeSet<NodeId> {
        self.nodes.keys().cloned().collect()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &TestNode> {
        self.nodes.values()
    }

    /// Class and method ids currently contributed by one source file.
    pub fn ids_for_file(&self, locator: &str) -> Option<&BTreeSet<NodeId>> {
        self.file_index.get(locator)
    }

    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.file_index.keys().map(String::as_str)
    }

    /// Ancestors from the direct parent up to the top level.
    pub fn ancestors(&self, id: &NodeId) -> Vec<NodeId> {
        let mut ancestors = Vec::new();
        let mut current = self.nodes.get(id).and_then(|node| node.parent.clone());
        while let Some(parent) = current {
            current = self.nodes.get(&parent).and_then(|node| node.parent.clone());
            ancestors.push(parent);
        }
        ancestors
    }

    /// Creates `spec` under `parent`, or refreshes it in place. A node whose
    /// parent changed is detached from the old parent, attached under the
    /// new one, and the old ancestor chain is then pruned.
    pub fn upsert(&mut self, spec: NodeSpec, parent: Option<&NodeId>) -> Result<NodeChange, TreeError> {
        if let Some(parent) = parent {
            if !self.nodes.contains_key(parent) {
                return Err(TreeError::unknown_node(parent.as_str()));
            }
        }

        let id = spec.id.clone();
        let old_parent = match self.nodes.get_mut(&id) {
            Some(node) => {
                let refreshed = node.label != spec.label
                    || node.locator != spec.locator
                    || node.range != spec.range
                    || node.tags != spec.tags
                    || self.metadata.get(&id) != Some(&spec.metadata);
                node.label = spec.label;
                node.locator = spec.locator;
                node.range = spec.range;
                node.tags = spec.tags;
                self.metadata.insert(id.clone(), spec.metadata);

                if node.parent.as_ref() == parent {
                    return Ok(if refreshed {
                        NodeChange::Updated
                    } else {
                        NodeChange::Unchanged
                    });
                }
                node.parent.clone()
            }
            None => {
                trace!(id = %id, "creating node");
                self.nodes.insert(
                    id.clone(),
                    TestNode {
                        id: id.clone(),
                        kind: spec.kind,
                        label: spec.label,
                        locator: spec.locator,
                        range: spec.range,
                        parent: None,
                        children: Vec::new(),
                        tags: spec.tags,
                    },
                );
                self.metadata.insert(id.clone(), spec.metadata);
                self.attach(&id, parent);
                return Ok(NodeChange::Created);
            }
        };

        self.detach(&id);
        self.attach(&id, parent);
        debug!(
            id = %id,
            from = ?old_parent.as_ref().map(NodeId::as_str),
            to = ?parent.map(NodeId::as_str),
            "reparented node"
        );
        if let Some(old_parent) = old_parent {
            self.prune_from(old_parent);
        }
        Ok(NodeChange::Reparented)
    }

    /// Removes a node and its subtree, then prunes ancestors left empty.
    /// Returns every removed id.
    pub fn remove(&mut self, id: &NodeId) -> Vec<NodeId> {
        let Some(parent) = self.nodes.get(id).map(|node| node.parent.clone()) else {
            return Vec::new();
        };
        self.detach(id);

        let mut removed = Vec::new();
        let mut stack = vec![id.clone()];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.drop_node(&current) {
                stack.extend(node.children);
                removed.push(current);
            }
        }

        if let Some(parent) = parent {
            removed.extend(self.prune_from(parent));
        }
        removed
    }

    /// Walks upward from `start`, removing every node left without children
    /// until a populated node, a suite, or the top level is reached.
    fn prune_from(&mut self, start: NodeId) -> Vec<NodeId> {
        let mut pruned = Vec::new();
        let mut worklist = vec![start];

        while let Some(id) = worklist.pop() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            if node.is_root() || !node.children.is_empty() {
                continue;
            }
            let parent = node.parent.clone();
            self.detach(&id);
            self.drop_node(&id);
            trace!(id = %id, "pruned empty node");
            pruned.push(id);
            if let Some(parent) = parent {
                worklist.push(parent);
            }
        }
        pruned
    }

    fn attach(&mut self, id: &NodeId, parent: Option<&NodeId>) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.parent = parent.cloned();
        }
        let siblings = match parent {
            Some(parent) => match self.nodes.get_mut(parent) {
                Some(parent) => &mut parent.children,
                None => return,
            },
            None => &mut self.roots,
        };
        if !siblings.contains(id) {
            siblings.push(id.clone());
        }
    }

    fn detach(&mut self, id: &NodeId) {
        let Some(parent) = self.nodes.get_mut(id).and_then(|node| node.parent.take()) else {
            self.roots.retain(|root| root != id);
            return;
        };
        if let Some(parent) = self.nodes.get_mut(&parent) {
            parent.children.retain(|child| child != id);
        }
    }

    /// Drops a node from the arena and every side table.
    fn drop_node(&mut self, id: &NodeId) -> Option<TestNode> {
        let node = self.nodes.remove(id)?;
        self.metadata.remove(id);
        self.results.remove(id);
        if let Some(ids) = self.file_index.get_mut(&node.locator) {
            ids.remove(id);
            if ids.is_empty() {
                self.file_index.remove(&node.locator);
            }
        }
        Some(node)
    }

    fn index_file(&mut self, locator: &str, ids: BTreeSet<NodeId>) -> BTreeSet<NodeId> {
        let previous = self.file_index.remove(locator).unwrap_or_default();
        if !ids.is_empty() {
            self.file_index.insert(locator.to_string(), ids);
        }
        previous
    }

    /// Forgets the previous run's results.
    pub fn begin_run(&mut self) {
        self.results.clear();
    }

    pub fn result(&self, id: &NodeId) -> Option<&ExecutionResult> {
        self.results.get(id)
    }

    pub fn results(&self) -> impl Iterator<Item = &ExecutionResult> {
        self.results.values()
    }

    /// Nested, serializable view of the whole tree in child order.
    pub fn outline(&self) -> Vec<OutlineNode> {
        self.roots.iter().filter_map(|id| self.outline_node(id)).collect()
    }

    fn outline_node(&self, id: &NodeId) -> Option<OutlineNode> {
        let node = self.nodes.get(id)?;
        Some(OutlineNode {
            id: node.id.clone(),
            kind: node.kind,
            label: node.label.clone(),
            range: node.range,
            tags: node.tags.iter().cloned().collect(),
            status: self.results.get(id).map(|r| r.status.as_str()),
            children: node
                .children
                .iter()
                .filter_map(|child| self.outline_node(child))
                .collect(),
        })
    }
}

impl ResultSink for TestTree {
    fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    fn apply(&mut self, result: ExecutionResult) -> bool {
        if !self.nodes.contains_key(&result.node_id) {
            debug!(id = %result.node_id, "dropping result for unknown node");
            return false;
        }
        // datasets of one method share a node; the worst outcome sticks
        if let Some(existing) = self.results.get(&result.node_id) {
            if existing.status.severity() > result.status.severity() {
                return true;
            }
        }
        self.results.insert(result.node_id.clone(), result);
        true
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OutlineNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<SourceRange>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<OutlineNode>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn spec(kind: NodeKind, name: &str) -> NodeSpec {
        NodeSpec::new(NodeId::derive(kind, "/app/t.php", Some(name)), kind, name, "/app/t.php")
    }

    fn chain(tree: &mut TestTree) -> Vec<NodeId> {
        let mut parent: Option<NodeId> = None;
        let mut ids = Vec::new();
        for (kind, name) in [
            (NodeKind::Namespace, "App"),
            (NodeKind::Namespace, "App\\Service"),
            (NodeKind::Class, "App\\Service\\FooTest"),
            (NodeKind::Method, "App\\Service\\FooTest::testBar"),
        ] {
            let node = spec(kind, name);
            let id = node.id.clone();
            tree.upsert(node, parent.as_ref()).unwrap();
            parent = Some(id.clone());
            ids.push(id);
        }
        ids
    }

    #[test]
    fn test_upsert_creates_then_reports_unchanged() {
        let mut tree = TestTree::new();
        let ids = chain(&mut tree);

        assert_eq!(tree.len(), 4);
        assert_eq!(tree.roots(), &ids[..1]);
        assert_eq!(tree.children(&ids[2]), &ids[3..]);
        assert_eq!(
            tree.upsert(spec(NodeKind::Method, "App\\Service\\FooTest::testBar"), Some(&ids[2])),
            Ok(NodeChange::Unchanged)
        );
        assert_eq!(tree.ancestors(&ids[3]), vec![ids[2].clone(), ids[1].clone(), ids[0].clone()]);
    }

    #[test]
    fn test_upsert_refreshes_label_in_place() {
        let mut tree = TestTree::new();
        let ids = chain(&mut tree);

        let mut renamed = spec(NodeKind::Method, "App\\Service\\FooTest::testBar");
        renamed.label = "bar works".to_string();
        assert_eq!(tree.upsert(renamed, Some(&ids[2])), Ok(NodeChange::Updated));
        assert_eq!(tree.get(&ids[3]).unwrap().label, "bar works");
        assert_eq!(tree.children(&ids[2]).len(), 1);
    }

    #[test]
    fn test_upsert_under_unknown_parent_fails() {
        let mut tree = TestTree::new();
        let missing = NodeId::from("namespace:#Nope");
        assert_eq!(
            tree.upsert(spec(NodeKind::Class, "Foo"), Some(&missing)),
            Err(TreeError::unknown_node("namespace:#Nope"))
        );
        assert!(tree.is_empty());
    }

    #[test]
    fn test_remove_prunes_whole_chain() {
        let mut tree = TestTree::new();
        let ids = chain(&mut tree);

        let removed = tree.remove(&ids[3]);

        assert_eq!(removed.len(), 4);
        assert!(tree.is_empty());
        assert!(tree.roots().is_empty());
    }

    #[test]
    fn test_remove_stops_at_populated_ancestor() {
        let mut tree = TestTree::new();
        let ids = chain(&mut tree);
        tree.upsert(spec(NodeKind::Method, "App\\Service\\FooTest::testBaz"), Some(&ids[2]))
            .unwrap();

        let removed = tree.remove(&ids[3]);

        assert_eq!(removed, vec![ids[3].clone()]);
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn test_suites_survive_pruning() {
        let mut tree = TestTree::new();
        let suite = NodeSpec::new(NodeId::suite("/app/phpunit.xml", "Unit"), NodeKind::Suite, "Unit", "/app/phpunit.xml");
        let suite_id = suite.id.clone();
        tree.upsert(suite, None).unwrap();
        let class = spec(NodeKind::Class, "FooTest");
        let class_id = class.id.clone();
        tree.upsert(class, Some(&suite_id)).unwrap();

        tree.remove(&class_id);

        assert!(tree.contains(&suite_id));
        assert!(tree.children(&suite_id).is_empty());
    }

    #[test]
    fn test_reparent_detaches_and_prunes_old_parent() {
        let mut tree = TestTree::new();
        let ids = chain(&mut tree);

        let class = spec(NodeKind::Class, "App\\Service\\FooTest");
        assert_eq!(tree.upsert(class, None), Ok(NodeChange::Reparented));

        assert!(!tree.contains(&ids[0]));
        assert!(!tree.contains(&ids[1]));
        assert_eq!(tree.roots(), &ids[2..3]);
        assert_eq!(tree.get(&ids[2]).unwrap().parent, None);
        assert!(tree.contains(&ids[3]));
    }

    #[test]
    fn test_reparent_into_shared_ancestor_keeps_it() {
        let mut tree = TestTree::new();
        let ids = chain(&mut tree);

        let class = spec(NodeKind::Class, "App\\Service\\FooTest");
        tree.upsert(class, Some(&ids[0])).unwrap();

        assert!(tree.contains(&ids[0]));
        assert!(!tree.contains(&ids[1]));
        assert_eq!(tree.children(&ids[0]), &ids[2..3]);
    }
}
