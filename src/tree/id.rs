use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Suite,
    Namespace,
    Class,
    Method,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Suite => "suite",
            NodeKind::Namespace => "namespace",
            NodeKind::Class => "class",
            NodeKind::Method => "method",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic node identity: `kind:locator[#qualified-name]`.
///
/// Ids are derived, never allocated, so re-discovering a construct after it
/// was deleted yields the same id again.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn derive(kind: NodeKind, locator: &str, qualified_name: Option<&str>) -> Self {
        match qualified_name {
            Some(name) => Self(format!("{kind}:{locator}#{name}")),
            None => Self(format!("{kind}:{locator}")),
        }
    }

    pub fn suite(configuration: &str, name: &str) -> Self {
        Self::derive(NodeKind::Suite, configuration, Some(name))
    }

    /// Namespace nodes are shared across files, so their locator is the
    /// enclosing scope (a suite id, or empty for the implicit root).
    pub fn namespace(scope: &str, namespace: &str) -> Self {
        Self::derive(NodeKind::Namespace, scope, Some(namespace))
    }

    pub fn class(locator: &str, class_fqn: &str) -> Self {
        Self::derive(NodeKind::Class, locator, Some(class_fqn))
    }

    pub fn method(locator: &str, class_fqn: &str, method: &str) -> Self {
        Self::derive(NodeKind::Method, locator, Some(&format!("{class_fqn}::{method}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn kind(&self) -> Option<NodeKind> {
        let (kind, _) = self.0.split_once(':')?;
        match kind {
            "suite" => Some(NodeKind::Suite),
            "namespace" => Some(NodeKind::Namespace),
            "class" => Some(NodeKind::Class),
            "method" => Some(NodeKind::Method),
            _ => None,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_pure_functions_of_their_inputs() {
        let a = NodeId::method("/app/tests/FooTest.php", "App\\FooTest", "testBar");
        let b = NodeId::method("/app/tests/FooTest.php", "App\\FooTest", "testBar");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "method:/app/tests/FooTest.php#App\\FooTest::testBar");
        assert_eq!(a.kind(), Some(NodeKind::Method));
    }

    #[test]
    fn test_kinds_do_not_collide() {
        let class = NodeId::class("/app/tests/FooTest.php", "FooTest");
        let namespace = NodeId::namespace("/app/tests/FooTest.php", "FooTest");
        assert_ne!(class, namespace);
    }

    #[test]
    fn test_root_namespace_id() {
        assert_eq!(NodeId::namespace("", "App").as_str(), "namespace:#App");
        assert_eq!(
            NodeId::suite("/app/phpunit.xml", "Unit").to_string(),
            "suite:/app/phpunit.xml#Unit"
        );
    }
}
