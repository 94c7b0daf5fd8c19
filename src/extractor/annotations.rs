//! Doc-comment tags and PHP 8 attributes that mark or describe tests.

use tree_sitter::Node;

use super::imports::AliasTable;
use crate::utils::unquote_string;

pub const ATTRIBUTE_NAMESPACE: &str = "PHPUnit\\Framework\\Attributes";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Annotations {
    pub is_test: bool,
    pub groups: Vec<String>,
    pub data_providers: Vec<String>,
    pub depends: Vec<String>,
    /// `@testWith` / `#[TestWith]` inline datasets.
    pub inline_data: bool,
}

impl Annotations {
    pub fn merge(&mut self, other: Annotations) {
        self.is_test |= other.is_test;
        self.inline_data |= other.inline_data;
        extend_unique(&mut self.groups, other.groups);
        extend_unique(&mut self.data_providers, other.data_providers);
        extend_unique(&mut self.depends, other.depends);
    }

    pub fn has_data(&self) -> bool {
        self.inline_data || !self.data_providers.is_empty()
    }

    pub fn from_doc_comment(comment: &str) -> Self {
        let mut annotations = Self::default();

        for line in comment.lines() {
            let line = line
                .trim()
                .trim_start_matches("/**")
                .trim_end_matches("*/")
                .trim_start_matches('*')
                .trim();
            let Some(tag_line) = line.strip_prefix('@') else {
                continue;
            };

            let mut parts = tag_line.split_whitespace();
            let tag = parts.next().unwrap_or_default();
            let value = parts.next().map(str::to_string);

            match (tag, value) {
                ("test", _) => annotations.is_test = true,
                ("testWith", _) => annotations.inline_data = true,
                ("group", Some(group)) => push_unique(&mut annotations.groups, group),
                ("dataProvider", Some(provider)) => {
                    push_unique(&mut annotations.data_providers, provider)
                }
                ("depends", Some(target)) => push_unique(&mut annotations.depends, target),
                _ => {}
            }
        }

        annotations
    }

    /// Reads every `#[...]` attribute attached directly to `node`.
    pub fn from_attributes(
        node: Node,
        source: &[u8],
        namespace: Option<&str>,
        aliases: &AliasTable,
    ) -> Self {
        let mut annotations = Self::default();
        let mut attributes = Vec::new();

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.kind() == "attribute_list" {
                collect_attribute_nodes(child, &mut attributes);
            }
        }

        for attribute in attributes {
            let Some(name_node) = attribute_name(attribute) else {
                continue;
            };
            let name = aliases.resolve(node_text(name_node, source), namespace);
            let Some(short) = name
                .strip_prefix(ATTRIBUTE_NAMESPACE)
                .and_then(|rest| rest.strip_prefix('\\'))
            else {
                continue;
            };
            let args = attribute_arguments(attribute, source, namespace, aliases);

            match short {
                "Test" => annotations.is_test = true,
                "TestWith" | "TestWithJson" => annotations.inline_data = true,
                "Group" => {
                    if let Some(group) = args.first() {
                        push_unique(&mut annotations.groups, group.clone());
                    }
                }
                "DataProvider" => {
                    if let Some(provider) = args.first() {
                        push_unique(&mut annotations.data_providers, provider.clone());
                    }
                }
                "DataProviderExternal" => {
                    if let [class, method, ..] = args.as_slice() {
                        push_unique(&mut annotations.data_providers, format!("{class}::{method}"));
                    }
                }
                "Depends" | "DependsUsingDeepClone" | "DependsUsingShallowClone" => {
                    if let Some(target) = args.first() {
                        push_unique(&mut annotations.depends, target.clone());
                    }
                }
                _ => {}
            }
        }

        annotations
    }
}

fn collect_attribute_nodes<'t>(node: Node<'t>, out: &mut Vec<Node<'t>>) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if child.kind() == "attribute" {
            out.push(child);
        } else {
            collect_attribute_nodes(child, out);
        }
    }
}

fn attribute_name(attribute: Node) -> Option<Node> {
    let mut cursor = attribute.walk();
    let found = attribute
        .named_children(&mut cursor)
        .find(|child| matches!(child.kind(), "name" | "qualified_name"));
    found
}

fn attribute_arguments(
    attribute: Node,
    source: &[u8],
    namespace: Option<&str>,
    aliases: &AliasTable,
) -> Vec<String> {
    let arguments = attribute.child_by_field_name("parameters").or_else(|| {
        let mut cursor = attribute.walk();
        let found = attribute
            .named_children(&mut cursor)
            .find(|child| child.kind() == "arguments");
        found
    });
    let Some(arguments) = arguments else {
        return Vec::new();
    };

    let mut values = Vec::new();
    let mut cursor = arguments.walk();
    for argument in arguments.named_children(&mut cursor) {
        if argument.kind() != "argument" {
            continue;
        }
        let count = argument.named_child_count();
        let Some(value) = count.checked_sub(1).and_then(|last| argument.named_child(last)) else {
            continue;
        };
        let text = node_text(value, source);
        let value = match text.strip_suffix("::class") {
            Some(class) => aliases.resolve(class, namespace),
            None => unquote_string(text),
        };
        values.push(value);
    }
    values
}

pub(crate) fn node_text<'s>(node: Node, source: &'s [u8]) -> &'s str {
    node.utf8_text(source).unwrap_or("")
}

fn push_unique(items: &mut Vec<String>, item: String) {
    if !items.contains(&item) {
        items.push(item);
    }
}

fn extend_unique(items: &mut Vec<String>, other: Vec<String>) {
    for item in other {
        push_unique(items, item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doc_comment_tags() {
        let doc = "/**\n * Checks things.\n *\n * @test\n * @group slow\n * @dataProvider additionProvider\n * @depends testEmpty\n */";
        let annotations = Annotations::from_doc_comment(doc);

        assert!(annotations.is_test);
        assert_eq!(annotations.groups, vec!["slow"]);
        assert_eq!(annotations.data_providers, vec!["additionProvider"]);
        assert_eq!(annotations.depends, vec!["testEmpty"]);
        assert!(annotations.has_data());
    }

    #[test]
    fn test_test_with_is_not_a_test_marker() {
        let annotations = Annotations::from_doc_comment("/** @testWith [1, 2] */");
        assert!(!annotations.is_test);
        assert!(annotations.inline_data);
    }

    #[test]
    fn test_single_line_doc_comment() {
        let annotations = Annotations::from_doc_comment("/** @test */");
        assert!(annotations.is_test);
    }

    #[test]
    fn test_merge_keeps_unique_groups() {
        let mut class = Annotations {
            groups: vec!["integration".to_string()],
            ..Default::default()
        };
        class.merge(Annotations {
            groups: vec!["integration".to_string(), "db".to_string()],
            is_test: true,
            ..Default::default()
        });

        assert!(class.is_test);
        assert_eq!(class.groups, vec!["integration", "db"]);
    }
}
