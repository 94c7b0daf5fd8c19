//! PHP test definition extraction.
//!
//! Parses one source file with tree-sitter-php and emits the ordered list of
//! test classes and test methods it declares. A class appears only when it
//! has at least one qualifying test method, and always before its methods.

mod annotations;
mod imports;

use serde::Serialize;
use std::path::Path;
use tracing::{debug, trace, warn};
use tree_sitter::{Node, Parser, Point};

use crate::error::ParserError;
pub use annotations::{Annotations, ATTRIBUTE_NAMESPACE};
pub use imports::AliasTable;

use annotations::node_text;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DefinitionKind {
    Class,
    Method,
}

/// Zero-based line/character position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Position {
    pub line: usize,
    pub character: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SourceRange {
    pub start: Position,
    pub end: Position,
}

impl SourceRange {
    fn from_node(node: Node) -> Self {
        let point = |p: Point| Position {
            line: p.row,
            character: p.column,
        };
        Self {
            start: point(node.start_position()),
            end: point(node.end_position()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestDefinition {
    pub kind: DefinitionKind,
    pub namespace: Option<String>,
    pub class_name: String,
    pub method_name: Option<String>,
    pub range: SourceRange,
    pub groups: Vec<String>,
    pub data_providers: Vec<String>,
    pub depends: Vec<String>,
    pub has_data: bool,
}

impl TestDefinition {
    pub fn class_fqn(&self) -> String {
        match self.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => format!("{ns}\\{}", self.class_name),
            _ => self.class_name.clone(),
        }
    }

    /// `Namespace\Class` for classes, `Namespace\Class::method` for methods.
    pub fn qualified_name(&self) -> String {
        match &self.method_name {
            Some(method) => format!("{}::{method}", self.class_fqn()),
            None => self.class_fqn(),
        }
    }

    pub fn label(&self) -> &str {
        self.method_name.as_deref().unwrap_or(&self.class_name)
    }
}

pub struct Extractor {
    parser: Parser,
}

impl Extractor {
    pub fn new() -> Result<Self, ParserError> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_php::LANGUAGE_PHP.into())
            .map_err(|_| ParserError::language_setup_failed("php"))?;
        Ok(Self { parser })
    }

    /// Extracts test definitions, swallowing parse failures into an empty list.
    pub fn extract(&mut self, source: &str, locator: &Path) -> Vec<TestDefinition> {
        match self.try_extract(source, locator) {
            Ok(definitions) => definitions,
            Err(e) => {
                warn!(file = %locator.display(), error = %e, "skipping unparseable file");
                Vec::new()
            }
        }
    }

    pub fn try_extract(
        &mut self,
        source: &str,
        locator: &Path,
    ) -> Result<Vec<TestDefinition>, ParserError> {
        trace!(file = %locator.display(), "parsing");

        let tree = self
            .parser
            .parse(source, None)
            .ok_or_else(|| ParserError::parse_failed(locator))?;
        let root = tree.root_node();
        if root.has_error() {
            let at = first_error(root).unwrap_or(root).start_position();
            return Err(ParserError::syntax_error(locator, at.row + 1, at.column + 1));
        }

        let mut walker = Walker::new(source.as_bytes());
        walker.walk_statements(root);
        debug!(
            file = %locator.display(),
            count = walker.definitions.len(),
            "extracted test definitions"
        );
        Ok(walker.definitions)
    }
}

/// One-shot extraction with a fresh parser.
pub fn extract_definitions(source: &str, locator: &Path) -> Vec<TestDefinition> {
    match Extractor::new() {
        Ok(mut extractor) => extractor.extract(source, locator),
        Err(e) => {
            warn!(error = %e, "php parser unavailable");
            Vec::new()
        }
    }
}

fn first_error(node: Node) -> Option<Node> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.has_error() {
            if let Some(found) = first_error(child) {
                return Some(found);
            }
        }
    }
    None
}

struct Walker<'s> {
    source: &'s [u8],
    namespace: Option<String>,
    aliases: AliasTable,
    definitions: Vec<TestDefinition>,
}

impl<'s> Walker<'s> {
    fn new(source: &'s [u8]) -> Self {
        Self {
            source,
            namespace: None,
            aliases: AliasTable::new(),
            definitions: Vec::new(),
        }
    }

    fn walk_statements(&mut self, node: Node) {
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            match child.kind() {
                "namespace_definition" => self.enter_namespace(child),
                "namespace_use_declaration" => {
                    self.aliases.add_declaration(node_text(child, self.source));
                }
                "class_declaration" => self.visit_class(child),
                "compound_statement" | "declare_statement" => self.walk_statements(child),
                _ => {}
            }
        }
    }

    fn enter_namespace(&mut self, node: Node) {
        let name = node
            .child_by_field_name("name")
            .map(|n| node_text(n, self.source).trim_matches('\\').to_string())
            .filter(|n| !n.is_empty());
        self.aliases.clear();

        match node.child_by_field_name("body") {
            Some(body) => {
                self.namespace = name;
                self.walk_statements(body);
                self.namespace = None;
                self.aliases.clear();
            }
            None => self.namespace = name,
        }
    }

    fn visit_class(&mut self, node: Node) {
        let Some(class_name) = node
            .child_by_field_name("name")
            .map(|n| node_text(n, self.source).to_string())
        else {
            return;
        };

        if is_abstract(node, self.source) {
            trace!(class = %class_name, "skipping abstract class");
            return;
        }

        let mut class_annotations = self.annotations_for(node);
        // a class-level @test marker would otherwise leak onto every method
        class_annotations.is_test = false;

        let Some(body) = node.child_by_field_name("body") else {
            return;
        };

        let mut methods = Vec::new();
        let mut cursor = body.walk();
        for member in body.named_children(&mut cursor) {
            if member.kind() != "method_declaration" {
                continue;
            }
            if let Some(method) = self.visit_method(member, &class_name, &class_annotations) {
                methods.push(method);
            }
        }

        if methods.is_empty() {
            trace!(class = %class_name, "no test methods");
            return;
        }

        self.definitions.push(TestDefinition {
            kind: DefinitionKind::Class,
            namespace: self.namespace.clone(),
            class_name,
            method_name: None,
            range: SourceRange::from_node(node),
            groups: class_annotations.groups,
            data_providers: Vec::new(),
            depends: Vec::new(),
            has_data: false,
        });
        self.definitions.extend(methods);
    }

    fn visit_method(
        &self,
        node: Node,
        class_name: &str,
        class_annotations: &Annotations,
    ) -> Option<TestDefinition> {
        let name = node_text(node.child_by_field_name("name")?, self.source).to_string();
        if !is_public(node, self.source) {
            return None;
        }

        let annotations = self.annotations_for(node);
        if !(name.starts_with("test") || annotations.is_test) {
            return None;
        }

        let mut groups = class_annotations.groups.clone();
        for group in &annotations.groups {
            if !groups.contains(group) {
                groups.push(group.clone());
            }
        }

        Some(TestDefinition {
            kind: DefinitionKind::Method,
            namespace: self.namespace.clone(),
            class_name: class_name.to_string(),
            method_name: Some(name),
            range: SourceRange::from_node(node),
            has_data: annotations.has_data(),
            groups,
            data_providers: annotations.data_providers,
            depends: annotations.depends,
        })
    }

    fn annotations_for(&self, node: Node) -> Annotations {
        let mut annotations = leading_doc_comment(node, self.source)
            .map(Annotations::from_doc_comment)
            .unwrap_or_default();
        annotations.merge(Annotations::from_attributes(
            node,
            self.source,
            self.namespace.as_deref(),
            &self.aliases,
        ));
        annotations
    }
}

fn leading_doc_comment<'s>(node: Node, source: &'s [u8]) -> Option<&'s str> {
    let previous = node.prev_named_sibling()?;
    if previous.kind() != "comment" {
        return None;
    }
    let text = node_text(previous, source);
    text.starts_with("/**").then_some(text)
}

fn is_abstract(node: Node, source: &[u8]) -> bool {
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).any(|child| match child.kind() {
        "abstract_modifier" => true,
        "class_modifier" => node_text(child, source).eq_ignore_ascii_case("abstract"),
        _ => false,
    });
    found
}

/// Methods without a visibility modifier are public.
fn is_public(node: Node, source: &[u8]) -> bool {
    let mut cursor = node.walk();
    let visibility = node
        .children(&mut cursor)
        .find(|child| child.kind() == "visibility_modifier")
        .map(|child| node_text(child, source).to_ascii_lowercase());
    visibility.map_or(true, |v| v == "public")
}
