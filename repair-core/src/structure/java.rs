//! Java declarations via tree-sitter-java

use super::{AstParser, Declaration, SyntaxFailure, TypeKind};
use crate::config::JavaParserSettings;
use std::path::Path;
use tree_sitter::{Node, Parser};

#[derive(Debug, Clone, Default)]
pub struct JavaParser {
    settings: JavaParserSettings,
}

impl JavaParser {
    pub fn new(settings: JavaParserSettings) -> Self {
        Self { settings }
    }

    fn walk_node(&self, node: Node, source: &[u8], out: &mut Vec<Declaration>) {
        match node.kind() {
            "class_declaration" | "enum_declaration" | "record_declaration" => {
                if let Some(name) = field_text(node, "name", source) {
                    out.push(Declaration::Type {
                        name,
                        kind: TypeKind::Class,
                    });
                }
            }
            "interface_declaration" | "annotation_type_declaration" => {
                if let Some(name) = field_text(node, "name", source) {
                    out.push(Declaration::Type {
                        name,
                        kind: TypeKind::Interface,
                    });
                }
            }
            "method_declaration" => {
                if let Some(name) = field_text(node, "name", source) {
                    out.push(Declaration::Member {
                        name,
                        is_test: self.has_test_annotation(node, source),
                        line: node.start_position().row as u32 + 1,
                    });
                }
            }
            _ => {}
        }

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.walk_node(child, source, out);
        }
    }

    /// `@Test`, `@org.junit.Test` and friends, matched on the last segment.
    fn has_test_annotation(&self, method: Node, source: &[u8]) -> bool {
        let mut cursor = method.walk();
        let Some(modifiers) = method
            .children(&mut cursor)
            .find(|c| c.kind() == "modifiers")
        else {
            return false;
        };

        let mut cursor = modifiers.walk();
        let found = modifiers
            .children(&mut cursor)
            .filter(|c| matches!(c.kind(), "marker_annotation" | "annotation"))
            .filter_map(|a| field_text(a, "name", source))
            .any(|name| {
                let simple = name.rsplit('.').next().unwrap_or(name.as_str());
                self.settings.test_annotations.iter().any(|t| t == simple)
            });
        found
    }
}

impl AstParser for JavaParser {
    fn name(&self) -> &'static str {
        "java"
    }

    fn handles(&self, path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == "java")
    }

    fn parse(&self, source: &str) -> Result<Vec<Declaration>, SyntaxFailure> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_java::LANGUAGE.into())
            .expect("tree-sitter-java language");

        let tree = parser.parse(source, None).ok_or_else(|| SyntaxFailure {
            message: "parser produced no tree".to_string(),
        })?;
        let root = tree.root_node();
        if let Some(bad) = first_error(root) {
            return Err(SyntaxFailure::at(bad));
        }

        let mut out = Vec::new();
        self.walk_node(root, source.as_bytes(), &mut out);
        Ok(out)
    }
}

pub(crate) fn field_text(node: Node, field: &str, source: &[u8]) -> Option<String> {
    node.child_by_field_name(field)
        .and_then(|n| n.utf8_text(source).ok())
        .map(str::to_string)
}

/// First ERROR or MISSING node in document order.
pub(crate) fn first_error(node: Node) -> Option<Node> {
    if !node.has_error() {
        return None;
    }
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    let mut cursor = node.walk();
    let children: Vec<Node> = node.children(&mut cursor).collect();
    children.into_iter().find_map(first_error)
}

impl SyntaxFailure {
    pub(crate) fn at(node: Node) -> Self {
        let pos = node.start_position();
        let what = if node.is_missing() {
            format!("missing {}", node.kind())
        } else {
            "syntax error".to_string()
        };
        Self {
            message: format!("{what} at line {}, column {}", pos.row + 1, pos.column + 1),
        }
    }
}
