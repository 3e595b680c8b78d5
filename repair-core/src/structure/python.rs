//! Python declarations via tree-sitter-python

use super::java::{field_text, first_error};
use super::{AstParser, Declaration, SyntaxFailure, TypeKind};
use crate::config::PythonParserSettings;
use std::path::Path;
use tree_sitter::{Node, Parser};

/// Base classes that make a class an interface
const INTERFACE_BASES: &[&str] = &["Protocol", "ABC"];

#[derive(Debug, Clone, Default)]
pub struct PythonParser {
    settings: PythonParserSettings,
}

impl PythonParser {
    pub fn new(settings: PythonParserSettings) -> Self {
        Self { settings }
    }

    fn walk_node(&self, node: Node, source: &[u8], out: &mut Vec<Declaration>) {
        match node.kind() {
            "class_definition" => {
                if let Some(name) = field_text(node, "name", source) {
                    out.push(Declaration::Type {
                        name,
                        kind: class_kind(node, source),
                    });
                }
            }
            "function_definition" => {
                if let Some(name) = field_text(node, "name", source) {
                    let is_test = name.starts_with(&self.settings.test_prefix)
                        || self.has_test_decorator(node, source);
                    out.push(Declaration::Member {
                        name,
                        is_test,
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

    /// Decorators live on the wrapping `decorated_definition`.
    fn has_test_decorator(&self, function: Node, source: &[u8]) -> bool {
        let Some(parent) = function.parent() else {
            return false;
        };
        if parent.kind() != "decorated_definition" {
            return false;
        }

        let mut cursor = parent.walk();
        let found = parent
            .children(&mut cursor)
            .filter(|c| c.kind() == "decorator")
            .filter_map(|d| d.utf8_text(source).ok())
            .any(|text| self.settings.test_decorators.iter().any(|m| text.contains(m.as_str())));
        found
    }
}

/// `class P(Protocol)`, `class B(abc.ABC)` and `class G(Protocol[T])` are interfaces.
fn class_kind(class: Node, source: &[u8]) -> TypeKind {
    let Some(bases) = class.child_by_field_name("superclasses") else {
        return TypeKind::Class;
    };

    let mut cursor = bases.walk();
    let is_interface = bases
        .named_children(&mut cursor)
        .filter_map(|b| b.utf8_text(source).ok())
        .any(|text| {
            let head = text.split('[').next().unwrap_or(text);
            let simple = head.rsplit('.').next().unwrap_or(head).trim();
            INTERFACE_BASES.contains(&simple)
        });

    if is_interface {
        TypeKind::Interface
    } else {
        TypeKind::Class
    }
}

impl AstParser for PythonParser {
    fn name(&self) -> &'static str {
        "python"
    }

    fn handles(&self, path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == "py")
    }

    fn parse(&self, source: &str) -> Result<Vec<Declaration>, SyntaxFailure> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .expect("tree-sitter-python language");

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
