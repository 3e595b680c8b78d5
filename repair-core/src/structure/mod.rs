//! Structural indexing and the equivalence gate
//!
//! A file's structure is the document-order sequence of its type and member
//! declarations. Patches are only accepted when that sequence survives,
//! modulo the tolerances in [`VerifyPolicy`].

pub mod java;
pub mod python;

pub use java::JavaParser;
pub use python::PythonParser;

use crate::config::VerifyPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Kind of a type declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    Class,
    Interface,
}

impl std::fmt::Display for TypeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Class => write!(f, "class"),
            Self::Interface => write!(f, "interface"),
        }
    }
}

/// One declaration in a structural fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum StructuralNode {
    Type {
        name: String,
        kind: TypeKind,
    },
    Member {
        enclosing_type: String,
        name: String,
        is_test: bool,
        line: Option<u32>,
    },
}

impl StructuralNode {
    pub fn is_test_member(&self) -> bool {
        matches!(self, Self::Member { is_test: true, .. })
    }

    fn without_line(mut self) -> Self {
        if let Self::Member { line, .. } = &mut self {
            *line = None;
        }
        self
    }
}

impl std::fmt::Display for StructuralNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Type { name, kind } => write!(f, "{kind} {name}"),
            Self::Member {
                enclosing_type,
                name,
                is_test,
                ..
            } => {
                write!(f, "{enclosing_type}::{name}")?;
                if *is_test {
                    write!(f, " (test)")?;
                }
                Ok(())
            }
        }
    }
}

/// Structure of one file, or `Unknown` when it could not be determined.
///
/// `Known(vec![])` means the file was verified to declare nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StructuralFingerprint {
    Known(Vec<StructuralNode>),
    Unknown,
}

impl StructuralFingerprint {
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    pub fn nodes(&self) -> Option<&[StructuralNode]> {
        match self {
            Self::Known(nodes) => Some(nodes),
            Self::Unknown => None,
        }
    }

    /// Apply policy filters. Never adds nodes.
    fn normalize(nodes: &[StructuralNode], policy: VerifyPolicy) -> Vec<StructuralNode> {
        nodes
            .iter()
            .filter(|n| !(policy.ignore_test_only_members && n.is_test_member()))
            .cloned()
            .map(|n| {
                if policy.ignore_line_numbers {
                    n.without_line()
                } else {
                    n
                }
            })
            .collect()
    }
}

/// Whether two fingerprints describe the same structure under `policy`.
///
/// Test members are dropped first (when ignored), then member lines are
/// stripped (when ignored), then the sequences are compared by value.
/// `Unknown` on either side is never equivalent, not even to itself.
pub fn equivalent(
    before: &StructuralFingerprint,
    after: &StructuralFingerprint,
    policy: VerifyPolicy,
) -> bool {
    match (before, after) {
        (StructuralFingerprint::Known(b), StructuralFingerprint::Known(a)) => {
            StructuralFingerprint::normalize(b, policy) == StructuralFingerprint::normalize(a, policy)
        }
        _ => false,
    }
}

/// Human-readable reason why `after` is not equivalent to `before`.
pub fn describe_difference(
    before: &StructuralFingerprint,
    after: &StructuralFingerprint,
    policy: VerifyPolicy,
) -> String {
    let (b, a) = match (before, after) {
        (StructuralFingerprint::Unknown, _) => {
            return "structure before the patch could not be determined".to_string()
        }
        (_, StructuralFingerprint::Unknown) => {
            return "patched file could not be parsed".to_string()
        }
        (StructuralFingerprint::Known(b), StructuralFingerprint::Known(a)) => (
            StructuralFingerprint::normalize(b, policy),
            StructuralFingerprint::normalize(a, policy),
        ),
    };

    let missing: Vec<String> = b
        .iter()
        .filter(|n| !a.contains(n))
        .map(ToString::to_string)
        .collect();
    let added: Vec<String> = a
        .iter()
        .filter(|n| !b.contains(n))
        .map(ToString::to_string)
        .collect();

    match (missing.is_empty(), added.is_empty()) {
        (false, _) => format!("removed or renamed: {}", missing.join(", ")),
        (true, false) => format!("added: {}", added.join(", ")),
        (true, true) => "declarations were reordered".to_string(),
    }
}

/// Indexing failure for a single file
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Member `{member}` at line {line} in {path} has no enclosing type")]
    Association {
        path: PathBuf,
        member: String,
        line: u32,
    },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A declaration as reported by a language parser, before association
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Declaration {
    Type {
        name: String,
        kind: TypeKind,
    },
    Member {
        name: String,
        is_test: bool,
        line: u32,
    },
}

/// Parse failure reported by a language parser
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxFailure {
    pub message: String,
}

/// Language-specific declaration extractor
pub trait AstParser: Send + Sync {
    /// Short implementation name
    fn name(&self) -> &'static str;

    /// Whether files at `path` are in this parser's language.
    fn handles(&self, path: &Path) -> bool;

    /// Declarations in document order. Lines are 1-based.
    fn parse(&self, source: &str) -> Result<Vec<Declaration>, SyntaxFailure>;
}

/// Turns files into structural fingerprints
pub struct StructuralIndexer {
    parser: Box<dyn AstParser>,
}

impl StructuralIndexer {
    pub fn new(parser: Box<dyn AstParser>) -> Self {
        Self { parser }
    }

    pub fn parser_name(&self) -> &'static str {
        self.parser.name()
    }

    /// Only handled files take part in structural gating.
    pub fn handles(&self, path: &Path) -> bool {
        self.parser.handles(path)
    }

    /// Index `path`, reading it from disk when `content` is `None`.
    pub fn try_index(
        &self,
        path: &Path,
        content: Option<&str>,
    ) -> Result<Vec<StructuralNode>, IndexError> {
        let owned;
        let source = match content {
            Some(text) => text,
            None => {
                owned = std::fs::read_to_string(path).map_err(|source| IndexError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                owned.as_str()
            }
        };

        let declarations = self
            .parser
            .parse(source)
            .map_err(|failure| IndexError::Parse {
                path: path.to_path_buf(),
                message: failure.message,
            })?;

        associate(path, declarations)
    }

    /// Fingerprint for `path`. Any indexing error downgrades to `Unknown`.
    pub fn index_file(&self, path: &Path, content: Option<&str>) -> StructuralFingerprint {
        match self.try_index(path, content) {
            Ok(nodes) => {
                debug!(path = %path.display(), nodes = nodes.len(), "Indexed file");
                StructuralFingerprint::Known(nodes)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Structure unknown");
                StructuralFingerprint::Unknown
            }
        }
    }
}

/// Attach each member to the nearest preceding type in document order.
fn associate(
    path: &Path,
    declarations: Vec<Declaration>,
) -> Result<Vec<StructuralNode>, IndexError> {
    let mut current: Option<String> = None;
    let mut nodes = Vec::with_capacity(declarations.len());

    for decl in declarations {
        match decl {
            Declaration::Type { name, kind } => {
                current = Some(name.clone());
                nodes.push(StructuralNode::Type { name, kind });
            }
            Declaration::Member {
                name,
                is_test,
                line,
            } => {
                let Some(enclosing) = &current else {
                    return Err(IndexError::Association {
                        path: path.to_path_buf(),
                        member: name,
                        line,
                    });
                };
                nodes.push(StructuralNode::Member {
                    enclosing_type: enclosing.clone(),
                    name,
                    is_test,
                    line: Some(line),
                });
            }
        }
    }

    Ok(nodes)
}
