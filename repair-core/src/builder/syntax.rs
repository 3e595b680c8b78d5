//! Syntax-only fallback when the real toolchain is unavailable
//!
//! Parses every in-scope source file with tree-sitter and reports each
//! ERROR or MISSING node as a compiler-style diagnostic. This catches
//! malformed code but no type errors, so results carry `syntax_only`.

use super::BuildResult;
use crate::file_walker::FileWalker;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};
use tree_sitter::{Node, Parser};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntaxLanguage {
    Java,
    Rust,
}

impl SyntaxLanguage {
    fn extension(self) -> &'static str {
        match self {
            Self::Java => "java",
            Self::Rust => "rs",
        }
    }

    fn parser(self) -> Parser {
        let mut parser = Parser::new();
        match self {
            Self::Java => parser
                .set_language(&tree_sitter_java::LANGUAGE.into())
                .expect("tree-sitter-java language"),
            Self::Rust => parser
                .set_language(&tree_sitter_rust::LANGUAGE.into())
                .expect("tree-sitter-rust language"),
        }
        parser
    }
}

#[derive(Debug, Clone)]
pub struct SyntaxChecker {
    root_dir: PathBuf,
    language: SyntaxLanguage,
}

impl SyntaxChecker {
    pub fn new(root_dir: impl AsRef<Path>, language: SyntaxLanguage) -> Self {
        Self {
            root_dir: root_dir.as_ref().to_path_buf(),
            language,
        }
    }

    pub fn describe(&self) -> String {
        format!(
            "syntax-check *.{} under {}",
            self.language.extension(),
            self.root_dir.display()
        )
    }

    /// Run [`check`](Self::check) on the blocking pool.
    pub async fn run(&self) -> BuildResult {
        let checker = self.clone();
        match tokio::task::spawn_blocking(move || checker.check()).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Syntax check task failed");
                BuildResult {
                    success: false,
                    raw_output: format!("syntax check aborted: {e}"),
                    error_entries: vec![format!("syntax check aborted: {e}")],
                    exit_code: None,
                    duration_ms: 0,
                    syntax_only: true,
                }
            }
        }
    }

    pub fn check(&self) -> BuildResult {
        let start = Instant::now();
        let files =
            FileWalker::new(&self.root_dir).files_with_extension(self.language.extension());
        let mut parser = self.language.parser();
        let mut entries = Vec::new();

        for path in &files {
            let source = match std::fs::read_to_string(path) {
                Ok(s) => s,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Unreadable source skipped");
                    continue;
                }
            };
            let Some(tree) = parser.parse(&source, None) else {
                entries.push(format!("{}: error: parser produced no tree", path.display()));
                continue;
            };
            let mut nodes = Vec::new();
            collect_errors(tree.root_node(), &mut nodes);
            entries.extend(nodes.into_iter().map(|node| {
                let pos = node.start_position();
                let what = if node.is_missing() {
                    format!("missing {}", node.kind())
                } else {
                    format!("syntax error near `{}`", snippet(node, &source))
                };
                format!(
                    "{}:{}:{}: error: {what}",
                    path.display(),
                    pos.row + 1,
                    pos.column + 1
                )
            }));
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            files = files.len(),
            errors = entries.len(),
            duration_ms,
            "Syntax check finished"
        );

        BuildResult {
            success: entries.is_empty(),
            raw_output: entries.join("\n"),
            error_entries: entries,
            exit_code: None,
            duration_ms,
            syntax_only: true,
        }
    }
}

/// ERROR and MISSING nodes, outermost only.
fn collect_errors<'t>(node: Node<'t>, out: &mut Vec<Node<'t>>) {
    if !node.has_error() {
        return;
    }
    if node.is_error() || node.is_missing() {
        out.push(node);
        return;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_errors(child, out);
    }
}

fn snippet(node: Node, source: &str) -> String {
    let text = node.utf8_text(source.as_bytes()).unwrap_or("");
    let first = text.lines().next().unwrap_or("").trim();
    first.chars().take(40).collect()
}
