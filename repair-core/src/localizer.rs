//! Diagnostic splitting and error localization
//!
//! Pure functions over raw build output. Nothing here touches the
//! filesystem or panics on malformed input.

use crate::config::SplitPolicy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Python-style stack-trace frame: `File "<path>", line <n>, in <ctx>`
static TRACEBACK_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"File "([^"\n]*)""#).unwrap());

/// Maven compiler plugin: `[ERROR] /p/A.java:[55,31] msg`
static MAVEN_LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\[ERROR\]\s*(.+?\.java):\[(\d+),(\d+)\]").unwrap()
});

/// Plain javac: `/p/A.java:13: error: msg`
static JAVAC_LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?:\[ERROR\]\s*)?([^\s\[].*?\.java):(\d+):\s+error:").unwrap()
});

/// `path:line:col: error: msg`, as written by the syntax-only checker
static COLUMN_LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^([^\s\[][^\n]*?):(\d+):(\d+): error:").unwrap()
});

/// rustc span arrow: `  --> src/lib.rs:3:5`
static RUSTC_LOCATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*-->\s*(.+?):(\d+):(\d+)\s*$").unwrap());

/// Split raw diagnostic text into discrete entries.
///
/// An empty line closes the open entry and, unless empty lines are removed,
/// is emitted as an empty entry of its own. A line starting with whitespace
/// continues the open entry. Any other line opens a new one. Removing
/// whitespace-only lines implies removing empty lines.
pub fn split_errors(text: &str, policy: SplitPolicy) -> Vec<String> {
    let remove_empty = policy.remove_empty_lines || policy.remove_strip_lines;
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let mut entries = Vec::new();
    let mut open: Option<String> = None;

    for line in text.lines() {
        if line.is_empty() {
            entries.extend(open.take());
            if !remove_empty {
                entries.push(String::new());
            }
            continue;
        }

        if policy.remove_strip_lines && line.trim().is_empty() {
            continue;
        }

        if line.starts_with(char::is_whitespace) {
            match open.as_mut() {
                Some(entry) => {
                    entry.push('\n');
                    entry.push_str(line);
                }
                None => open = Some(line.to_string()),
            }
        } else {
            entries.extend(open.replace(line.to_string()));
        }
    }
    entries.extend(open);

    entries
}

/// In-scope files named by stack-trace frames, in order of appearance.
///
/// A path is in scope when it contains `root_dir` as a literal substring.
/// Duplicates are kept.
pub fn extract_files(text: &str, root_dir: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    TRACEBACK_FILE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .filter(|path| path.contains(root_dir))
        .map(str::to_string)
        .collect()
}

/// A file position reported by a compiler
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompilerLocation {
    pub path: PathBuf,
    pub line: u32,
    pub column: Option<u32>,
}

/// In-scope compiler locations from javac, Maven, rustc and
/// `path:line:col: error:` output.
///
/// Relative paths are resolved against `root_dir`. Results follow the order
/// in which the locations appear in `text`.
pub fn extract_compiler_locations(text: &str, root_dir: &Path) -> Vec<CompilerLocation> {
    let root = root_dir.to_string_lossy();
    let mut found: Vec<(usize, CompilerLocation)> = Vec::new();

    for (pattern, has_column) in [
        (&*MAVEN_LOCATION, true),
        (&*JAVAC_LOCATION, false),
        (&*RUSTC_LOCATION, true),
        (&*COLUMN_LOCATION, true),
    ] {
        for caps in pattern.captures_iter(text) {
            let (Some(whole), Some(path), Some(line)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                continue;
            };
            let Ok(line) = line.as_str().parse::<u32>() else {
                continue;
            };
            let column = if has_column {
                caps.get(3).and_then(|c| c.as_str().parse::<u32>().ok())
            } else {
                None
            };

            let raw = path.as_str().trim();
            let path = if Path::new(raw).is_absolute() {
                if !raw.contains(root.as_ref()) {
                    continue;
                }
                PathBuf::from(raw)
            } else {
                root_dir.join(raw)
            };

            found.push((whole.start(), CompilerLocation { path, line, column }));
        }
    }

    found.sort_by_key(|(offset, _)| *offset);
    found.into_iter().map(|(_, loc)| loc).collect()
}

/// Ordered, de-duplicated union of stack-trace files and compiler locations.
pub fn implicated_files(text: &str, root_dir: &Path) -> Vec<PathBuf> {
    let root = root_dir.to_string_lossy();
    let mut files: Vec<PathBuf> = Vec::new();

    let candidates = extract_files(text, &root)
        .into_iter()
        .map(PathBuf::from)
        .chain(
            extract_compiler_locations(text, root_dir)
                .into_iter()
                .map(|loc| loc.path),
        );

    for path in candidates {
        if !files.contains(&path) {
            files.push(path);
        }
    }
    files
}
