//! Patch extraction from model completions.
//!
//! The model answers with one or more blocks:
//!
//! ```text
//! <file path="src/main/java/A.java">
//! ...full new content...
//! </file>
//! ```
//!
//! Anything outside the blocks (explanations, reasoning) is ignored.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

use crate::agent::ProposedPatch;

static FILE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<file\s+path\s*=\s*"([^"\n]+)"\s*>(.*?)</file>"#).expect("valid regex")
});

/// Collect every `<file path="…">` block. A path that appears twice keeps
/// its last block; no blocks yields an empty patch.
pub fn parse_patch(text: &str) -> ProposedPatch {
    let mut patch = ProposedPatch::default();
    for caps in FILE_BLOCK.captures_iter(text) {
        let path = caps[1].trim();
        if path.is_empty() {
            continue;
        }
        patch
            .files
            .insert(PathBuf::from(path), block_content(&caps[2]));
    }
    patch
}

/// Drop the newline after the opening tag and a Markdown fence if the model
/// wrapped the content in one.
fn block_content(raw: &str) -> String {
    let body = raw
        .strip_prefix("\r\n")
        .or_else(|| raw.strip_prefix('\n'))
        .unwrap_or(raw);

    let trimmed = body.trim();
    if trimmed.starts_with("```") && trimmed.ends_with("```") && trimmed.len() > 6 {
        let inner = &trimmed[3..trimmed.len() - 3];
        // Skip the info string (```java)
        let inner = match inner.find('\n') {
            Some(i) => &inner[i + 1..],
            None => inner,
        };
        let mut content = inner.trim_end().to_string();
        content.push('\n');
        return content;
    }

    body.to_string()
}
