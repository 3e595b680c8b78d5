//! Prompt construction for repair requests.

use std::path::Path;

use crate::agent::RepairPrompt;

/// Files larger than this are truncated in the prompt.
pub const MAX_FILE_CHARS: usize = 60_000;

pub const REPAIR_SYSTEM_PROMPT: &str = r#"You are a build-repair engineer working on a legacy codebase.

The project does not build. You receive the build feedback and the full content of the files the build output points at.

Rules:
- Fix the build errors with the smallest change that works.
- Do NOT delete, rename or move classes, interfaces or methods. Every existing program element must still exist after your change.
- Do not touch files that are not needed for the fix.
- Return every file you change in full, wrapped exactly like this:

<file path="relative/path/to/File.java">
...complete new file content...
</file>

- Paths are relative to the project root, as shown in the input.
- Anything outside <file> blocks is ignored."#;

/// One implicated file as shown to the model.
#[derive(Debug, Clone)]
pub struct FileExcerpt<'a> {
    /// Path relative to the project root
    pub path: &'a Path,
    pub content: &'a str,
}

/// Build the request for one diagnosing cycle.
pub fn build_repair_prompt(feedback: &str, files: &[FileExcerpt<'_>]) -> RepairPrompt {
    let mut user = String::new();
    user.push_str("## Build Feedback\n\n");
    user.push_str(feedback.trim());
    user.push_str("\n\n## Implicated Files\n\n");

    if files.is_empty() {
        user.push_str("The build output names no project files.\n");
    }
    for file in files {
        let content = truncate(file.content, MAX_FILE_CHARS);
        user.push_str(&format!("<file path=\"{}\">\n", file.path.display()));
        user.push_str(content);
        if !content.ends_with('\n') {
            user.push('\n');
        }
        if content.len() < file.content.len() {
            user.push_str("... [truncated]\n");
        }
        user.push_str("</file>\n\n");
    }

    RepairPrompt {
        system: REPAIR_SYSTEM_PROMPT.to_string(),
        user: user.trim_end().to_string(),
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
