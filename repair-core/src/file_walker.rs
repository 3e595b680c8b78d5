//! File Walker — .gitignore-respecting source discovery using the `ignore` crate

use ignore::WalkBuilder;
use std::path::{Path, PathBuf};

/// Build output directories never hold sources worth indexing
const SKIPPED_DIRS: &[&str] = &["target", "node_modules", "__pycache__"];

/// Walks a project tree for source files, respecting .gitignore rules.
pub struct FileWalker {
    root: PathBuf,
}

impl FileWalker {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// All files under root accepted by `keep`, sorted.
    pub fn files_matching(&self, keep: impl Fn(&Path) -> bool) -> Vec<PathBuf> {
        let walker = WalkBuilder::new(&self.root)
            .hidden(true)
            .git_ignore(true)
            .filter_entry(|entry| {
                let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
                !(is_dir
                    && entry
                        .file_name()
                        .to_str()
                        .is_some_and(|n| SKIPPED_DIRS.contains(&n)))
            })
            .build();

        let mut files: Vec<PathBuf> = walker
            .flatten()
            .map(|entry| entry.into_path())
            .filter(|path| path.is_file() && keep(path))
            .collect();

        files.sort();
        files
    }

    /// Files with the given extension (without the dot).
    pub fn files_with_extension(&self, ext: &str) -> Vec<PathBuf> {
        self.files_matching(|p| p.extension().and_then(|e| e.to_str()) == Some(ext))
    }
}
