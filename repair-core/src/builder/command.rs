//! Arbitrary shell command backend
//!
//! For toolchains without a dedicated backend (make, gradle, pytest, ...).
//! Success is the exit code refined by optional output markers.

use super::{BuildContext, BuildExecutor, BuildResult, ShellCommand};
use crate::config::{CommandSettings, SplitPolicy};
use crate::error::{RepairError, RepairResult};
use crate::localizer::split_errors;
use async_trait::async_trait;
use tracing::warn;

pub struct CommandBuilder {
    command: String,
    shell: ShellCommand,
    success_marker: Option<String>,
    failure_marker: Option<String>,
    split: SplitPolicy,
}

impl CommandBuilder {
    pub fn new(settings: CommandSettings, ctx: &BuildContext) -> RepairResult<Self> {
        let root = ctx.root_dir.to_string_lossy();
        let quoted_root = shlex::try_quote(&root)
            .map_err(|e| RepairError::configuration(format!("cannot quote root dir: {e}")))?;
        let template = settings.command.replace("{root_dir}", &quoted_root);

        let mut words = template.trim().splitn(2, char::is_whitespace);
        let tool = words.next().unwrap_or("");
        let rest = words.next().unwrap_or("").trim();
        if tool.is_empty() {
            return Err(RepairError::configuration("build command is empty"));
        }

        let located = ctx.toolchains.locate(tool, settings.toolchain.as_deref());
        let tool = match (&located, &settings.toolchain) {
            // An explicit toolchain pins the executable.
            (Some(path), Some(_)) => {
                let path = path.to_string_lossy();
                shlex::try_quote(&path)
                    .map_err(|e| {
                        RepairError::configuration(format!("cannot quote tool path: {e}"))
                    })?
                    .into_owned()
            }
            (Some(_), None) => tool.to_string(),
            (None, _) if settings.require_installed => {
                return Err(RepairError::configuration(format!(
                    "build tool `{tool}` is required but was not found"
                )));
            }
            (None, _) => {
                warn!(tool, "Build tool not found on the search path");
                tool.to_string()
            }
        };

        let body = if rest.is_empty() {
            tool
        } else {
            format!("{tool} {rest}")
        };
        let command = format!("cd {quoted_root}; {body}");
        let shell = ShellCommand::new(
            command.clone(),
            ctx.root_dir.clone(),
            settings.build_timeout_secs,
        )
        .with_search_path(&ctx.toolchains);

        Ok(Self {
            command,
            shell,
            success_marker: settings.success_marker.filter(|m| !m.is_empty()),
            failure_marker: settings.failure_marker.filter(|m| !m.is_empty()),
            split: ctx.split,
        })
    }
}

#[async_trait]
impl BuildExecutor for CommandBuilder {
    fn name(&self) -> &'static str {
        "command"
    }

    fn command(&self) -> &str {
        &self.command
    }

    async fn build(&self) -> BuildResult {
        let run = self.shell.run().await;
        let raw_output = run.combined();

        let success = run.exited_ok()
            && self
                .failure_marker
                .as_ref()
                .map_or(true, |m| !raw_output.contains(m.as_str()))
            && self
                .success_marker
                .as_ref()
                .map_or(true, |m| raw_output.contains(m.as_str()));

        let error_entries = if success {
            Vec::new()
        } else {
            split_errors(&raw_output, self.split)
        };

        BuildResult {
            success,
            raw_output,
            error_entries,
            exit_code: run.exit_code,
            duration_ms: run.duration_ms,
            syntax_only: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolchainEnv;
    use std::path::PathBuf;

    fn ctx(root: PathBuf) -> BuildContext {
        BuildContext {
            root_dir: root,
            toolchains: ToolchainEnv {
                search_path: vec![PathBuf::from("/bin"), PathBuf::from("/usr/bin")],
                ..Default::default()
            },
            split: SplitPolicy::default(),
        }
    }

    fn settings(command: &str) -> CommandSettings {
        CommandSettings {
            command: command.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_runs_in_root_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();
        let builder = CommandBuilder::new(settings("cat marker.txt"), &ctx(dir.path().into())).unwrap();
        assert!(builder.command().starts_with("cd "));

        let result = builder.build().await;
        assert!(result.success);
        assert_eq!(result.raw_output, "here");
        assert!(result.error_entries.is_empty());
    }

    #[tokio::test]
    async fn test_failure_marker_overrides_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings("echo 'FAILED: 2 tests'");
        s.failure_marker = Some("FAILED".to_string());
        let builder = CommandBuilder::new(s, &ctx(dir.path().into())).unwrap();

        let result = builder.build().await;
        assert_eq!(result.exit_code, Some(0));
        assert!(!result.success);
        assert_eq!(result.error_entries, vec!["FAILED: 2 tests"]);
    }

    #[tokio::test]
    async fn test_missing_success_marker_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings("echo done");
        s.success_marker = Some("ALL GREEN".to_string());
        let builder = CommandBuilder::new(s, &ctx(dir.path().into())).unwrap();
        assert!(!builder.build().await.success);
    }

    #[test]
    fn test_required_tool_missing() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings("definitely-not-a-build-tool --all");
        s.require_installed = true;
        let err = CommandBuilder::new(s, &ctx(dir.path().into())).err().unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_root_dir_placeholder_is_quoted() {
        let root = PathBuf::from("/tmp/has space");
        let builder = CommandBuilder::new(settings("make -C {root_dir}"), &ctx(root)).unwrap();
        assert_eq!(
            builder.command(),
            "cd '/tmp/has space'; make -C '/tmp/has space'"
        );
    }
}
