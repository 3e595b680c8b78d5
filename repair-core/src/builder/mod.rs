//! Build executors
//!
//! A build executor runs the project's build tool once per call and turns
//! its exit code and output into a [`BuildResult`]. A failing build is the
//! normal input of the repair loop, so `build()` never returns an error:
//! spawn failures and timeouts are reported as failed builds.

pub mod cargo;
pub mod command;
pub mod maven;
pub mod syntax;

pub use cargo::CargoBuilder;
pub use command::CommandBuilder;
pub use maven::MavenBuilder;
pub use syntax::{SyntaxChecker, SyntaxLanguage};

use crate::config::{SplitPolicy, ToolchainEnv};
use crate::error::{RepairError, RepairResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{info, warn};

/// Outcome of one build invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildResult {
    pub success: bool,
    /// Combined stdout and stderr
    pub raw_output: String,
    /// Diagnostics split into discrete entries
    pub error_entries: Vec<String>,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    /// Produced by the syntax-only fallback instead of the real toolchain
    #[serde(default)]
    pub syntax_only: bool,
}

impl BuildResult {
    pub fn passed(raw_output: impl Into<String>) -> Self {
        Self {
            success: true,
            raw_output: raw_output.into(),
            error_entries: Vec::new(),
            exit_code: Some(0),
            duration_ms: 0,
            syntax_only: false,
        }
    }

    /// Failed build whose entries are split from `raw_output` under `policy`.
    pub fn failed(raw_output: impl Into<String>, policy: SplitPolicy) -> Self {
        let raw_output = raw_output.into();
        let error_entries = crate::localizer::split_errors(&raw_output, policy);
        Self {
            success: false,
            raw_output,
            error_entries,
            exit_code: None,
            duration_ms: 0,
            syntax_only: false,
        }
    }

    /// Non-blank error entries
    pub fn errors(&self) -> impl Iterator<Item = &str> {
        self.error_entries
            .iter()
            .map(String::as_str)
            .filter(|e| !e.trim().is_empty())
    }
}

/// Runs a project's build
#[async_trait]
pub trait BuildExecutor: Send + Sync {
    /// Short implementation name
    fn name(&self) -> &'static str;

    /// The exact command `build()` runs
    fn command(&self) -> &str;

    /// Run the build once and wait for it to finish.
    async fn build(&self) -> BuildResult;
}

/// Everything a build backend needs besides its own settings
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub root_dir: PathBuf,
    pub toolchains: ToolchainEnv,
    pub split: SplitPolicy,
}

impl BuildContext {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            toolchains: ToolchainEnv::default(),
            split: SplitPolicy::default(),
        }
    }
}

/// `cd {root_dir}; {tool} {goals}` with the root and tool shell-quoted.
pub fn compose_command(root_dir: &Path, tool: &str, goals: &str) -> RepairResult<String> {
    let root = root_dir.to_string_lossy();
    let root = shlex::try_quote(&root)
        .map_err(|e| RepairError::configuration(format!("cannot quote root dir: {e}")))?;
    let tool = shlex::try_quote(tool)
        .map_err(|e| RepairError::configuration(format!("cannot quote tool path: {e}")))?;
    let goals = goals.trim();
    if goals.is_empty() {
        Ok(format!("cd {root}; {tool}"))
    } else {
        Ok(format!("cd {root}; {tool} {goals}"))
    }
}

/// Output of one shell invocation
#[derive(Debug, Clone)]
pub(crate) struct ShellRun {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    /// Spawn failure or timeout
    pub failure: Option<String>,
}

impl ShellRun {
    pub fn exited_ok(&self) -> bool {
        self.failure.is_none() && self.exit_code == Some(0)
    }

    /// stdout, then stderr, then any spawn/timeout failure
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        for extra in [Some(&self.stderr), self.failure.as_ref()].into_iter().flatten() {
            if extra.is_empty() {
                continue;
            }
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(extra);
        }
        out
    }
}

/// A `sh -c` invocation with a deadline
#[derive(Debug, Clone)]
pub(crate) struct ShellCommand {
    pub command: String,
    pub working_dir: PathBuf,
    pub envs: Vec<(String, String)>,
    pub timeout: Duration,
}

impl ShellCommand {
    pub fn new(command: String, working_dir: PathBuf, timeout_secs: u64) -> Self {
        Self {
            command,
            working_dir,
            envs: Vec::new(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.envs.push((key.to_string(), value.into()));
        self
    }

    /// Export the resolved search path so the child sees the same toolchains.
    pub fn with_search_path(self, toolchains: &ToolchainEnv) -> Self {
        if toolchains.search_path.is_empty() {
            return self;
        }
        match std::env::join_paths(&toolchains.search_path) {
            Ok(joined) => self.env("PATH", joined.to_string_lossy()),
            Err(e) => {
                warn!(error = %e, "Search path not exportable, child inherits PATH");
                self
            }
        }
    }

    pub async fn run(&self) -> ShellRun {
        let start = Instant::now();
        let mut cmd = tokio::process::Command::new("/bin/sh");
        cmd.arg("-c")
            .arg(&self.command)
            .current_dir(&self.working_dir)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group, so a timeout can signal every descendant.
        #[cfg(unix)]
        cmd.process_group(0);

        info!(command = %self.command, "Build started");
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return self.finish(ShellRun {
                    exit_code: None,
                    stdout: String::new(),
                    stderr: String::new(),
                    duration_ms: start.elapsed().as_millis() as u64,
                    failure: Some(format!("Failed to execute `{}`: {e}", self.command)),
                });
            }
        };
        let group = child.id();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let collected = tokio::time::timeout(self.timeout, async {
            tokio::join!(read_pipe(stdout), read_pipe(stderr), child.wait())
        })
        .await;

        let run = match collected {
            Ok((stdout, stderr, Ok(status))) => ShellRun {
                exit_code: status.code(),
                stdout,
                stderr,
                duration_ms: start.elapsed().as_millis() as u64,
                failure: None,
            },
            Ok((stdout, stderr, Err(e))) => ShellRun {
                exit_code: None,
                stdout,
                stderr,
                duration_ms: start.elapsed().as_millis() as u64,
                failure: Some(format!("Failed to wait for `{}`: {e}", self.command)),
            },
            Err(_) => {
                kill_group(group);
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to reap timed-out build");
                }
                ShellRun {
                    exit_code: None,
                    stdout: String::new(),
                    stderr: String::new(),
                    duration_ms: start.elapsed().as_millis() as u64,
                    failure: Some(format!("Build timed out after {}s", self.timeout.as_secs())),
                }
            }
        };

        self.finish(run)
    }

    fn finish(&self, run: ShellRun) -> ShellRun {
        info!(
            exit_code = ?run.exit_code,
            duration_ms = run.duration_ms,
            failure = run.failure.as_deref().unwrap_or(""),
            "Build finished"
        );
        run
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            warn!(error = %e, "Build output truncated");
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// SIGKILL the process group led by `leader`.
#[cfg(unix)]
fn kill_group(leader: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = leader.and_then(|id| i32::try_from(id).ok()) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        warn!(pgid = pid, error = %e, "Failed to kill build process group");
    }
}

#[cfg(not(unix))]
fn kill_group(_leader: Option<u32>) {}

/// Run `{tool} --version` synchronously; used once at construction.
pub(crate) fn sanity_check(tool: &Path, envs: &[(String, String)]) -> RepairResult<String> {
    let output = std::process::Command::new(tool)
        .arg("--version")
        .envs(envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .output()
        .map_err(|e| {
            RepairError::configuration(format!(
                "sanity check `{} --version` failed to start: {e}",
                tool.display()
            ))
        })?;

    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    if !output.status.success() {
        return Err(RepairError::configuration(format!(
            "sanity check `{} --version` exited with {:?}: {}",
            tool.display(),
            output.status.code(),
            text.trim()
        )));
    }
    Ok(text)
}
