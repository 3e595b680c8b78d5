//! Cargo build backend with JSON diagnostic parsing

use super::{
    compose_command, BuildContext, BuildExecutor, BuildResult, ShellCommand, SyntaxChecker,
    SyntaxLanguage,
};
use crate::config::CargoSettings;
use crate::error::{RepairError, RepairResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Cargo JSON message format
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "reason")]
pub enum CargoMessage {
    #[serde(rename = "compiler-message")]
    CompilerMessage { message: DiagnosticMessage },

    #[serde(rename = "build-finished")]
    BuildFinished { success: bool },

    #[serde(other)]
    Other,
}

impl CargoMessage {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            CargoMessage::CompilerMessage { message } if message.level == "error"
        )
    }
}

/// Compiler diagnostic message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticMessage {
    pub message: String,
    pub code: Option<ErrorCode>,
    /// Severity level ("error", "warning", "note")
    pub level: String,
    #[serde(default)]
    pub spans: Vec<Span>,
    pub rendered: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorCode {
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    pub file_name: String,
    pub line_start: usize,
    pub column_start: usize,
    pub is_primary: bool,
}

impl DiagnosticMessage {
    /// Rendered text, or a rustc-shaped rendering built from parts.
    pub fn format(&self) -> String {
        if let Some(rendered) = &self.rendered {
            return rendered.trim_end().to_string();
        }

        let mut result = self.level.clone();
        if let Some(code) = &self.code {
            result.push_str(&format!("[{}]", code.code));
        }
        result.push_str(&format!(": {}", self.message));
        if let Some(span) = self.spans.iter().find(|s| s.is_primary) {
            result.push_str(&format!(
                "\n  --> {}:{}:{}",
                span.file_name, span.line_start, span.column_start
            ));
        }
        result
    }
}

/// Parse JSON lines from cargo stdout, skipping anything else.
pub fn parse_json_messages(output: &str) -> Vec<CargoMessage> {
    output
        .lines()
        .filter_map(|line| serde_json::from_str::<CargoMessage>(line).ok())
        .collect()
}

enum Mode {
    Cargo(ShellCommand),
    SyntaxOnly(SyntaxChecker),
}

/// Runs `cargo build --message-format=json`, or a Rust syntax check when
/// cargo is absent and not required.
pub struct CargoBuilder {
    command: String,
    mode: Mode,
}

impl CargoBuilder {
    pub fn new(settings: CargoSettings, ctx: &BuildContext) -> RepairResult<Self> {
        let toolchain = settings
            .toolchain
            .clone()
            .or_else(|| ctx.toolchains.cargo_home.clone());

        let Some(cargo) = ctx.toolchains.locate("cargo", toolchain.as_deref()) else {
            if settings.require_installed {
                return Err(RepairError::configuration(
                    "cargo is required but was not found",
                ));
            }
            warn!(
                root = %ctx.root_dir.display(),
                "cargo not found, degrading to Rust syntax-only checks"
            );
            let checker = SyntaxChecker::new(&ctx.root_dir, SyntaxLanguage::Rust);
            return Ok(Self {
                command: checker.describe(),
                mode: Mode::SyntaxOnly(checker),
            });
        };

        let command = compose_command(&ctx.root_dir, &cargo.to_string_lossy(), &settings.goals)?;
        let shell = ShellCommand::new(
            command.clone(),
            ctx.root_dir.clone(),
            settings.build_timeout_secs,
        )
        .with_search_path(&ctx.toolchains);

        Ok(Self {
            command,
            mode: Mode::Cargo(shell),
        })
    }

    pub fn is_syntax_only(&self) -> bool {
        matches!(self.mode, Mode::SyntaxOnly(_))
    }
}

#[async_trait]
impl BuildExecutor for CargoBuilder {
    fn name(&self) -> &'static str {
        "cargo"
    }

    fn command(&self) -> &str {
        &self.command
    }

    async fn build(&self) -> BuildResult {
        let shell = match &self.mode {
            Mode::Cargo(shell) => shell,
            Mode::SyntaxOnly(checker) => return checker.run().await,
        };

        let run = shell.run().await;
        let messages = parse_json_messages(&run.stdout);
        let finished_ok = messages
            .iter()
            .all(|m| !matches!(m, CargoMessage::BuildFinished { success: false }));
        let error_entries: Vec<String> = messages
            .iter()
            .filter(|m| m.is_error())
            .filter_map(|m| match m {
                CargoMessage::CompilerMessage { message } => Some(message.format()),
                _ => None,
            })
            .collect();

        let success = run.exited_ok() && finished_ok && error_entries.is_empty();

        let mut raw_output = error_entries.join("\n\n");
        let tail = match &run.failure {
            Some(failure) => format!("{}\n{failure}", run.stderr),
            None => run.stderr.clone(),
        };
        if !tail.trim().is_empty() {
            if !raw_output.is_empty() {
                raw_output.push('\n');
            }
            raw_output.push_str(tail.trim_start_matches('\n'));
        }

        // Failures without structured diagnostics (manifest errors, spawn
        // failures) still need something to show the model.
        let error_entries = if !success && error_entries.is_empty() {
            crate::localizer::split_errors(&raw_output, Default::default())
        } else {
            error_entries
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
