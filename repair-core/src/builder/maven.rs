//! Maven build backend

use super::{
    compose_command, sanity_check, BuildContext, BuildExecutor, BuildResult, ShellCommand,
    SyntaxChecker, SyntaxLanguage,
};
use crate::config::{MavenSettings, SplitPolicy};
use crate::error::{RepairError, RepairResult};
use crate::localizer::split_errors;
use async_trait::async_trait;
use tracing::{info, warn};

pub const BUILD_FAILURE: &str = "[INFO] BUILD FAILURE";
pub const BUILD_SUCCESS: &str = "[INFO] BUILD SUCCESS";
pub const COMPILATION_ERROR_START: &str = "[ERROR] COMPILATION ERROR :";

enum Mode {
    Maven(ShellCommand),
    SyntaxOnly(SyntaxChecker),
}

/// Runs `mvn` against a project root, or a Java syntax check when Maven is
/// absent and not required.
pub struct MavenBuilder {
    command: String,
    mode: Mode,
    split: SplitPolicy,
}

impl MavenBuilder {
    pub fn new(settings: MavenSettings, ctx: &BuildContext) -> RepairResult<Self> {
        let toolchain = settings
            .toolchain
            .clone()
            .or_else(|| ctx.toolchains.maven_home.clone());
        let jdk = settings
            .jdk_path
            .clone()
            .or_else(|| ctx.toolchains.java_home.clone());
        let mut envs = Vec::new();
        if let Some(jdk) = &jdk {
            envs.push(("JAVA_HOME".to_string(), jdk.to_string_lossy().into_owned()));
        }

        let Some(mvn) = ctx.toolchains.locate("mvn", toolchain.as_deref()) else {
            if settings.require_installed {
                return Err(RepairError::configuration(format!(
                    "Maven is required but `mvn` was not found (toolchain: {})",
                    toolchain
                        .as_deref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "PATH".to_string())
                )));
            }
            warn!(
                root = %ctx.root_dir.display(),
                "Maven not found, degrading to Java syntax-only checks"
            );
            let checker = SyntaxChecker::new(&ctx.root_dir, SyntaxLanguage::Java);
            return Ok(Self {
                command: checker.describe(),
                mode: Mode::SyntaxOnly(checker),
                split: ctx.split,
            });
        };

        if settings.require_installed {
            let version = sanity_check(&mvn, &envs)?;
            info!(
                mvn = %mvn.display(),
                version = version.lines().next().unwrap_or(""),
                "Maven sanity check passed"
            );
        }

        let command = compose_command(&ctx.root_dir, &mvn.to_string_lossy(), &settings.goals)?;
        let mut shell = ShellCommand::new(
            command.clone(),
            ctx.root_dir.clone(),
            settings.build_timeout_secs,
        )
        .with_search_path(&ctx.toolchains);
        for (k, v) in envs {
            shell = shell.env(&k, v);
        }

        Ok(Self {
            command,
            mode: Mode::Maven(shell),
            split: ctx.split,
        })
    }

    pub fn is_syntax_only(&self) -> bool {
        matches!(self.mode, Mode::SyntaxOnly(_))
    }
}

#[async_trait]
impl BuildExecutor for MavenBuilder {
    fn name(&self) -> &'static str {
        "maven"
    }

    fn command(&self) -> &str {
        &self.command
    }

    async fn build(&self) -> BuildResult {
        let shell = match &self.mode {
            Mode::Maven(shell) => shell,
            Mode::SyntaxOnly(checker) => return checker.run().await,
        };

        let run = shell.run().await;
        let raw_output = run.combined();
        let success = run.exited_ok() && !has_line(&raw_output, BUILD_FAILURE);
        let error_entries = if success {
            Vec::new()
        } else {
            maven_error_entries(&raw_output, self.split)
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

fn has_line(output: &str, marker: &str) -> bool {
    output.lines().any(|l| l.trim_end() == marker)
}

/// Compilation-error block when present, otherwise the `[ERROR]`/`[FATAL]`
/// lines, otherwise the whole output.
pub fn maven_error_entries(output: &str, split: SplitPolicy) -> Vec<String> {
    let lines: Vec<&str> = output.lines().collect();

    let block = lines
        .iter()
        .position(|l| l.trim_end() == COMPILATION_ERROR_START)
        .and_then(|start| {
            lines[start + 1..]
                .iter()
                .position(|l| l.trim_end() == BUILD_FAILURE)
                .map(|len| &lines[start + 1..start + 1 + len])
        });

    let text = match block {
        Some(block) => block.join("\n"),
        None => {
            let errors: Vec<&str> = lines
                .iter()
                .copied()
                .filter(|l| l.starts_with("[ERROR]") || l.starts_with("[FATAL]"))
                .collect();
            if errors.is_empty() {
                output.to_string()
            } else {
                errors.join("\n")
            }
        }
    };

    split_errors(&text, split)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolchainEnv;
    use std::path::Path;

    const COMPILE_FAILURE: &str = "\
[INFO] Scanning for projects...
[INFO] -------------------------------------------------------------
[ERROR] COMPILATION ERROR :
[INFO] -------------------------------------------------------------
[ERROR] /w/app/src/main/java/A.java:[5,9] cannot find symbol
  symbol:   class Foo
  location: class A
[ERROR] /w/app/src/main/java/B.java:[7,1] class, interface, or enum expected
[INFO] 2 errors
[INFO] -------------------------------------------------------------
[INFO] BUILD FAILURE
[INFO] -------------------------------------------------------------
[ERROR] Failed to execute goal org.apache.maven.plugins:maven-compiler-plugin
";

    fn ctx(dir: &Path) -> BuildContext {
        BuildContext {
            root_dir: dir.to_path_buf(),
            toolchains: ToolchainEnv {
                search_path: vec![dir.join("no-such-bin")],
                ..Default::default()
            },
            split: SplitPolicy::default(),
        }
    }

    #[test]
    fn test_compilation_block_entries() {
        let entries = maven_error_entries(COMPILE_FAILURE, SplitPolicy::default());
        assert_eq!(
            entries,
            vec![
                "[INFO] -------------------------------------------------------------",
                "[ERROR] /w/app/src/main/java/A.java:[5,9] cannot find symbol\n  symbol:   class Foo\n  location: class A",
                "[ERROR] /w/app/src/main/java/B.java:[7,1] class, interface, or enum expected",
                "[INFO] 2 errors",
                "[INFO] -------------------------------------------------------------",
            ]
        );
    }

    #[test]
    fn test_non_compilation_failure_uses_error_lines() {
        let out = "[INFO] Building app\n[ERROR] Failed to read artifact descriptor\n[INFO] BUILD FAILURE\n[ERROR] Re-run Maven using -X\n";
        let entries = maven_error_entries(out, SplitPolicy::default());
        assert_eq!(
            entries,
            vec![
                "[ERROR] Failed to read artifact descriptor",
                "[ERROR] Re-run Maven using -X"
            ]
        );
    }

    #[test]
    fn test_required_but_missing_fails_construction() {
        let dir = tempfile::tempdir().unwrap();
        let err = MavenBuilder::new(MavenSettings::default(), &ctx(dir.path()))
            .err()
            .unwrap();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("mvn"));
    }

    #[tokio::test]
    async fn test_missing_optional_degrades_to_syntax_check() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("A.java"), "class A { void f( }").unwrap();
        let settings = MavenSettings {
            require_installed: false,
            ..Default::default()
        };
        let builder = MavenBuilder::new(settings, &ctx(dir.path())).unwrap();
        assert!(builder.is_syntax_only());

        let result = builder.build().await;
        assert!(!result.success);
        assert!(result.syntax_only);
        assert!(result.error_entries[0].contains("A.java:1:"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fake_maven_failure_marker() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let mvn = bin.join("mvn");
        // Exits 0 but reports a failed build.
        std::fs::write(
            &mvn,
            "#!/bin/sh\nif [ \"$1\" = \"--version\" ]; then echo 'Apache Maven 3.9.6'; exit 0; fi\necho '[ERROR] boom'\necho '[INFO] BUILD FAILURE'\n",
        )
        .unwrap();
        std::fs::set_permissions(&mvn, std::fs::Permissions::from_mode(0o755)).unwrap();

        let settings = MavenSettings {
            toolchain: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let builder = MavenBuilder::new(settings, &ctx(dir.path())).unwrap();
        assert!(builder.command().ends_with("clean verify -B"));

        let result = builder.build().await;
        assert_eq!(result.exit_code, Some(0));
        assert!(!result.success);
        assert_eq!(result.error_entries, vec!["[ERROR] boom"]);
    }
}
