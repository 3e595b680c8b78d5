//! Backend registry
//!
//! Maps a selector (bare name or tagged config) to a constructed backend.
//! Every kind has a fixed candidate table; resolution is a pure lookup plus
//! one log record, so it is safe to call from concurrent sessions.

use crate::builder::{
    BuildContext, BuildExecutor, CargoBuilder, CommandBuilder, MavenBuilder,
};
use crate::config::{
    AgentConfig, AstParserConfig, BuilderConfig, BuilderOverrides, CargoSettings, CommandSettings,
    JavaParserSettings, MavenSettings, ParserOverrides, PythonParserSettings, Selector,
};
use crate::error::{RepairError, RepairResult};
use crate::structure::{AstParser, JavaParser, PythonParser};
use tracing::info;

/// Kinds of pluggable backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Builder,
    AstParser,
    LlmAgent,
}

impl BackendKind {
    /// Conventional suffixes accepted after a short name (`MavenBuilder`)
    fn suffixes(self) -> &'static [&'static str] {
        match self {
            Self::Builder => &["builder", "executor"],
            Self::AstParser => &["astparser", "parser"],
            Self::LlmAgent => &["llmagent", "agent"],
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Builder => write!(f, "builder"),
            Self::AstParser => write!(f, "ast_parser"),
            Self::LlmAgent => write!(f, "llm_agent"),
        }
    }
}

/// Config enums whose populated variant names an implementation
pub trait Variant {
    fn variant_name(&self) -> &'static str;
}

impl Variant for BuilderConfig {
    fn variant_name(&self) -> &'static str {
        BuilderConfig::variant_name(self)
    }
}

impl Variant for AstParserConfig {
    fn variant_name(&self) -> &'static str {
        AstParserConfig::variant_name(self)
    }
}

impl Variant for AgentConfig {
    fn variant_name(&self) -> &'static str {
        AgentConfig::variant_name(self)
    }
}

/// One constructible implementation of a backend kind
pub struct Candidate<C, X: ?Sized, T> {
    pub name: &'static str,
    pub default_config: fn() -> C,
    pub construct: fn(C, &X) -> RepairResult<T>,
}

/// Whether `selector` names `candidate`, case-insensitively, with or
/// without the kind's conventional suffix.
pub fn matches_name(kind: BackendKind, candidate: &str, selector: &str) -> bool {
    let wanted = selector.trim().to_ascii_lowercase();
    if wanted == candidate {
        return true;
    }
    kind.suffixes().iter().any(|suffix| {
        wanted
            .strip_suffix(suffix)
            .map(|s| s.trim_end_matches(['_', '-']))
            .is_some_and(|stem| !stem.is_empty() && stem == candidate)
    })
}

/// Resolve `selector` against `candidates` and construct the match.
///
/// `apply_overrides` runs on the config after selection, so explicitly
/// supplied parameters win over configured ones.
pub fn resolve<C, X, T>(
    kind: BackendKind,
    selector: &Selector<C>,
    candidates: &[Candidate<C, X, T>],
    ctx: &X,
    apply_overrides: impl FnOnce(&mut C),
) -> RepairResult<T>
where
    C: Variant + Clone,
    X: ?Sized,
{
    let (candidate, mut config) = match selector {
        Selector::Name(name) => {
            let matched: Vec<&Candidate<C, X, T>> = candidates
                .iter()
                .filter(|c| matches_name(kind, c.name, name))
                .collect();
            match matched.as_slice() {
                [one] => (*one, (one.default_config)()),
                [] => {
                    let known: Vec<&str> = candidates.iter().map(|c| c.name).collect();
                    return Err(RepairError::configuration(format!(
                        "no {kind} named `{name}` (known: {})",
                        known.join(", ")
                    )));
                }
                many => {
                    let names: Vec<&str> = many.iter().map(|c| c.name).collect();
                    return Err(RepairError::configuration(format!(
                        "{kind} selector `{name}` is ambiguous: {}",
                        names.join(", ")
                    )));
                }
            }
        }
        Selector::Config(config) => {
            let variant = config.variant_name();
            let candidate = candidates
                .iter()
                .find(|c| c.name == variant)
                .ok_or_else(|| {
                    RepairError::configuration(format!("no {kind} implementation for `{variant}`"))
                })?;
            (candidate, config.clone())
        }
    };

    apply_overrides(&mut config);
    let instance = (candidate.construct)(config, ctx)?;
    info!(kind = %kind, implementation = candidate.name, "Resolved backend");
    Ok(instance)
}

fn mismatch<T>(kind: BackendKind, expected: &str, got: &str) -> RepairResult<T> {
    Err(RepairError::configuration(format!(
        "{kind} `{expected}` constructed from `{got}` settings"
    )))
}

// ============================================================================
// Builders
// ============================================================================

fn build_maven(config: BuilderConfig, ctx: &BuildContext) -> RepairResult<Box<dyn BuildExecutor>> {
    match config {
        BuilderConfig::Maven(s) => Ok(Box::new(MavenBuilder::new(s, ctx)?)),
        other => mismatch(BackendKind::Builder, "maven", other.variant_name()),
    }
}

fn build_cargo(config: BuilderConfig, ctx: &BuildContext) -> RepairResult<Box<dyn BuildExecutor>> {
    match config {
        BuilderConfig::Cargo(s) => Ok(Box::new(CargoBuilder::new(s, ctx)?)),
        other => mismatch(BackendKind::Builder, "cargo", other.variant_name()),
    }
}

fn build_command(
    config: BuilderConfig,
    ctx: &BuildContext,
) -> RepairResult<Box<dyn BuildExecutor>> {
    match config {
        BuilderConfig::Command(s) => Ok(Box::new(CommandBuilder::new(s, ctx)?)),
        other => mismatch(BackendKind::Builder, "command", other.variant_name()),
    }
}

pub static BUILDER_CANDIDATES: &[Candidate<BuilderConfig, BuildContext, Box<dyn BuildExecutor>>] = &[
    Candidate {
        name: "maven",
        default_config: || BuilderConfig::Maven(MavenSettings::default()),
        construct: build_maven,
    },
    Candidate {
        name: "cargo",
        default_config: || BuilderConfig::Cargo(CargoSettings::default()),
        construct: build_cargo,
    },
    Candidate {
        name: "command",
        default_config: || BuilderConfig::Command(CommandSettings::default()),
        construct: build_command,
    },
];

pub fn resolve_builder(
    selector: &Selector<BuilderConfig>,
    ctx: &BuildContext,
    overrides: &BuilderOverrides,
) -> RepairResult<Box<dyn BuildExecutor>> {
    resolve(
        BackendKind::Builder,
        selector,
        BUILDER_CANDIDATES,
        ctx,
        |config| config.apply_overrides(overrides),
    )
}

// ============================================================================
// AST parsers
// ============================================================================

fn parser_java(config: AstParserConfig, _: &()) -> RepairResult<Box<dyn AstParser>> {
    match config {
        AstParserConfig::Java(s) => Ok(Box::new(JavaParser::new(s))),
        other => mismatch(BackendKind::AstParser, "java", other.variant_name()),
    }
}

fn parser_python(config: AstParserConfig, _: &()) -> RepairResult<Box<dyn AstParser>> {
    match config {
        AstParserConfig::Python(s) => Ok(Box::new(PythonParser::new(s))),
        other => mismatch(BackendKind::AstParser, "python", other.variant_name()),
    }
}

pub static AST_PARSER_CANDIDATES: &[Candidate<AstParserConfig, (), Box<dyn AstParser>>] = &[
    Candidate {
        name: "java",
        default_config: || AstParserConfig::Java(JavaParserSettings::default()),
        construct: parser_java,
    },
    Candidate {
        name: "python",
        default_config: || AstParserConfig::Python(PythonParserSettings::default()),
        construct: parser_python,
    },
];

pub fn resolve_ast_parser(
    selector: &Selector<AstParserConfig>,
    overrides: &ParserOverrides,
) -> RepairResult<Box<dyn AstParser>> {
    resolve(
        BackendKind::AstParser,
        selector,
        AST_PARSER_CANDIDATES,
        &(),
        |config| config.apply_overrides(overrides),
    )
}
