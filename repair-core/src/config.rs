//! Session configuration
//!
//! A repair session is driven by one versioned TOML document. Backend
//! selection uses serde's externally tagged enums, so exactly one populated
//! sub-table names the implementation:
//!
//! ```toml
//! version = 1
//! root_dir = "/work/legacy-app"
//!
//! [builder.maven]
//! goals = "clean verify -B"
//!
//! [ast_parser]
//! java = {}
//!
//! [agent.openai]
//! model = "gpt-4o"
//! api_key_env = "OPENAI_API_KEY"
//!
//! [budget]
//! max_build_attempts = 6
//! max_rejections = 3
//! ```
//!
//! A backend may also be selected by bare name (`builder = "maven"`), in
//! which case the variant's default settings apply.
//!
//! Environment-derived defaults are captured exactly once through
//! [`Environment::capture`] and folded into a [`ResolvedConfig`]; no
//! component reads the process environment on its own.

use crate::error::{RepairError, RepairResult};
use crate::feedback::{ErrorChangePolicy, FeedbackStyle};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Only configuration version understood by this crate
pub const CONFIG_VERSION: u32 = 1;

/// Default wall-clock limit for one build invocation
pub const DEFAULT_BUILD_TIMEOUT_SECS: u64 = 900;

/// API key variables captured even when the agent is selected by bare name
pub const DEFAULT_API_KEY_VARS: &[&str] = &["OPENAI_API_KEY", "ANTHROPIC_API_KEY"];

/// Either a bare implementation name or a fully specified config variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Selector<C> {
    Name(String),
    Config(C),
}

impl<C> Selector<C> {
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }
}

// ============================================================================
// Builder backends
// ============================================================================

/// Build backend selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuilderConfig {
    Maven(MavenSettings),
    Cargo(CargoSettings),
    Command(CommandSettings),
}

impl BuilderConfig {
    /// Short implementation name of the populated variant
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Maven(_) => "maven",
            Self::Cargo(_) => "cargo",
            Self::Command(_) => "command",
        }
    }

    /// Fold explicitly supplied parameters over the configured ones.
    pub fn apply_overrides(&mut self, overrides: &BuilderOverrides) {
        let (toolchain, require, goals, timeout) = match self {
            Self::Maven(s) => (
                &mut s.toolchain,
                &mut s.require_installed,
                &mut s.goals,
                &mut s.build_timeout_secs,
            ),
            Self::Cargo(s) => (
                &mut s.toolchain,
                &mut s.require_installed,
                &mut s.goals,
                &mut s.build_timeout_secs,
            ),
            Self::Command(s) => (
                &mut s.toolchain,
                &mut s.require_installed,
                &mut s.command,
                &mut s.build_timeout_secs,
            ),
        };
        if let Some(path) = &overrides.toolchain {
            *toolchain = Some(path.clone());
        }
        if let Some(required) = overrides.require_installed {
            *require = required;
        }
        if let Some(g) = &overrides.goals {
            *goals = g.clone();
        }
        if let Some(secs) = overrides.build_timeout_secs {
            *timeout = secs;
        }
    }
}

/// Maven build settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MavenSettings {
    /// Maven installation directory or `mvn` executable. Defaults to
    /// `MAVEN_HOME`, then `mvn` on `PATH`.
    pub toolchain: Option<PathBuf>,
    /// JDK exported as `JAVA_HOME` for the build. Defaults to `JAVA_HOME`.
    pub jdk_path: Option<PathBuf>,
    /// Goals and flags appended after the tool
    pub goals: String,
    /// Fail construction when Maven cannot be found or does not start
    pub require_installed: bool,
    pub build_timeout_secs: u64,
}

impl Default for MavenSettings {
    fn default() -> Self {
        Self {
            toolchain: None,
            jdk_path: None,
            goals: "clean verify -B".to_string(),
            require_installed: true,
            build_timeout_secs: DEFAULT_BUILD_TIMEOUT_SECS,
        }
    }
}

/// Cargo build settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CargoSettings {
    /// Cargo home directory or `cargo` executable. Defaults to `CARGO_HOME`,
    /// then `cargo` on `PATH`.
    pub toolchain: Option<PathBuf>,
    pub goals: String,
    pub require_installed: bool,
    pub build_timeout_secs: u64,
}

impl Default for CargoSettings {
    fn default() -> Self {
        Self {
            toolchain: None,
            goals: "build --message-format=json".to_string(),
            require_installed: true,
            build_timeout_secs: DEFAULT_BUILD_TIMEOUT_SECS,
        }
    }
}

/// Arbitrary shell command settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSettings {
    /// Command run from the project root. `{root_dir}` is substituted.
    pub command: String,
    /// Directory or executable for the command's first word
    pub toolchain: Option<PathBuf>,
    /// Output must contain this text for the build to count as green
    pub success_marker: Option<String>,
    /// Output containing this text marks the build red regardless of exit code
    pub failure_marker: Option<String>,
    pub require_installed: bool,
    pub build_timeout_secs: u64,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            command: "make".to_string(),
            toolchain: None,
            success_marker: None,
            failure_marker: None,
            require_installed: false,
            build_timeout_secs: DEFAULT_BUILD_TIMEOUT_SECS,
        }
    }
}

/// Explicit builder parameters; each `Some` wins over configuration.
#[derive(Debug, Clone, Default)]
pub struct BuilderOverrides {
    pub toolchain: Option<PathBuf>,
    pub require_installed: Option<bool>,
    pub goals: Option<String>,
    pub build_timeout_secs: Option<u64>,
}

// ============================================================================
// AST parser backends
// ============================================================================

/// Structural parser selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AstParserConfig {
    Java(JavaParserSettings),
    Python(PythonParserSettings),
}

impl AstParserConfig {
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Java(_) => "java",
            Self::Python(_) => "python",
        }
    }

    pub fn apply_overrides(&mut self, overrides: &ParserOverrides) {
        if let Some(markers) = &overrides.test_markers {
            match self {
                Self::Java(s) => s.test_annotations = markers.clone(),
                Self::Python(s) => s.test_decorators = markers.clone(),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JavaParserSettings {
    /// Annotation names (without `@`, last path segment) that mark a test
    pub test_annotations: Vec<String>,
}

impl Default for JavaParserSettings {
    fn default() -> Self {
        Self {
            test_annotations: vec![
                "Test".to_string(),
                "ParameterizedTest".to_string(),
                "RepeatedTest".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PythonParserSettings {
    /// Decorator substrings that mark a test function
    pub test_decorators: Vec<String>,
    /// Function-name prefix that marks a test function
    pub test_prefix: String,
}

impl Default for PythonParserSettings {
    fn default() -> Self {
        Self {
            test_decorators: vec!["pytest".to_string()],
            test_prefix: "test".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParserOverrides {
    pub test_markers: Option<Vec<String>>,
}

// ============================================================================
// Model agent backends
// ============================================================================

/// Model-agent selection. Transport details are opaque pass-through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentConfig {
    Openai(AgentSettings),
    Anthropic(AgentSettings),
}

impl AgentConfig {
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Openai(_) => "openai",
            Self::Anthropic(_) => "anthropic",
        }
    }

    pub fn settings(&self) -> &AgentSettings {
        match self {
            Self::Openai(s) | Self::Anthropic(s) => s,
        }
    }

    pub fn settings_mut(&mut self) -> &mut AgentSettings {
        match self {
            Self::Openai(s) | Self::Anthropic(s) => s,
        }
    }

    pub fn apply_overrides(&mut self, overrides: &AgentOverrides) {
        let settings = self.settings_mut();
        if let Some(model) = &overrides.model {
            settings.model = model.clone();
        }
        if let Some(url) = &overrides.base_url {
            settings.base_url = Some(url.clone());
        }
        if let Some(region) = &overrides.region {
            settings.region = Some(region.clone());
        }
        if let Some(tokens) = overrides.max_tokens {
            settings.max_tokens = tokens;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Model identifier sent with every request
    pub model: String,
    /// Endpoint base URL; each backend has its own default
    pub base_url: Option<String>,
    /// Provider region, forwarded untouched
    pub region: Option<String>,
    /// Name of the environment variable holding the API key
    pub api_key_env: Option<String>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub request_timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            model: String::new(),
            base_url: None,
            region: None,
            api_key_env: None,
            max_tokens: 4096,
            temperature: None,
            request_timeout_secs: 120,
            retry: RetryPolicy::default(),
        }
    }
}

/// Transport retry policy for model calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_secs: u64,
    /// Double the wait after every failed attempt
    pub exponential: bool,
    pub max_backoff_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_secs: 2,
            exponential: true,
            max_backoff_secs: 60,
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `attempt` (1-based count of failures so far).
    pub fn delay_secs(&self, attempt: u32) -> u64 {
        let base = if self.exponential {
            self.backoff_secs
                .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
        } else {
            self.backoff_secs
        };
        base.min(self.max_backoff_secs)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AgentOverrides {
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub region: Option<String>,
    pub max_tokens: Option<u32>,
}

// ============================================================================
// Loop policies
// ============================================================================

/// Attempt and rejection budgets for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Total build invocations allowed
    pub max_build_attempts: u32,
    /// Total rejected patches allowed
    pub max_rejections: u32,
    /// Abort early once this many rejections were caused by unparsable files
    pub max_unknown_rejections: Option<u32>,
    /// Wall-clock limit for the whole session, checked between states
    pub session_timeout_secs: Option<u64>,
    /// Scale the build budget with the first build's error count
    pub errors_factor: Option<f64>,
    /// Floor of the scaled build budget
    pub min_build_attempts: u32,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_build_attempts: 5,
            max_rejections: 3,
            max_unknown_rejections: None,
            session_timeout_secs: None,
            errors_factor: None,
            min_build_attempts: 1,
        }
    }
}

impl BudgetConfig {
    /// Build attempts allowed for a session whose first build reported
    /// `initial_errors` errors. Never exceeds `max_build_attempts`.
    pub fn build_limit(&self, initial_errors: usize) -> u32 {
        let Some(factor) = self.errors_factor else {
            return self.max_build_attempts;
        };
        // Float-to-int `as` saturates and maps NaN to zero.
        let scaled = (initial_errors as f64 * factor).floor() as u32;
        scaled
            .max(self.min_build_attempts)
            .min(self.max_build_attempts)
    }
}

/// Tolerances applied by the structural equivalence gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyPolicy {
    pub ignore_line_numbers: bool,
    pub ignore_test_only_members: bool,
}

impl Default for VerifyPolicy {
    fn default() -> Self {
        Self {
            ignore_line_numbers: true,
            ignore_test_only_members: false,
        }
    }
}

/// Line-splitting policy for diagnostic text
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitPolicy {
    pub remove_empty_lines: bool,
    pub remove_strip_lines: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackPolicy {
    pub style: FeedbackStyle,
    pub error_change: ErrorChangePolicy,
}

// ============================================================================
// Top-level document
// ============================================================================

/// Repair session configuration as written on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairConfig {
    pub version: u32,
    pub root_dir: PathBuf,
    pub builder: Selector<BuilderConfig>,
    pub ast_parser: Selector<AstParserConfig>,
    pub agent: Selector<AgentConfig>,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub verify: VerifyPolicy,
    #[serde(default)]
    pub split: SplitPolicy,
    #[serde(default)]
    pub feedback: FeedbackPolicy,
}

impl RepairConfig {
    /// Parse a TOML document and check its version.
    pub fn from_toml_str(text: &str) -> RepairResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| RepairError::ConfigParse {
            path: PathBuf::from("<inline>"),
            message: e.to_string(),
        })?;
        config.check_version()?;
        Ok(config)
    }

    /// Load and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> RepairResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| RepairError::io(path, e))?;
        let config: Self = toml::from_str(&text).map_err(|e| RepairError::ConfigParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        config.check_version()?;
        Ok(config)
    }

    fn check_version(&self) -> RepairResult<()> {
        if self.version != CONFIG_VERSION {
            return Err(RepairError::configuration(format!(
                "unsupported config version {} (expected {})",
                self.version, CONFIG_VERSION
            )));
        }
        Ok(())
    }

    /// Fold the captured environment into an immutable session config.
    pub fn resolve(self, env: &Environment) -> ResolvedConfig {
        let mut key_vars: Vec<&str> = DEFAULT_API_KEY_VARS.to_vec();
        if let Selector::Config(agent) = &self.agent {
            if let Some(var) = &agent.settings().api_key_env {
                key_vars.push(var);
            }
        }
        let api_keys = key_vars
            .into_iter()
            .filter_map(|var| env.get(var).map(|v| (var.to_string(), v.to_string())))
            .collect();

        ResolvedConfig {
            toolchains: ToolchainEnv::from_environment(env),
            root_dir: self.root_dir,
            builder: self.builder,
            ast_parser: self.ast_parser,
            agent: self.agent,
            budget: self.budget,
            verify: self.verify,
            split: self.split,
            feedback: self.feedback,
            api_keys,
        }
    }
}

/// Snapshot of the process environment, taken once per session.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: HashMap<String, String>,
}

impl Environment {
    /// Read the current process environment.
    pub fn capture() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    /// Build an environment from explicit pairs (tests, embedding callers).
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

/// Toolchain locations derived from the environment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolchainEnv {
    pub search_path: Vec<PathBuf>,
    pub java_home: Option<PathBuf>,
    pub maven_home: Option<PathBuf>,
    pub cargo_home: Option<PathBuf>,
}

impl ToolchainEnv {
    pub fn from_environment(env: &Environment) -> Self {
        let search_path = env
            .get("PATH")
            .map(|p| std::env::split_paths(p).collect())
            .unwrap_or_default();
        Self {
            search_path,
            java_home: env.get("JAVA_HOME").map(PathBuf::from),
            maven_home: env
                .get("MAVEN_HOME")
                .or_else(|| env.get("M2_HOME"))
                .map(PathBuf::from),
            cargo_home: env.get("CARGO_HOME").map(PathBuf::from),
        }
    }

    /// Locate `tool`: an explicit toolchain (executable, or directory with
    /// `bin/<tool>` or `<tool>`) wins, otherwise the search path is scanned.
    pub fn locate(&self, tool: &str, toolchain: Option<&Path>) -> Option<PathBuf> {
        if tool.contains(std::path::MAIN_SEPARATOR) {
            let path = PathBuf::from(tool);
            return path.is_file().then_some(path);
        }
        if let Some(base) = toolchain {
            if base.is_file() {
                return Some(base.to_path_buf());
            }
            return [base.join("bin").join(tool), base.join(tool)]
                .into_iter()
                .find(|p| p.is_file());
        }
        self.search_path
            .iter()
            .map(|dir| dir.join(tool))
            .find(|p| p.is_file())
    }
}

/// Immutable, environment-resolved configuration for one session
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub root_dir: PathBuf,
    pub builder: Selector<BuilderConfig>,
    pub ast_parser: Selector<AstParserConfig>,
    pub agent: Selector<AgentConfig>,
    pub budget: BudgetConfig,
    pub verify: VerifyPolicy,
    pub split: SplitPolicy,
    pub feedback: FeedbackPolicy,
    pub toolchains: ToolchainEnv,
    /// API key values keyed by the variable name they were read from
    pub api_keys: HashMap<String, String>,
}

impl ResolvedConfig {
    /// Minimal config for embedding callers that wire components by name.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            builder: Selector::name("command"),
            ast_parser: Selector::name("java"),
            agent: Selector::name("openai"),
            budget: BudgetConfig::default(),
            verify: VerifyPolicy::default(),
            split: SplitPolicy::default(),
            feedback: FeedbackPolicy::default(),
            toolchains: ToolchainEnv::default(),
            api_keys: HashMap::new(),
        }
    }
}
