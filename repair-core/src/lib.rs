//! Repair Core Library
//!
//! Deterministic layers of the automated repair loop:
//! - Build executors for Maven, cargo and arbitrary shell commands
//! - Diagnostic splitting and error localization
//! - Structural indexing of source files and the equivalence gate that
//!   keeps patches from silently deleting program elements
//! - Feedback formatting for model prompts
//! - A registry that wires configured backends without coupling the loop to
//!   one language or toolchain
//!
//! Nothing in this crate talks to the network. Model agents and the session
//! state machine live in `repair-agents`.
//!
//! # Usage
//!
//! ```no_run
//! use repair_core::{BuildContext, Environment, RepairConfig};
//! use repair_core::registry::resolve_builder;
//!
//! # async fn run() -> repair_core::RepairResult<()> {
//! let config = RepairConfig::load("repair.toml")?.resolve(&Environment::capture());
//! let ctx = BuildContext {
//!     root_dir: config.root_dir.clone(),
//!     toolchains: config.toolchains.clone(),
//!     split: config.split,
//! };
//! let builder = resolve_builder(&config.builder, &ctx, &Default::default())?;
//! let result = builder.build().await;
//! println!("{} -> {}", builder.command(), result.success);
//! # Ok(())
//! # }
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod builder;
pub mod config;
pub mod error;
pub mod feedback;
pub mod file_walker;
pub mod localizer;
pub mod registry;
pub mod structure;

pub use error::{RepairError, RepairResult};

// Re-export configuration types
pub use config::{
    AgentConfig, AgentOverrides, AgentSettings, AstParserConfig, BudgetConfig, BuilderConfig,
    BuilderOverrides, Environment, FeedbackPolicy, ParserOverrides, RepairConfig, ResolvedConfig,
    RetryPolicy, Selector, SplitPolicy, ToolchainEnv, VerifyPolicy,
};

// Re-export build types
pub use builder::{BuildContext, BuildExecutor, BuildResult};

// Re-export localization and feedback helpers
pub use feedback::{format_many, format_one, ErrorChangePolicy, FeedbackStyle};
pub use localizer::{extract_compiler_locations, extract_files, implicated_files, split_errors};

// Re-export structural types
pub use structure::{
    equivalent, AstParser, IndexError, StructuralFingerprint, StructuralIndexer, StructuralNode,
    TypeKind,
};

pub use file_walker::FileWalker;
pub use registry::{BackendKind, Candidate, Variant};
