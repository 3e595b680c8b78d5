//! Repair Agents
//!
//! Model-agent backends and the repair session that drives them:
//! build the project, turn failures into feedback, ask a model for a patch,
//! refuse patches that drop program elements, and repeat until the build
//! passes or a budget runs out.
//!
//! # Usage
//!
//! ```no_run
//! use repair_agents::{RepairSession, SessionOverrides};
//! use repair_core::{Environment, RepairConfig};
//!
//! # async fn run() -> anyhow::Result<()> {
//! repair_agents::telemetry::init_tracing("info")?;
//! let config = RepairConfig::load("repair.toml")?.resolve(&Environment::capture());
//! let outcome = RepairSession::from_config(config, &SessionOverrides::default())?
//!     .run()
//!     .await?;
//! println!("{}", outcome.summary());
//! # Ok(())
//! # }
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod agent;
pub mod orchestrator;
pub mod prompts;
pub mod registry;
pub mod response;
pub mod state_machine;
pub mod telemetry;
pub mod workspace;

pub use agent::{AgentError, LlmAgent, ProposedPatch, RepairPrompt};
pub use orchestrator::{
    run_parallel, Rejection, RepairAttempt, RepairSession, SessionComponents, SessionOutcome,
    SessionOverrides, Verdict,
};
pub use registry::{resolve_agent, AgentContext};
pub use state_machine::{RepairState, StateMachine};
pub use workspace::{PatchError, Workspace};
