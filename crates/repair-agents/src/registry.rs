//! LLM agent candidates for the backend registry.

use std::collections::HashMap;

use repair_core::config::{AgentConfig, AgentOverrides, AgentSettings};
use repair_core::registry::{resolve, BackendKind, Candidate};
use repair_core::{RepairError, RepairResult, ResolvedConfig, Selector};

use crate::agent::{anthropic, openai, AnthropicAgent, LlmAgent, OpenAiAgent};

/// Secrets captured when the configuration was resolved.
#[derive(Debug, Clone, Default)]
pub struct AgentContext {
    pub api_keys: HashMap<String, String>,
}

impl AgentContext {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            api_keys: config.api_keys.clone(),
        }
    }

    fn key_for(&self, settings: &AgentSettings, default_var: &str) -> Option<String> {
        let var = settings.api_key_env.as_deref().unwrap_or(default_var);
        self.api_keys.get(var).cloned()
    }
}

fn agent_error(e: crate::agent::AgentError) -> RepairError {
    RepairError::configuration(e.to_string())
}

fn agent_openai(config: AgentConfig, ctx: &AgentContext) -> RepairResult<Box<dyn LlmAgent>> {
    match config {
        AgentConfig::Openai(s) => {
            let key = ctx.key_for(&s, openai::DEFAULT_API_KEY_VAR);
            Ok(Box::new(OpenAiAgent::new(s, key).map_err(agent_error)?))
        }
        other => Err(RepairError::configuration(format!(
            "llm_agent `openai` constructed from `{}` settings",
            other.variant_name()
        ))),
    }
}

fn agent_anthropic(config: AgentConfig, ctx: &AgentContext) -> RepairResult<Box<dyn LlmAgent>> {
    match config {
        AgentConfig::Anthropic(s) => {
            let key = ctx.key_for(&s, anthropic::DEFAULT_API_KEY_VAR);
            Ok(Box::new(AnthropicAgent::new(s, key).map_err(agent_error)?))
        }
        other => Err(RepairError::configuration(format!(
            "llm_agent `anthropic` constructed from `{}` settings",
            other.variant_name()
        ))),
    }
}

pub static AGENT_CANDIDATES: &[Candidate<AgentConfig, AgentContext, Box<dyn LlmAgent>>] = &[
    Candidate {
        name: "openai",
        default_config: || AgentConfig::Openai(AgentSettings::default()),
        construct: agent_openai,
    },
    Candidate {
        name: "anthropic",
        default_config: || AgentConfig::Anthropic(AgentSettings::default()),
        construct: agent_anthropic,
    },
];

pub fn resolve_agent(
    selector: &Selector<AgentConfig>,
    ctx: &AgentContext,
    overrides: &AgentOverrides,
) -> RepairResult<Box<dyn LlmAgent>> {
    resolve(
        BackendKind::LlmAgent,
        selector,
        AGENT_CANDIDATES,
        ctx,
        |config| config.apply_overrides(overrides),
    )
}
