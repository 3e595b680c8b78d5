//! Model-agent backends
//!
//! An agent receives one [`RepairPrompt`] and answers with a
//! [`ProposedPatch`]: full replacement contents keyed by file path.
//! Transport failures are retried inside the agent according to the
//! configured [`RetryPolicy`]; whatever survives the retries is reported to
//! the session as an [`AgentError`].

pub mod anthropic;
pub mod openai;

pub use anthropic::AnthropicAgent;
pub use openai::OpenAiAgent;

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use repair_core::RetryPolicy;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::response::parse_patch;

/// One structured request to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairPrompt {
    pub system: String,
    pub user: String,
}

/// File path (as written by the model) to full new content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedPatch {
    pub files: BTreeMap<PathBuf, String>,
}

impl ProposedPatch {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        self.files.insert(path.into(), content.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum AgentError {
    /// Connection, timeout or body-read failure
    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Well-formed HTTP exchange whose payload is unusable
    #[error("malformed response: {0}")]
    Response(String),

    #[error("API key variable `{var}` is not set")]
    MissingApiKey { var: String },
}

impl AgentError {
    /// Rate limits, server errors and transport failures are worth another try.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Response(_) | Self::MissingApiKey { .. } => false,
        }
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// A model that proposes patches
#[async_trait]
pub trait LlmAgent: Send + Sync {
    /// Short implementation name
    fn name(&self) -> &'static str;

    /// Model identifier sent to the provider
    fn model(&self) -> &str;

    /// Raw completion text for `prompt`.
    async fn complete(&self, prompt: &RepairPrompt) -> Result<String, AgentError>;

    /// Ask for a patch. The default parses `<file path="…">` blocks out of
    /// the completion.
    async fn propose(&self, prompt: &RepairPrompt) -> Result<ProposedPatch, AgentError> {
        let text = self.complete(prompt).await?;
        Ok(parse_patch(&text))
    }
}

/// Run `op` until it succeeds, fails with a non-retriable error, or
/// `policy.max_attempts` is used up.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, AgentError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AgentError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retriable() && attempt < max_attempts => {
                let delay = policy.delay_secs(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_secs = delay,
                    error = %e,
                    "Model request failed, retrying"
                );
                tokio::time::sleep(Duration::from_secs(delay)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Shared HTTP client with the configured request timeout.
pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client, AgentError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(AgentError::from)
}

/// Substitute `{region}` in a configured endpoint.
pub(crate) fn endpoint(base_url: &str, region: Option<&str>) -> String {
    let base = base_url.trim_end_matches('/');
    match region {
        Some(region) => base.replace("{region}", region),
        None => base.to_string(),
    }
}

/// Read the body of a failed response into an [`AgentError::Status`].
pub(crate) async fn status_error(response: reqwest::Response) -> AgentError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    AgentError::Status { status, body }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff_secs: 0,
            exponential: false,
            max_backoff_secs: 0,
        }
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(3), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(AgentError::Status {
                    status: 503,
                    body: "busy".into(),
                })
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(2), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AgentError::Transport("reset".into()))
        })
        .await;
        assert!(matches!(result, Err(AgentError::Transport(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(5), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AgentError::Status {
                status: 401,
                body: "bad key".into(),
            })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_endpoint_region_substitution() {
        assert_eq!(
            endpoint("https://{region}.example.com/v1/", Some("eu-west-1")),
            "https://eu-west-1.example.com/v1"
        );
        assert_eq!(
            endpoint("https://api.example.com/v1", None),
            "https://api.example.com/v1"
        );
    }

    struct Canned(&'static str);

    #[async_trait]
    impl LlmAgent for Canned {
        fn name(&self) -> &'static str {
            "canned"
        }

        fn model(&self) -> &str {
            "none"
        }

        async fn complete(&self, _prompt: &RepairPrompt) -> Result<String, AgentError> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn test_default_propose_parses_blocks() {
        let agent = Canned("Here:\n<file path=\"src/A.java\">\nclass A {}\n</file>");
        let prompt = RepairPrompt {
            system: String::new(),
            user: String::new(),
        };
        let patch = agent.propose(&prompt).await.unwrap();
        assert_eq!(patch.len(), 1);
        assert_eq!(patch.files[&PathBuf::from("src/A.java")], "class A {}\n");
    }
}
