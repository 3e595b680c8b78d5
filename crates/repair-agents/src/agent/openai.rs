//! OpenAI-compatible chat-completions backend.
//!
//! Works against api.openai.com and any server speaking the same
//! `/chat/completions` dialect (vLLM, llama.cpp, gateways).

use async_trait::async_trait;
use repair_core::AgentSettings;
use tracing::debug;

use super::{endpoint, http_client, status_error, with_retry, AgentError, LlmAgent, RepairPrompt};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_API_KEY_VAR: &str = "OPENAI_API_KEY";

pub struct OpenAiAgent {
    settings: AgentSettings,
    url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiAgent {
    /// A key is mandatory for the public endpoint. Self-hosted endpoints
    /// may run without one.
    pub fn new(mut settings: AgentSettings, api_key: Option<String>) -> Result<Self, AgentError> {
        if settings.model.trim().is_empty() {
            settings.model = DEFAULT_MODEL.to_string();
        }
        if api_key.is_none() && settings.base_url.is_none() {
            return Err(AgentError::MissingApiKey {
                var: settings
                    .api_key_env
                    .clone()
                    .unwrap_or_else(|| DEFAULT_API_KEY_VAR.to_string()),
            });
        }

        let base = settings.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let url = format!(
            "{}/chat/completions",
            endpoint(base, settings.region.as_deref())
        );
        let client = http_client(settings.request_timeout_secs)?;

        Ok(Self {
            settings,
            url,
            api_key,
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn send_once(&self, body: &serde_json::Value) -> Result<String, AgentError> {
        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request.json(body).send().await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let resp_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AgentError::Response(e.to_string()))?;

        resp_json["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AgentError::Response("no choices[0].message.content".to_string()))
    }
}

#[async_trait]
impl LlmAgent for OpenAiAgent {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.settings.model
    }

    async fn complete(&self, prompt: &RepairPrompt) -> Result<String, AgentError> {
        let mut request_body = serde_json::json!({
            "model": self.settings.model,
            "max_tokens": self.settings.max_tokens,
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user", "content": prompt.user }
            ]
        });
        if let Some(temperature) = self.settings.temperature {
            request_body["temperature"] = serde_json::json!(temperature);
        }

        debug!(model = %self.settings.model, url = %self.url, "Requesting completion");
        with_retry(&self.settings.retry, || self.send_once(&request_body)).await
    }
}
