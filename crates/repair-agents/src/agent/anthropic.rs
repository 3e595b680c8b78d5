//! Anthropic Messages API backend.

use async_trait::async_trait;
use repair_core::AgentSettings;
use tracing::debug;

use super::{endpoint, http_client, status_error, with_retry, AgentError, LlmAgent, RepairPrompt};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_API_KEY_VAR: &str = "ANTHROPIC_API_KEY";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicAgent {
    settings: AgentSettings,
    url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicAgent {
    pub fn new(mut settings: AgentSettings, api_key: Option<String>) -> Result<Self, AgentError> {
        if settings.model.trim().is_empty() {
            settings.model = DEFAULT_MODEL.to_string();
        }
        let Some(api_key) = api_key else {
            return Err(AgentError::MissingApiKey {
                var: settings
                    .api_key_env
                    .clone()
                    .unwrap_or_else(|| DEFAULT_API_KEY_VAR.to_string()),
            });
        };

        let base = settings.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let url = format!("{}/messages", endpoint(base, settings.region.as_deref()));
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
        let response = self
            .client
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let resp_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AgentError::Response(e.to_string()))?;

        // Concatenate text blocks; tool-use or thinking blocks carry no patch.
        let blocks = resp_json["content"]
            .as_array()
            .ok_or_else(|| AgentError::Response("no content array".to_string()))?;
        let text: Vec<&str> = blocks
            .iter()
            .filter(|b| b["type"] == "text")
            .filter_map(|b| b["text"].as_str())
            .collect();
        if text.is_empty() {
            return Err(AgentError::Response("no text content block".to_string()));
        }
        Ok(text.join("\n"))
    }
}

#[async_trait]
impl LlmAgent for AnthropicAgent {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.settings.model
    }

    async fn complete(&self, prompt: &RepairPrompt) -> Result<String, AgentError> {
        let mut request_body = serde_json::json!({
            "model": self.settings.model,
            "max_tokens": self.settings.max_tokens,
            "system": prompt.system,
            "messages": [{
                "role": "user",
                "content": prompt.user
            }]
        });
        if let Some(temperature) = self.settings.temperature {
            request_body["temperature"] = serde_json::json!(temperature);
        }

        debug!(model = %self.settings.model, url = %self.url, "Requesting completion");
        with_retry(&self.settings.retry, || self.send_once(&request_body)).await
    }
}
