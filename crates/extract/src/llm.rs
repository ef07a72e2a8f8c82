use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::prompt::build_retry_prompt;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Free-form completion.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Completion that parses as JSON (code fences already stripped).
    async fn generate_json(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub url: String,
    pub model: String,
    pub temperature: f32,
    /// Repair attempts after the model returns invalid JSON
    pub json_retries: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
            temperature: 0.1,
            json_retries: 2,
        }
    }
}

#[derive(Clone)]
pub struct OllamaClient {
    config: LlmConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a str>,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    async fn complete(&self, prompt: &str, format: Option<&str>) -> Result<String> {
        let url = format!("{}/api/generate", self.config.url);

        let request = OllamaRequest {
            model: &self.config.model,
            prompt,
            stream: false,
            format,
            options: OllamaOptions {
                temperature: self.config.temperature,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Ollama")?;

        if !response.status().is_success() {
            anyhow::bail!("Ollama request failed: {}", response.status());
        }

        let ollama_response: OllamaResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        Ok(ollama_response.response)
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new(LlmConfig::default())
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.complete(prompt, None).await
    }

    /// Ask in JSON mode; on invalid output ask the model to fix its own answer.
    async fn generate_json(&self, prompt: &str) -> Result<String> {
        let mut response = self.complete(prompt, Some("json")).await?;

        for attempt in 0..=self.config.json_retries {
            let candidate = strip_code_fences(&response);
            if serde_json::from_str::<serde_json::Value>(candidate).is_ok() {
                return Ok(candidate.to_string());
            }
            if attempt == self.config.json_retries {
                break;
            }

            warn!(attempt = attempt + 1, "Model returned invalid JSON, asking for repair");
            response = self
                .complete(&build_retry_prompt(&response), Some("json"))
                .await?;
        }

        debug!(response = %response, "Giving up on invalid JSON");
        anyhow::bail!(
            "Failed to get valid JSON after {} repair attempts",
            self.config.json_retries
        )
    }
}

/// Drop a surrounding markdown code fence (```json ... ```), if any.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Skip the info string ("json") up to the first newline
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    body.strip_suffix("```").unwrap_or(body).trim()
}
