//! Generative model clients.
//!
//! Implementations of the core [`Generator`] trait:
//! - **[`DisabledGenerator`]**: always fails with `GeneratorDisabled`.
//! - **[`OpenAiGenerator`]**: calls an OpenAI-compatible
//!   `POST {base_url}/chat/completions` endpoint with retry and backoff.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use dataset_search_core::explain::Generator;
use dataset_search_core::Error;

use crate::config::GeneratorConfig;

/// Used when `generator.provider = "disabled"`.
pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    async fn generate(&self, _prompt: &str, _context: &str) -> dataset_search_core::Result<String> {
        Err(Error::GeneratorDisabled)
    }
}

pub struct OpenAiGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    max_retries: u32,
}

impl OpenAiGenerator {
    /// Build from config, reading `OPENAI_API_KEY` from the environment.
    pub fn new(config: &GeneratorConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &GeneratorConfig, api_key: String) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generator.model required for OpenAI provider"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model,
            api_key,
            max_retries: config.max_retries,
        })
    }

    async fn complete(&self, prompt: &str, context: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0.0,
            "messages": [
                {
                    "role": "system",
                    "content": "You answer strictly from the supplied context. \
                                If the context does not contain the answer, say so."
                },
                {
                    "role": "user",
                    "content": format!(
                        "Context:\n---------------------\n{}\n---------------------\n\n{}",
                        context, prompt
                    )
                }
            ]
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_completion(&json);
                    }

                    // Rate limited or server error, retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        tracing::warn!(%status, attempt, "generator request failed, retrying");
                        last_err = Some(anyhow::anyhow!("model API error {}: {}", status, body_text));
                        continue;
                    }

                    // Client error (not 429), fail fast
                    let body_text = response.text().await.unwrap_or_default();
                    anyhow::bail!("model API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("generation failed after retries")))
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(&self, prompt: &str, context: &str) -> dataset_search_core::Result<String> {
        self.complete(prompt, context)
            .await
            .map_err(|e| Error::Generation(format!("{:#}", e)))
    }
}

/// Extract `choices[0].message.content`.
fn parse_completion(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid completion response: missing choices[0].message.content"))
}

/// Create the configured [`Generator`].
pub fn create_generator(config: &GeneratorConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(OpenAiGenerator::new(config)?)),
        other => anyhow::bail!("Unknown generator provider: {}", other),
    }
}
