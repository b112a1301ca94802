//! Generation provider abstraction and the OpenAI chat implementation.
//!
//! Every need that requires generated text — document summaries, relevance
//! compression, guardrail classification, final answers — goes through one
//! blocking [`Generator::complete`] call. Generation calls are not retried:
//! a failure surfaces directly to the interaction that issued it, leaving
//! session memory and the index cache untouched.

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::GenerationConfig;

/// Trait for text generation providers. One self-contained prompt/response
/// pair per call; no streaming.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Chat-completion client for the OpenAI API.
pub struct OpenAiChat {
    model: String,
    temperature: f64,
    timeout_secs: u64,
    api_key: String,
}

impl OpenAiChat {
    /// Create a client from configuration using the answer model.
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        Self::with_model(config, &config.answer_model)
    }

    /// Create a client for the cheaper utility model (summaries,
    /// compression, guardrail classification).
    pub fn utility(config: &GenerationConfig) -> Result<Self> {
        let mut client = Self::with_model(config, &config.utility_model)?;
        client.temperature = 0.0;
        Ok(client)
    }

    fn with_model(config: &GenerationConfig, model: &str) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        Ok(Self {
            model: model.to_string(),
            temperature: config.temperature,
            timeout_secs: config.timeout_secs,
            api_key,
        })
    }
}

#[async_trait]
impl Generator for OpenAiChat {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()?;

        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [{"role": "user", "content": prompt}],
        });

        let response = client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("OpenAI API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_chat_response(&json)
    }
}

/// Extract `choices[0].message.content` from a chat-completion response.
fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing message content"))
}
