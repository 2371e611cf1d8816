/// Text generation provider used by ai_analysis nodes
///
/// The default implementation speaks the OpenAI-compatible chat completions protocol,
/// so any provider exposing `/chat/completions` can be plugged in through config.

use crate::config::AiConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

/// A resolved generation request
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    /// Provider default when None
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Generated text and the model that produced it
#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub model: String,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation>;
}

/// Chat-completions client over reqwest
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    default_model: String,
}

impl OpenAiCompatibleGenerator {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            default_model: default_model.into(),
        }
    }

    /// Build from config; None when no API key is configured
    pub fn from_config(config: &AiConfig, client: reqwest::Client) -> Option<Self> {
        let api_key = config.api_key.as_deref().filter(|key| !key.trim().is_empty())?;
        Some(Self::new(client, &config.base_url, api_key, &config.model))
    }

    fn request_body(&self, request: &GenerationRequest) -> Value {
        let mut messages = Vec::new();
        if let Some(system_prompt) = &request.system_prompt {
            messages.push(json!({ "role": "system", "content": system_prompt }));
        }
        messages.push(json!({ "role": "user", "content": request.prompt }));

        let mut body = json!({
            "model": request.model.as_deref().unwrap_or(&self.default_model),
            "messages": messages,
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }
}

#[async_trait]
impl TextGenerator for OpenAiCompatibleGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(request);
        tracing::debug!("🤖 Sending chat completion request to {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("Text generation request failed")?;

        let status = response.status();
        let text = response
            .text()
            .await
            .context("Failed to read text generation response")?;
        if !status.is_success() {
            anyhow::bail!("Text generation provider returned {}: {}", status, text);
        }

        let payload: Value = serde_json::from_str(&text).context("Text generation response is not JSON")?;
        parse_completion(&payload, body["model"].as_str().unwrap_or(&self.default_model))
    }
}

/// Extract `choices[0].message.content` from a chat completion
fn parse_completion(payload: &Value, requested_model: &str) -> Result<Generation> {
    let text = payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("Text generation response has no message content"))?;
    let model = payload
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or(requested_model);

    Ok(Generation {
        text: text.to_string(),
        model: model.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator() -> OpenAiCompatibleGenerator {
        OpenAiCompatibleGenerator::new(reqwest::Client::new(), "https://llm.local/v1/", "key", "small-model")
    }

    #[test]
    fn builds_chat_request() {
        let body = generator().request_body(&GenerationRequest {
            prompt: "Summarize".to_string(),
            system_prompt: Some("You are a clinic assistant".to_string()),
            temperature: Some(0.5),
            ..Default::default()
        });

        assert_eq!(body["model"], json!("small-model"));
        assert_eq!(body["messages"][0]["role"], json!("system"));
        assert_eq!(body["messages"][1]["content"], json!("Summarize"));
        assert_eq!(body["temperature"], json!(0.5));
        assert!(body.get("max_tokens").is_none());
        assert_eq!(generator().base_url, "https://llm.local/v1");
    }

    #[test]
    fn parses_completion_content() {
        let payload = json!({
            "model": "small-model-2024",
            "choices": [{ "message": { "role": "assistant", "content": "All good" } }]
        });
        let generation = parse_completion(&payload, "small-model").unwrap();
        assert_eq!(generation.text, "All good");
        assert_eq!(generation.model, "small-model-2024");

        assert!(parse_completion(&json!({ "choices": [] }), "m").is_err());
    }

    #[test]
    fn requires_api_key() {
        let mut config = AiConfig {
            base_url: "https://llm.local/v1".to_string(),
            api_key: None,
            model: "m".to_string(),
        };
        assert!(OpenAiCompatibleGenerator::from_config(&config, reqwest::Client::new()).is_none());

        config.api_key = Some("secret".to_string());
        assert!(OpenAiCompatibleGenerator::from_config(&config, reqwest::Client::new()).is_some());
    }
}
