//! OpenAI HTTP backend.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use summary_rag_core::models::{Completion, TokenUsage};
use summary_rag_core::{KbError, Result};
use tracing::debug;

use super::{http_client, parse_vector, status_error, transport_error, ChatRequest, LanguageModel};

pub const OPENAI_API_URL: &str = "https://api.openai.com";
pub const API_KEY_VAR: &str = "OPENAI_API_KEY";

pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(base_url: &str, api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    /// Build a client with the key from `OPENAI_API_KEY`.
    ///
    /// # Errors
    ///
    /// [`KbError::Configuration`] when the variable is unset or empty.
    pub fn from_env(base_url: Option<&str>, timeout: Duration) -> Result<Self> {
        let api_key = std::env::var(API_KEY_VAR)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                KbError::Configuration(format!("{} environment variable not set", API_KEY_VAR))
            })?;
        Self::new(base_url.unwrap_or(OPENAI_API_URL), api_key, timeout)
    }

    async fn post(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error("OpenAI", e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(status_error("OpenAI", status, &body_text));
        }

        response
            .json()
            .await
            .map_err(|e| KbError::permanent(format!("Invalid OpenAI response body: {}", e)))
    }
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>> {
        debug!(model, chars = text.len(), "openai embed");
        let json = self
            .post("/v1/embeddings", &json!({ "model": model, "input": text }))
            .await?;
        parse_embedding_response(&json)
    }

    async fn complete(&self, request: &ChatRequest) -> Result<Completion> {
        debug!(model = %request.model, "openai chat completion");
        let body = json!({
            "model": request.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        let json = self.post("/v1/chat/completions", &body).await?;
        parse_chat_response(&json)
    }
}

/// Extract `data[0].embedding`.
fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let embedding = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|item| item.get("embedding"))
        .ok_or_else(|| KbError::permanent("Invalid OpenAI response: missing data[0].embedding"))?;
    parse_vector(embedding, "embedding")
}

/// Extract `choices[0].message.content` and `usage`.
fn parse_chat_response(json: &serde_json::Value) -> Result<Completion> {
    let text = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|choice| choice.pointer("/message/content"))
        .and_then(|content| content.as_str())
        .ok_or_else(|| {
            KbError::permanent("Invalid OpenAI response: missing choices[0].message.content")
        })?;

    let usage = json
        .get("usage")
        .and_then(|u| serde_json::from_value::<TokenUsage>(u.clone()).ok());

    Ok(Completion {
        text: text.to_string(),
        usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_embedding() {
        let json = json!({ "data": [{ "index": 0, "embedding": [0.5, -1.0, 2.0] }] });
        assert_eq!(parse_embedding_response(&json).unwrap(), vec![0.5, -1.0, 2.0]);
    }

    #[test]
    fn malformed_embedding_is_permanent() {
        let err = parse_embedding_response(&json!({ "data": [] })).unwrap_err();
        assert!(!err.is_retryable());
        let err = parse_embedding_response(&json!({ "data": [{ "embedding": ["x"] }] })).unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn parses_chat_with_usage() {
        let json = json!({
            "choices": [{ "message": { "role": "assistant", "content": "It parses." } }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15 }
        });
        let completion = parse_chat_response(&json).unwrap();
        assert_eq!(completion.text, "It parses.");
        assert_eq!(
            completion.usage,
            Some(TokenUsage {
                prompt_tokens: 12,
                completion_tokens: 3,
                total_tokens: 15
            })
        );
    }

    #[test]
    fn chat_without_usage() {
        let json = json!({ "choices": [{ "message": { "content": "ok" } }] });
        assert_eq!(parse_chat_response(&json).unwrap().usage, None);
    }
}
