//! Ollama HTTP backend. Requires a running instance with the models pulled
//! (e.g. `ollama pull nomic-embed-text`).

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use summary_rag_core::models::{Completion, TokenUsage};
use summary_rag_core::{KbError, Result};
use tracing::debug;

use super::{http_client, parse_vector, status_error, ChatRequest, LanguageModel};

pub const OLLAMA_URL: &str = "http://localhost:11434";

pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: Option<&str>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url
                .unwrap_or(OLLAMA_URL)
                .trim_end_matches('/')
                .to_string(),
        })
    }

    async fn post(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                KbError::transient(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.base_url, e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(status_error("Ollama", status, &body_text));
        }

        response
            .json()
            .await
            .map_err(|e| KbError::permanent(format!("Invalid Ollama response body: {}", e)))
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>> {
        debug!(model, chars = text.len(), "ollama embed");
        let json = self
            .post("/api/embed", &json!({ "model": model, "input": text }))
            .await?;
        let embedding = json
            .get("embeddings")
            .and_then(|e| e.as_array())
            .and_then(|e| e.first())
            .ok_or_else(|| KbError::permanent("Invalid Ollama response: missing embeddings array"))?;
        parse_vector(embedding, "embedding")
    }

    async fn complete(&self, request: &ChatRequest) -> Result<Completion> {
        debug!(model = %request.model, "ollama chat");
        let body = json!({
            "model": request.model,
            "stream": false,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            },
        });
        let json = self.post("/api/chat", &body).await?;
        parse_chat_response(&json)
    }
}

/// Extract `message.content`; usage comes from `prompt_eval_count` and
/// `eval_count` when both are reported.
fn parse_chat_response(json: &serde_json::Value) -> Result<Completion> {
    let text = json
        .pointer("/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| KbError::permanent("Invalid Ollama response: missing message.content"))?;

    let prompt = json.get("prompt_eval_count").and_then(|v| v.as_u64());
    let completion = json.get("eval_count").and_then(|v| v.as_u64());
    let usage = match (prompt, completion) {
        (Some(prompt_tokens), Some(completion_tokens)) => Some(TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }),
        _ => None,
    };

    Ok(Completion {
        text: text.to_string(),
        usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_usage_from_eval_counts() {
        let json = json!({
            "message": { "role": "assistant", "content": "Hello" },
            "done": true,
            "prompt_eval_count": 20,
            "eval_count": 5
        });
        let completion = parse_chat_response(&json).unwrap();
        assert_eq!(completion.text, "Hello");
        assert_eq!(completion.usage.map(|u| u.total_tokens), Some(25));
    }

    #[test]
    fn chat_missing_content_is_permanent() {
        let err = parse_chat_response(&json!({ "done": true })).unwrap_err();
        assert!(!err.is_retryable());
    }
}
