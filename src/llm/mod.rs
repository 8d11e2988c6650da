//! Language-model backends.
//!
//! A [`LanguageModel`] does two things: embed one text, and complete one chat
//! request. Backends make a single attempt per call and classify failures as
//! transient or permanent (see [`KbError::is_retryable`]); retrying is the
//! caller's job, through [`RetryPolicy`](crate::retry::RetryPolicy).
//!
//! Backends are a closed set chosen by [`create_model`]:
//! - **[`OpenAiClient`]**: `POST /v1/embeddings` and `/v1/chat/completions`.
//! - **[`OllamaClient`]**: `POST /api/embed` and `/api/chat` on a local instance.
//!
//! With `[llm.fallback]` configured the primary is wrapped in a
//! [`FallbackModel`].

pub mod ollama;
pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use summary_rag_core::models::Completion;
use summary_rag_core::{KbError, Result};
use tracing::warn;

use crate::config::{Config, FallbackConfig};

pub use ollama::OllamaClient;
pub use openai::OpenAiClient;

/// One chat completion request: a system instruction and a user turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Backend identifier for logs (`"openai"`, `"ollama"`, ...).
    fn name(&self) -> &str;

    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>>;

    async fn complete(&self, request: &ChatRequest) -> Result<Completion>;
}

/// Tries `primary`, and on any failure repeats the call on `secondary`.
///
/// The secondary may run different model names; when set, the overrides
/// replace the requested model on the secondary call.
pub struct FallbackModel {
    primary: Arc<dyn LanguageModel>,
    secondary: Arc<dyn LanguageModel>,
    secondary_embedding_model: Option<String>,
    secondary_chat_model: Option<String>,
}

impl FallbackModel {
    pub fn new(primary: Arc<dyn LanguageModel>, secondary: Arc<dyn LanguageModel>) -> Self {
        Self {
            primary,
            secondary,
            secondary_embedding_model: None,
            secondary_chat_model: None,
        }
    }

    pub fn with_models(mut self, embedding: Option<String>, chat: Option<String>) -> Self {
        self.secondary_embedding_model = embedding;
        self.secondary_chat_model = chat;
        self
    }
}

#[async_trait]
impl LanguageModel for FallbackModel {
    fn name(&self) -> &str {
        self.primary.name()
    }

    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>> {
        match self.primary.embed(text, model).await {
            Ok(vector) => Ok(vector),
            Err(e) => {
                warn!(
                    primary = self.primary.name(),
                    secondary = self.secondary.name(),
                    error = %e,
                    "embedding failed on primary, using fallback"
                );
                let model = self.secondary_embedding_model.as_deref().unwrap_or(model);
                self.secondary.embed(text, model).await
            }
        }
    }

    async fn complete(&self, request: &ChatRequest) -> Result<Completion> {
        match self.primary.complete(request).await {
            Ok(completion) => Ok(completion),
            Err(e) => {
                warn!(
                    primary = self.primary.name(),
                    secondary = self.secondary.name(),
                    error = %e,
                    "completion failed on primary, using fallback"
                );
                let mut request = request.clone();
                if let Some(model) = &self.secondary_chat_model {
                    request.model = model.clone();
                }
                self.secondary.complete(&request).await
            }
        }
    }
}

/// Build the configured backend, wrapped in a [`FallbackModel`] when a
/// fallback is configured.
///
/// # Errors
///
/// [`KbError::Configuration`] for an unknown provider, or for `openai`
/// without `OPENAI_API_KEY` in the environment.
pub fn create_model(config: &Config) -> Result<Arc<dyn LanguageModel>> {
    let timeout = std::time::Duration::from_secs(config.llm.timeout_secs);
    let primary = build_backend(&config.llm.provider, config.llm.url.as_deref(), timeout)?;

    match &config.llm.fallback {
        None => Ok(primary),
        Some(FallbackConfig {
            provider,
            url,
            chat_model,
            embedding_model,
        }) => {
            let secondary = build_backend(provider, url.as_deref(), timeout)?;
            Ok(Arc::new(
                FallbackModel::new(primary, secondary)
                    .with_models(embedding_model.clone(), chat_model.clone()),
            ))
        }
    }
}

fn build_backend(
    provider: &str,
    url: Option<&str>,
    timeout: std::time::Duration,
) -> Result<Arc<dyn LanguageModel>> {
    match provider {
        "openai" => Ok(Arc::new(OpenAiClient::from_env(url, timeout)?)),
        "ollama" => Ok(Arc::new(OllamaClient::new(url, timeout)?)),
        other => Err(KbError::Configuration(format!(
            "Unknown llm provider: '{}'. Must be openai or ollama.",
            other
        ))),
    }
}

/// Turn an HTTP status and body into a classified provider error:
/// 429 and 5xx are transient, every other status is permanent.
pub(crate) fn status_error(backend: &str, status: reqwest::StatusCode, body: &str) -> KbError {
    let message = format!("{} API error {}: {}", backend, status, body);
    if status.as_u16() == 429 || status.is_server_error() {
        KbError::transient(message)
    } else {
        KbError::permanent(message)
    }
}

/// Transport failures (connect, timeout, reset) are transient.
pub(crate) fn transport_error(backend: &str, err: reqwest::Error) -> KbError {
    KbError::transient(format!("{} request failed: {}", backend, err))
}

pub(crate) fn http_client(timeout: std::time::Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| KbError::Configuration(format!("failed to build HTTP client: {}", e)))
}

/// Read a JSON array of numbers as an `f32` vector.
pub(crate) fn parse_vector(value: &serde_json::Value, what: &str) -> Result<Vec<f32>> {
    let items = value
        .as_array()
        .ok_or_else(|| KbError::permanent(format!("Invalid response: {} is not an array", what)))?;
    items
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| KbError::permanent(format!("Invalid response: non-numeric {}", what)))
        })
        .collect()
}
