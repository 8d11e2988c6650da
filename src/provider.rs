//! Text → vector with token limits, retry, bounded concurrency and caching.
//!
//! Batches run on a bounded pool (`buffer_unordered`) and are reassembled
//! by input index, so output order always matches input order no matter
//! which call finishes first. The first failed item fails the whole batch;
//! in-flight siblings are dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use summary_rag_core::context::TokenCounter;
use summary_rag_core::{KbError, Result};
use tracing::{debug, warn};

use crate::cache::EmbeddingCache;
use crate::config::Config;
use crate::llm::LanguageModel;
use crate::retry::RetryPolicy;
use crate::tokens::Tokenizer;

/// Counters accumulated over the provider's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderStats {
    /// Remote embedding calls that succeeded.
    pub calls: u64,
    /// Tokens submitted in those calls.
    pub tokens_used: u64,
    /// Inputs cut to the token limit.
    pub truncated_inputs: u64,
    pub cache_hits: u64,
}

pub struct EmbeddingProvider {
    model: Arc<dyn LanguageModel>,
    embedding_model: String,
    dims: usize,
    max_input_tokens: usize,
    workers: usize,
    retry: RetryPolicy,
    tokenizer: Arc<Tokenizer>,
    calls: AtomicU64,
    tokens_used: AtomicU64,
    truncated_inputs: AtomicU64,
    cache_hits: AtomicU64,
}

impl EmbeddingProvider {
    pub fn new(model: Arc<dyn LanguageModel>, config: &Config, tokenizer: Arc<Tokenizer>) -> Self {
        Self {
            model,
            embedding_model: config.llm.embedding_model.clone(),
            dims: config.llm.dims,
            max_input_tokens: config.llm.max_input_tokens,
            workers: config.ingest.workers.max(1),
            retry: RetryPolicy::from_config(&config.llm),
            tokenizer,
            calls: AtomicU64::new(0),
            tokens_used: AtomicU64::new(0),
            truncated_inputs: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
        }
    }

    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn stats(&self) -> ProviderStats {
        ProviderStats {
            calls: self.calls.load(Ordering::Relaxed),
            tokens_used: self.tokens_used.load(Ordering::Relaxed),
            truncated_inputs: self.truncated_inputs.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
        }
    }

    /// Embed one text: truncate to the input limit, call with retry, and
    /// check the dimension of what comes back.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut tokens = self.tokenizer.count(text);
        let truncated;
        let input = if tokens > self.max_input_tokens {
            truncated = self.tokenizer.truncate(text, self.max_input_tokens);
            self.truncated_inputs.fetch_add(1, Ordering::Relaxed);
            debug!(
                tokens,
                limit = self.max_input_tokens,
                "truncating embedding input"
            );
            tokens = self.tokenizer.count(&truncated);
            truncated.as_str()
        } else {
            text
        };

        let vector = self
            .retry
            .run("embedding", || self.model.embed(input, &self.embedding_model))
            .await?;

        if vector.len() != self.dims {
            return Err(KbError::Dimension {
                expected: self.dims,
                actual: vector.len(),
            });
        }

        self.calls.fetch_add(1, Ordering::Relaxed);
        self.tokens_used.fetch_add(tokens as u64, Ordering::Relaxed);
        Ok(vector)
    }

    /// Embed every text, one output per input in input order.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed_all(texts, None).await
    }

    /// Like [`embed`](Self::embed), but answers from `cache` where possible
    /// and stores fresh vectors in it.
    pub async fn embed_with_cache(
        &self,
        texts: &[String],
        cache: &EmbeddingCache,
    ) -> Result<Vec<Vec<f32>>> {
        self.embed_all(texts, Some(cache)).await
    }

    async fn embed_all(
        &self,
        texts: &[String],
        cache: Option<&EmbeddingCache>,
    ) -> Result<Vec<Vec<f32>>> {
        let mut slots: Vec<Option<Vec<f32>>> = vec![None; texts.len()];

        let mut results = stream::iter(texts.iter().enumerate())
            .map(|(i, text)| async move {
                self.embed_cached(text, cache)
                    .await
                    .map(|vector| (i, vector))
            })
            .buffer_unordered(self.workers);

        while let Some(result) = results.next().await {
            let (i, vector) = result?;
            slots[i] = Some(vector);
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.ok_or_else(|| KbError::State(format!("embedding for input {} missing", i)))
            })
            .collect()
    }

    async fn embed_cached(&self, text: &str, cache: Option<&EmbeddingCache>) -> Result<Vec<f32>> {
        let Some(cache) = cache else {
            return self.embed_one(text).await;
        };

        if let Some(vector) = cache.get(text, &self.embedding_model) {
            if vector.len() == self.dims {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(vector);
            }
            debug!(
                cached = vector.len(),
                expected = self.dims,
                "ignoring cached vector of the wrong dimension"
            );
        }

        let vector = self.embed_one(text).await?;
        if let Err(e) = cache.put(text, &self.embedding_model, &vector) {
            warn!(error = %e, "failed to cache embedding");
        }
        Ok(vector)
    }
}
