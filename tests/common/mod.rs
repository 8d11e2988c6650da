//! Shared fixtures: a deterministic in-process language model and summary
//! directories on disk.

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use summary_rag::config::Config;
use summary_rag::llm::{ChatRequest, LanguageModel};
use summary_rag::prompts::EXPANSION_SYSTEM_PROMPT;
use summary_rag_core::models::{Completion, TokenUsage};
use summary_rag_core::{KbError, Result};
use tokio::sync::Semaphore;

pub const DIMS: usize = 16;

// ─── Stub model ─────────────────────────────────────────────────────

/// Hashed bag-of-words embeddings and canned completions, with call
/// counters and failure switches. A gated model holds every embedding
/// call until the gate has a permit for it.
#[derive(Default)]
pub struct StubModel {
    pub embed_calls: AtomicUsize,
    pub expansion_calls: AtomicUsize,
    pub answer_calls: AtomicUsize,
    pub fail_embed: AtomicBool,
    pub fail_expansion: AtomicBool,
    pub fail_answer: AtomicBool,
    pub report_usage: AtomicBool,
    pub last_answer_prompt: Mutex<Option<String>>,
    pub gate: Option<Arc<Semaphore>>,
}

impl StubModel {
    pub fn new() -> Self {
        let model = Self::default();
        model.report_usage.store(true, Ordering::SeqCst);
        model
    }

    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new()
        }
    }

    pub fn embeds(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    pub fn answers(&self) -> usize {
        self.answer_calls.load(Ordering::SeqCst)
    }

    pub fn expansions(&self) -> usize {
        self.expansion_calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> String {
        self.last_answer_prompt
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_default()
    }
}

pub fn embed_words(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let mut h: u32 = 2166136261;
        for b in word.to_lowercase().bytes() {
            h ^= b as u32;
            h = h.wrapping_mul(16777619);
        }
        v[(h as usize) % DIMS] += 1.0;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

#[async_trait]
impl LanguageModel for StubModel {
    fn name(&self) -> &str {
        "stub"
    }

    async fn embed(&self, text: &str, _model: &str) -> Result<Vec<f32>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|_| KbError::permanent("embedding gate closed"))?;
        }
        if self.fail_embed.load(Ordering::SeqCst) {
            return Err(KbError::permanent("embedding rejected"));
        }
        Ok(embed_words(text))
    }

    async fn complete(&self, request: &ChatRequest) -> Result<Completion> {
        if request.system == EXPANSION_SYSTEM_PROMPT {
            self.expansion_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_expansion.load(Ordering::SeqCst) {
                return Err(KbError::permanent("expansion rejected"));
            }
            return Ok(Completion {
                text: format!("1. {} implementation\n2. {} details", request.user, request.user),
                usage: None,
            });
        }

        self.answer_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_answer_prompt.lock().unwrap() = Some(request.user.clone());
        if self.fail_answer.load(Ordering::SeqCst) {
            return Err(KbError::permanent("completion rejected"));
        }
        let usage = self.report_usage.load(Ordering::SeqCst).then_some(TokenUsage {
            prompt_tokens: 120,
            completion_tokens: 30,
            total_tokens: 150,
        });
        Ok(Completion {
            text: "Answer grounded in the provided summaries.".to_string(),
            usage,
        })
    }
}

// ─── Fixtures ───────────────────────────────────────────────────────

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.llm.dims = DIMS;
    config.llm.retry_delay_ms = 1;
    config.llm.max_retries = 2;
    config.ingest.batch_size = 2;
    config.retrieval.top_k = 10;
    config
}

pub fn write_summary(root: &Path, name: &str, source: &str, body: &str) {
    let path = root.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, format!("Source: {}\n\n## Summary\n{}\n", source, body)).unwrap();
}

/// Three summaries with distinct content: `a.md`, `b.md`, `c.md`.
pub fn write_abc(root: &Path) {
    write_summary(
        root,
        "a.md",
        "src/components/Button.tsx",
        "Renders a clickable button widget with primary and secondary variants.",
    );
    write_summary(
        root,
        "b.md",
        "src/utils/strings.py",
        "String helpers for slug generation and whitespace trimming.",
    );
    write_summary(
        root,
        "c.md",
        "src/services/payments.py",
        "Payment service client that retries charges against the billing API.",
    );
}
