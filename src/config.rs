//! TOML configuration.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working OpenAI setup. Credentials are never read from the file; the
//! OpenAI client takes its key from `OPENAI_API_KEY`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_CHAT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";
pub const DEFAULT_DIMS: usize = 1536;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Base URL of the provider API. Defaults per provider when absent.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    /// Model used for query term expansion. Defaults to `chat_model`.
    #[serde(default)]
    pub expansion_model: Option<String>,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_answer_tokens")]
    pub max_answer_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: usize,
    #[serde(default)]
    pub fallback: Option<FallbackConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            url: None,
            chat_model: default_chat_model(),
            expansion_model: None,
            embedding_model: default_embedding_model(),
            dims: default_dims(),
            temperature: default_temperature(),
            max_answer_tokens: default_max_answer_tokens(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            max_input_tokens: default_max_input_tokens(),
            fallback: None,
        }
    }
}

impl LlmConfig {
    pub fn expansion_model(&self) -> &str {
        self.expansion_model.as_deref().unwrap_or(&self.chat_model)
    }
}

/// Secondary provider consulted when the primary fails.
#[derive(Debug, Deserialize, Clone)]
pub struct FallbackConfig {
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    /// Chat model on the secondary. Defaults to the primary's.
    #[serde(default)]
    pub chat_model: Option<String>,
    /// Embedding model on the secondary; must produce `llm.dims` dimensions.
    #[serde(default)]
    pub embedding_model: Option<String>,
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_chat_model() -> String {
    DEFAULT_CHAT_MODEL.to_string()
}
fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}
fn default_dims() -> usize {
    DEFAULT_DIMS
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_answer_tokens() -> u32 {
    800
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1000
}
fn default_max_input_tokens() -> usize {
    8191
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Summary file extensions, without the dot.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Where state is persisted. Relative paths are resolved against the
    /// summaries root; `None` means `<root>/.kb_state`.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            batch_size: default_batch_size(),
            workers: default_workers(),
            state_dir: None,
        }
    }
}

pub const DEFAULT_STATE_DIR: &str = ".kb_state";

impl IngestConfig {
    pub fn state_dir_for(&self, root: &Path) -> PathBuf {
        match &self.state_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => root.join(dir),
            None => root.join(DEFAULT_STATE_DIR),
        }
    }
}

fn default_extensions() -> Vec<String> {
    vec!["md".to_string()]
}
fn default_batch_size() -> usize {
    10
}
fn default_workers() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Aggregate blob budget. Takes precedence over `max_entries` when set.
    #[serde(default)]
    pub max_bytes: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            max_bytes: None,
        }
    }
}

fn default_max_entries() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Token budget for the grounding context. `None` means unlimited.
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: Option<usize>,
    #[serde(default = "default_expand_queries")]
    pub expand_queries: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_context_tokens: default_max_context_tokens(),
            expand_queries: default_expand_queries(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_max_context_tokens() -> Option<usize> {
    Some(6000)
}
fn default_expand_queries() -> bool {
    true
}

const PROVIDERS: &[&str] = &["openai", "ollama"];

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Load `path` when it exists, otherwise fall back to defaults.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        Ok(Config::default())
    }
}

pub fn validate(config: &Config) -> Result<()> {
    if !PROVIDERS.contains(&config.llm.provider.as_str()) {
        anyhow::bail!(
            "Unknown llm provider: '{}'. Must be openai or ollama.",
            config.llm.provider
        );
    }
    if let Some(fallback) = &config.llm.fallback {
        if !PROVIDERS.contains(&fallback.provider.as_str()) {
            anyhow::bail!(
                "Unknown llm.fallback provider: '{}'. Must be openai or ollama.",
                fallback.provider
            );
        }
    }

    if config.llm.dims == 0 {
        anyhow::bail!("llm.dims must be > 0");
    }
    if config.llm.max_retries == 0 {
        anyhow::bail!("llm.max_retries must be >= 1");
    }
    if config.llm.max_input_tokens == 0 {
        anyhow::bail!("llm.max_input_tokens must be > 0");
    }
    if !(0.0..=2.0).contains(&config.llm.temperature) {
        anyhow::bail!("llm.temperature must be in [0.0, 2.0]");
    }

    if config.ingest.batch_size == 0 {
        anyhow::bail!("ingest.batch_size must be > 0");
    }
    if config.ingest.workers == 0 {
        anyhow::bail!("ingest.workers must be > 0");
    }
    if config.ingest.extensions.is_empty() {
        anyhow::bail!("ingest.extensions must not be empty");
    }

    if config.cache.max_entries == 0 {
        anyhow::bail!("cache.max_entries must be > 0");
    }
    if let Some(max_bytes) = config.cache.max_bytes {
        let vector_bytes = (config.llm.dims as u64).saturating_mul(4);
        if max_bytes < vector_bytes {
            anyhow::bail!(
                "cache.max_bytes must hold at least one vector ({} bytes for {} dims)",
                vector_bytes,
                config.llm.dims
            );
        }
    }

    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.max_context_tokens == Some(0) {
        anyhow::bail!("retrieval.max_context_tokens must be > 0 when set");
    }

    Ok(())
}
