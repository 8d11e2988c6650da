//! The knowledge base: ingestion of a summaries directory and question
//! answering over it.
//!
//! # Initialization
//!
//! ```text
//! discover *.md ──► manifest matches run.json? ──yes──► load vectors + documents
//!                          │ no
//!                          ▼
//!        batches of N ──► strip metadata line + markdown ──► embed (cache first)
//!                          │
//!                          ▼
//!        VectorIndex + DocumentStore (built aside) ──► persist ──► swap in, Ready
//! ```
//!
//! A failure anywhere leaves the previously published index untouched and
//! moves the phase to [`Phase::Failed`]; calling `initialize` again retries.
//! A missing directory or an empty one is reported without any state change.
//!
//! # Querying
//!
//! Optional term expansion, one embedding of the query plus its expansions,
//! k-nearest search, category and metadata filtering, budgeted context
//! assembly, and one chat completion. Any remote failure is logged and the
//! query yields `None`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use summary_rag_core::context::{assemble_context, TokenCounter};
use summary_rag_core::index::VectorIndex;
use summary_rag_core::models::{Document, DocumentMetadata, QueryAnswer, QueryUsage, TokenUsage};
use summary_rag_core::preprocess::strip_markdown;
use summary_rag_core::query::{parse_query, QueryFilter};
use summary_rag_core::store::DocumentStore;
use summary_rag_core::{KbError, Result};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::cache::{CacheLimit, EmbeddingCache};
use crate::config::Config;
use crate::llm::LanguageModel;
use crate::progress::{InitProgressEvent, NoProgress, ProgressReporter};
use crate::prompts::{answer_request, expansion_request, parse_expansions, search_text};
use crate::provider::{EmbeddingProvider, ProviderStats};
use crate::retry::RetryPolicy;
use crate::state::{ManifestEntry, RunMetadata, StateDir};
use crate::summaries::{discover_summaries, SummaryFile};
use crate::tokens::Tokenizer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Uninitialized => "uninitialized",
            Phase::Initializing => "initializing",
            Phase::Ready => "ready",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of a successful [`KnowledgeBase::initialize`].
#[derive(Debug, Clone, PartialEq)]
pub struct InitReport {
    pub documents: usize,
    pub batches: usize,
    /// True when saved state matched and nothing was embedded.
    pub loaded_from_state: bool,
    pub state_dir: PathBuf,
    pub provider: ProviderStats,
}

/// Index and documents published together; readers take an `Arc` snapshot.
#[derive(Debug, Default)]
struct Corpus {
    index: Option<VectorIndex>,
    store: DocumentStore,
}

impl Corpus {
    fn len(&self) -> usize {
        self.store.len()
    }
}

struct Published {
    phase: Phase,
    corpus: Arc<Corpus>,
    root: Option<PathBuf>,
}

pub struct KnowledgeBase {
    config: Config,
    model: Arc<dyn LanguageModel>,
    provider: EmbeddingProvider,
    tokenizer: Arc<Tokenizer>,
    retry: RetryPolicy,
    progress: Box<dyn ProgressReporter>,
    state: RwLock<Published>,
}

impl KnowledgeBase {
    pub fn new(config: Config, model: Arc<dyn LanguageModel>) -> Self {
        let tokenizer = Arc::new(Tokenizer::new());
        let provider = EmbeddingProvider::new(model.clone(), &config, tokenizer.clone());
        Self {
            retry: RetryPolicy::from_config(&config.llm),
            config,
            model,
            provider,
            tokenizer,
            progress: Box::new(NoProgress),
            state: RwLock::new(Published {
                phase: Phase::Uninitialized,
                corpus: Arc::new(Corpus::default()),
                root: None,
            }),
        }
    }

    pub fn with_progress(mut self, progress: Box<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn chat_model(&self) -> &str {
        &self.config.llm.chat_model
    }

    pub async fn phase(&self) -> Phase {
        self.state.read().await.phase
    }

    /// Number of documents currently queryable.
    pub async fn size(&self) -> usize {
        self.state.read().await.corpus.len()
    }

    pub async fn root(&self) -> Option<PathBuf> {
        self.state.read().await.root.clone()
    }

    pub fn provider_stats(&self) -> ProviderStats {
        self.provider.stats()
    }

    /// Build (or load) the knowledge base for `root` and publish it.
    ///
    /// # Errors
    ///
    /// - [`KbError::DirectoryNotFound`] / [`KbError::NoSummariesFound`]:
    ///   nothing to ingest; the phase and published data are unchanged.
    /// - [`KbError::State`] when another initialization is in progress.
    /// - Anything else aborts the run and sets [`Phase::Failed`].
    pub async fn initialize(&self, root: &Path) -> Result<InitReport> {
        let previous = {
            let mut state = self.state.write().await;
            if state.phase == Phase::Initializing {
                return Err(KbError::State(
                    "initialization already in progress".to_string(),
                ));
            }
            let previous = state.phase;
            state.phase = Phase::Initializing;
            previous
        };
        info!(root = %root.display(), "initializing knowledge base");

        let outcome = self.build(root).await;

        let mut state = self.state.write().await;
        match outcome {
            Ok((corpus, report)) => {
                state.corpus = Arc::new(corpus);
                state.root = Some(root.to_path_buf());
                state.phase = Phase::Ready;
                info!(
                    documents = report.documents,
                    batches = report.batches,
                    loaded_from_state = report.loaded_from_state,
                    "knowledge base ready"
                );
                Ok(report)
            }
            Err(e @ (KbError::DirectoryNotFound(_) | KbError::NoSummariesFound(_))) => {
                state.phase = previous;
                warn!(error = %e, "nothing to initialize");
                Err(e)
            }
            Err(e) => {
                state.phase = Phase::Failed;
                warn!(error = %e, "initialization failed");
                Err(e)
            }
        }
    }

    async fn build(&self, root: &Path) -> Result<(Corpus, InitReport)> {
        let state_dir = StateDir::new(self.config.ingest.state_dir_for(root));
        self.progress.report(InitProgressEvent::Discovering {
            root: root.display().to_string(),
        });

        let files = discover_summaries(root, &self.config.ingest, state_dir.path())?;
        if files.is_empty() {
            return Err(KbError::NoSummariesFound(root.to_path_buf()));
        }
        let manifest: Vec<ManifestEntry> = files.iter().map(ManifestEntry::from).collect();

        if let Some((corpus, batches)) = self.load_saved(&state_dir, &manifest) {
            self.progress.report(InitProgressEvent::Loaded {
                documents: corpus.len() as u64,
            });
            let report = InitReport {
                documents: corpus.len(),
                batches,
                loaded_from_state: true,
                state_dir: state_dir.path().to_path_buf(),
                provider: self.provider.stats(),
            };
            return Ok((corpus, report));
        }

        let cache = EmbeddingCache::open(
            state_dir.cache_dir(),
            CacheLimit::from_config(&self.config.cache),
        )?;
        let (index, store, batches) = self.embed_files(&files, &cache).await?;

        let run = RunMetadata {
            created_at: Utc::now(),
            chat_model: self.config.llm.chat_model.clone(),
            embedding_model: self.provider.embedding_model().to_string(),
            dims: self.provider.dims(),
            file_count: store.len(),
            batch_count: batches,
            manifest,
        };
        state_dir.save(&index, &store, &run)?;

        let report = InitReport {
            documents: store.len(),
            batches,
            loaded_from_state: false,
            state_dir: state_dir.path().to_path_buf(),
            provider: self.provider.stats(),
        };
        Ok((
            Corpus {
                index: Some(index),
                store,
            },
            report,
        ))
    }

    /// Saved state, when it was built from exactly these files with the
    /// current embedding model. Unusable state is logged and ignored.
    fn load_saved(&self, state_dir: &StateDir, manifest: &[ManifestEntry]) -> Option<(Corpus, usize)> {
        let run = match state_dir.read_run() {
            Ok(Some(run)) => run,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "unreadable run metadata, rebuilding");
                return None;
            }
        };
        if !run.matches(manifest, self.provider.embedding_model(), self.provider.dims()) {
            info!("summaries or embedding model changed since last run, rebuilding");
            return None;
        }
        match state_dir.load(&run) {
            Ok((index, store)) => Some((
                Corpus {
                    index: Some(index),
                    store,
                },
                run.batch_count,
            )),
            Err(e) => {
                warn!(error = %e, "saved state unusable, rebuilding");
                None
            }
        }
    }

    async fn embed_files(
        &self,
        files: &[SummaryFile],
        cache: &EmbeddingCache,
    ) -> Result<(VectorIndex, DocumentStore, usize)> {
        let batch_size = self.config.ingest.batch_size.max(1);
        let batches = files.len().div_ceil(batch_size);
        let mut index = VectorIndex::new(self.provider.dims());
        let mut store = DocumentStore::new();

        for (n, batch) in files.chunks(batch_size).enumerate() {
            let parts: Vec<(String, DocumentMetadata)> =
                batch.iter().map(SummaryFile::to_document_parts).collect();
            let texts: Vec<String> = parts
                .iter()
                .map(|(content, metadata)| embedding_text(content, metadata))
                .collect();

            let vectors = self.provider.embed_with_cache(&texts, cache).await?;
            index.add(&vectors)?;
            for (content, metadata) in parts {
                store.append(content, metadata);
            }
            debug!(batch = n + 1, batches, documents = store.len(), "batch embedded");

            self.progress.report(InitProgressEvent::Embedding {
                batch: (n + 1) as u64,
                batches: batches as u64,
                files_done: store.len() as u64,
                total: files.len() as u64,
            });
        }

        if index.len() != store.len() {
            return Err(KbError::State(format!(
                "index holds {} vectors for {} documents",
                index.len(),
                store.len()
            )));
        }
        Ok((index, store, batches))
    }

    /// Answer a raw query written in the filter mini-language
    /// (`@category: ...`, `#key:value`).
    pub async fn query_text(&self, raw: &str) -> Option<QueryAnswer> {
        let parsed = parse_query(raw);
        self.query(&parsed.text, &parsed.filter).await
    }

    /// Answer `text` from the documents that pass `filter`.
    ///
    /// `None` when the knowledge base is not ready or empty, when nothing
    /// relevant survives filtering, or when a remote call fails.
    pub async fn query(&self, text: &str, filter: &QueryFilter) -> Option<QueryAnswer> {
        let corpus = {
            let state = self.state.read().await;
            if state.phase != Phase::Ready {
                warn!(phase = %state.phase, "query on a knowledge base that is not ready");
                return None;
            }
            state.corpus.clone()
        };
        let index = corpus.index.as_ref()?;
        if corpus.store.is_empty() {
            debug!("query on an empty knowledge base");
            return None;
        }

        let question = text.trim();
        if question.is_empty() {
            warn!("empty query text");
            return None;
        }

        let expansions = if self.config.retrieval.expand_queries {
            self.expand(question).await
        } else {
            Vec::new()
        };

        let search = strip_markdown(&search_text(question, &expansions));
        let vector = match self.provider.embed_one(&search).await {
            Ok(vector) => vector,
            Err(e) => {
                warn!(error = %e, "failed to embed query");
                return None;
            }
        };

        let k = self.config.retrieval.top_k.min(corpus.store.len());
        let hits = match index.search(&vector, k) {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "vector search failed");
                return None;
            }
        };

        let docs: Vec<&Document> = hits
            .iter()
            .filter_map(|hit| corpus.store.get(hit.position))
            .filter(|doc| filter.matches_category(&doc.metadata))
            .filter(|doc| filter.matches_metadata(&doc.metadata))
            .collect();
        if docs.is_empty() {
            debug!(hits = hits.len(), "no results after filtering");
            return None;
        }

        let context = assemble_context(
            &docs,
            self.config.retrieval.max_context_tokens,
            self.tokenizer.as_ref(),
        );
        if context.truncated {
            debug!(
                included = context.included.len(),
                results = docs.len(),
                "context cut to token budget"
            );
        }

        let request = answer_request(&self.config.llm, self.chat_model(), &context.text, question);
        let completion = match self
            .retry
            .run("completion", || self.model.complete(&request))
            .await
        {
            Ok(completion) => completion,
            Err(e) => {
                warn!(error = %e, "answer generation failed");
                return None;
            }
        };

        let usage = completion.usage.unwrap_or_else(|| {
            let prompt_tokens =
                (self.tokenizer.count(&request.system) + self.tokenizer.count(&request.user)) as u64;
            let completion_tokens = self.tokenizer.count(&completion.text) as u64;
            TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            }
        });

        let sources = context
            .included
            .iter()
            .filter_map(|position| corpus.store.get(*position))
            .map(|doc| doc.metadata.source_path.clone())
            .collect();

        Some(QueryAnswer {
            answer: completion.text,
            usage: QueryUsage {
                model: request.model,
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
                expanded_search: !expansions.is_empty(),
                num_expansions: expansions.len(),
                num_results: docs.len(),
                sources,
            },
        })
    }

    /// Alternative phrasings of `question`. Best effort: any failure gives
    /// no expansions.
    async fn expand(&self, question: &str) -> Vec<String> {
        let request = expansion_request(&self.config.llm, question);
        match self.model.complete(&request).await {
            Ok(completion) => {
                let expansions = parse_expansions(&completion.text, question);
                debug!(count = expansions.len(), "query expanded");
                expansions
            }
            Err(e) => {
                warn!(error = %e, "query expansion failed, searching without it");
                Vec::new()
            }
        }
    }

    /// Drop the published index and documents and return to
    /// [`Phase::Uninitialized`]. Saved state and the cache stay on disk.
    ///
    /// # Errors
    ///
    /// [`KbError::State`] while an initialization is in progress.
    pub async fn cleanup(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if state.phase == Phase::Initializing {
            return Err(KbError::State(
                "cannot clear during initialization".to_string(),
            ));
        }
        state.corpus = Arc::new(Corpus::default());
        state.root = None;
        state.phase = Phase::Uninitialized;
        info!("knowledge base cleared");
        Ok(())
    }
}

/// Text submitted for a document's embedding: the markdown-stripped
/// content, or the source path when nothing is left of it.
fn embedding_text(content: &str, metadata: &DocumentMetadata) -> String {
    let text = strip_markdown(content);
    if text.is_empty() {
        metadata.source_path.clone()
    } else {
        text
    }
}
