//! # Summary RAG
//!
//! Question answering over a directory of generated code summaries.
//!
//! Summary files are embedded once (with a persistent, bounded embedding
//! cache), held in a flat vector index, and searched per question. The
//! best matches become the grounding context for a chat completion.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌──────────────┐
//! │ summaries/  │──▶│ EmbeddingProvider │──▶│ VectorIndex  │
//! │  **/*.md    │   │  retry + cache    │   │ DocumentStore│
//! └─────────────┘   └──────────────────┘   └──────┬───────┘
//!                                                 │
//!                       query ──► expand ──► embed ──► search ──► filter
//!                                                 │
//!                                                 ▼
//!                                   context ──► chat completion
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export OPENAI_API_KEY=...
//! srag init ./summaries/summary_2024-03-05_09-30-00
//! srag query ./summaries/summary_2024-03-05_09-30-00 "@services: how are retries configured?"
//! srag chat                     # pick a model and a summary run interactively
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`llm`] | OpenAI / Ollama clients and fallback |
//! | [`retry`] | Bounded retry with per-call timeout |
//! | [`tokens`] | `cl100k_base` token counting |
//! | [`cache`] | Persistent embedding cache |
//! | [`provider`] | Batched, cached embedding |
//! | [`summaries`] | Summary discovery |
//! | [`state`] | Saved index, documents and run metadata |
//! | [`knowledge_base`] | Initialization and querying |
//! | [`session`] | Interactive session state |
//!
//! Pure data structures (vector index, document store, query language,
//! context assembly) live in the `summary-rag-core` crate.

pub mod cache;
pub mod config;
pub mod knowledge_base;
pub mod llm;
pub mod progress;
pub mod prompts;
pub mod provider;
pub mod retry;
pub mod session;
pub mod state;
pub mod summaries;
pub mod tokens;

pub use knowledge_base::{InitReport, KnowledgeBase, Phase};
pub use summary_rag_core::{KbError, Result};
