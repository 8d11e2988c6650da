//! # Summary RAG Core
//!
//! Pure, I/O-free logic for the summary knowledge base: the error taxonomy,
//! document models, vector helpers, the flat [`index::VectorIndex`], the
//! positional [`store::DocumentStore`], the query mini-language and filters,
//! markdown preprocessing, and grounding-context assembly.
//!
//! Network clients, the embedding cache, persistence and orchestration live
//! in the `summary-rag` crate.

pub mod context;
pub mod embedding;
pub mod error;
pub mod index;
pub mod models;
pub mod preprocess;
pub mod query;
pub mod store;

pub use error::{KbError, Result};
