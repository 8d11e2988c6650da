//! Persisted knowledge-base state.
//!
//! ```text
//! <state_dir>/
//!   vectors.bin      VectorIndex bytes
//!   documents.json   Vec<Document>
//!   run.json         RunMetadata
//!   cache/           EmbeddingCache
//! ```
//!
//! `run.json` is written last, so its presence marks a complete save.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use summary_rag_core::index::VectorIndex;
use summary_rag_core::models::Document;
use summary_rag_core::store::DocumentStore;
use summary_rag_core::{KbError, Result};
use tracing::debug;

use crate::cache::write_atomic;
use crate::summaries::SummaryFile;

const VECTORS_FILE: &str = "vectors.bin";
const DOCUMENTS_FILE: &str = "documents.json";
const RUN_FILE: &str = "run.json";
const CACHE_DIR: &str = "cache";

/// Identity of one ingested summary file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub relative_path: String,
    pub size: u64,
    pub sha256: String,
}

impl From<&SummaryFile> for ManifestEntry {
    fn from(file: &SummaryFile) -> Self {
        Self {
            relative_path: file.relative_path.clone(),
            size: file.size,
            sha256: file.digest.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub created_at: DateTime<Utc>,
    pub chat_model: String,
    pub embedding_model: String,
    pub dims: usize,
    pub file_count: usize,
    pub batch_count: usize,
    pub manifest: Vec<ManifestEntry>,
}

impl RunMetadata {
    /// True when this run was built from exactly `manifest` with the same
    /// embedding model and dimension.
    pub fn matches(&self, manifest: &[ManifestEntry], embedding_model: &str, dims: usize) -> bool {
        self.embedding_model == embedding_model && self.dims == dims && self.manifest == manifest
    }
}

pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join(CACHE_DIR)
    }

    pub fn read_run(&self) -> Result<Option<RunMetadata>> {
        match std::fs::read_to_string(self.root.join(RUN_FILE)) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Load the saved index and documents, checking they still line up.
    pub fn load(&self, run: &RunMetadata) -> Result<(VectorIndex, DocumentStore)> {
        let bytes = std::fs::read(self.root.join(VECTORS_FILE))?;
        let index = VectorIndex::from_bytes(&bytes)?;

        let content = std::fs::read_to_string(self.root.join(DOCUMENTS_FILE))?;
        let docs: Vec<Document> = serde_json::from_str(&content)?;
        let store = DocumentStore::from_documents(docs)?;

        if index.dims() != run.dims {
            return Err(KbError::Dimension {
                expected: run.dims,
                actual: index.dims(),
            });
        }
        if index.len() != store.len() || store.len() != run.file_count {
            return Err(KbError::State(format!(
                "saved state is inconsistent: {} vectors, {} documents, {} files in run",
                index.len(),
                store.len(),
                run.file_count
            )));
        }
        debug!(path = %self.root.display(), documents = store.len(), "loaded saved state");
        Ok((index, store))
    }

    pub fn save(&self, index: &VectorIndex, store: &DocumentStore, run: &RunMetadata) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        // run.json is the commit marker: drop it before rewriting the rest.
        remove_if_exists(&self.root.join(RUN_FILE))?;

        write_atomic(&self.root.join(VECTORS_FILE), &index.to_bytes())?;
        write_atomic(
            &self.root.join(DOCUMENTS_FILE),
            &serde_json::to_vec(store.documents())?,
        )?;
        write_atomic(&self.root.join(RUN_FILE), &serde_json::to_vec_pretty(run)?)?;
        debug!(path = %self.root.display(), documents = store.len(), "saved state");
        Ok(())
    }

    /// Remove the saved index, documents and run metadata. The cache is
    /// left alone.
    pub fn clear(&self) -> Result<()> {
        for name in [RUN_FILE, VECTORS_FILE, DOCUMENTS_FILE] {
            remove_if_exists(&self.root.join(name))?;
        }
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
