//! Ordered document storage.
//!
//! Positions are dense and zero-based; the store assigns them on append and
//! never reuses one. There is no removal.

use crate::error::{KbError, Result};
use crate::models::{Document, DocumentMetadata};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentStore {
    docs: Vec<Document>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from persisted documents, checking that positions
    /// are exactly `0..n` in order.
    pub fn from_documents(docs: Vec<Document>) -> Result<Self> {
        if let Some((expected, doc)) = docs
            .iter()
            .enumerate()
            .find(|(i, doc)| doc.position != *i)
        {
            return Err(KbError::State(format!(
                "document at slot {} carries position {}",
                expected, doc.position
            )));
        }
        Ok(Self { docs })
    }

    /// Append a document and return its position.
    pub fn append(&mut self, content: String, metadata: DocumentMetadata) -> usize {
        let position = self.docs.len();
        self.docs.push(Document {
            position,
            content,
            metadata,
        });
        position
    }

    pub fn get(&self, position: usize) -> Option<&Document> {
        self.docs.get(position)
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Document> {
        self.docs.iter()
    }

    pub fn documents(&self) -> &[Document] {
        &self.docs
    }
}
