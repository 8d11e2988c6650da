//! Core data models that flow through ingestion and retrieval.
//!
//! A [`Document`] is one summary file; its `position` doubles as the row of
//! its vector in the [`VectorIndex`](crate::index::VectorIndex).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a summary came from and how it is classified for filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Path of the original source file the summary describes. Falls back to
    /// the summary's own relative path when the file carries no metadata line.
    pub source_path: String,
    /// Extension of `source_path` including the dot (e.g. `".py"`), or empty.
    pub file_type: String,
    /// Parent directory of `source_path`.
    pub directory: String,
    /// Modification time of the summary file.
    pub created_at: DateTime<Utc>,
    /// Path of the summary file relative to the summaries root.
    pub summary_path: String,
}

impl DocumentMetadata {
    /// Look up a metadata field by name, as used by `#key:value` filters.
    ///
    /// `source_file` is accepted as an alias of `source_path`.
    pub fn field(&self, key: &str) -> Option<String> {
        match key {
            "source_path" | "source_file" => Some(self.source_path.clone()),
            "file_type" => Some(self.file_type.clone()),
            "directory" => Some(self.directory.clone()),
            "created_at" => Some(self.created_at.to_rfc3339()),
            "summary_path" => Some(self.summary_path.clone()),
            _ => None,
        }
    }
}

/// One ingested summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub position: usize,
    pub content: String,
    pub metadata: DocumentMetadata,
}

/// Token accounting reported by a chat completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Text returned by a chat completion. `usage` is absent when the backend
/// does not report it.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

/// Statistics attached to an answered query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryUsage {
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub expanded_search: bool,
    pub num_expansions: usize,
    pub num_results: usize,
    pub sources: Vec<String>,
}

/// A successful query: the model's answer and how it was produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryAnswer {
    pub answer: String,
    pub usage: QueryUsage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn metadata() -> DocumentMetadata {
        DocumentMetadata {
            source_path: "src/utils/strings.py".to_string(),
            file_type: ".py".to_string(),
            directory: "src/utils".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            summary_path: "utils/strings.py.md".to_string(),
        }
    }

    #[test]
    fn field_lookup_covers_known_keys() {
        let m = metadata();
        assert_eq!(m.field("file_type").as_deref(), Some(".py"));
        assert_eq!(m.field("directory").as_deref(), Some("src/utils"));
        assert_eq!(m.field("source_file"), m.field("source_path"));
        assert_eq!(
            m.field("created_at").as_deref(),
            Some("2024-01-02T03:04:05+00:00")
        );
        assert_eq!(m.field("author"), None);
    }
}
