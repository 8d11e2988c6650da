//! Query mini-language and result filters.
//!
//! A raw query may carry filter tokens in front of or among the words that
//! are actually embedded:
//!
//! ```text
//! @components: which widgets render forms?      category filter
//! #file_type:.py how are retries configured      metadata filter
//! @utils #directory:src/utils error handling     both
//! ```
//!
//! The category token must lead the query; `#key:value` tokens may appear
//! anywhere. Both are removed from the semantic text.

use std::collections::BTreeMap;

use crate::models::DocumentMetadata;

/// Fixed category → directory keyword table. A category matches a document
/// when any keyword is a case-insensitive substring of its directory.
pub const CATEGORIES: &[(&str, &[&str])] = &[
    ("components", &["components", "component", "widgets", "views"]),
    ("utils", &["utils", "util", "helpers", "helper", "common"]),
    ("services", &["services", "service", "api", "clients"]),
    ("models", &["models", "model", "schemas", "entities", "types"]),
    ("hooks", &["hooks"]),
    ("pages", &["pages", "routes", "screens"]),
    ("config", &["config", "settings"]),
    ("tests", &["tests", "test", "__tests__", "spec"]),
    ("styles", &["styles", "css", "themes"]),
];

/// Keywords for `category`. A name not in [`CATEGORIES`] matches on itself.
pub fn category_keywords(category: &str) -> Vec<String> {
    let wanted = category.to_lowercase();
    CATEGORIES
        .iter()
        .find(|(name, _)| *name == wanted)
        .map(|(_, keywords)| keywords.iter().map(|k| k.to_string()).collect())
        .unwrap_or_else(|| vec![wanted])
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilter {
    pub category: Option<String>,
    pub metadata_filters: BTreeMap<String, String>,
}

impl QueryFilter {
    pub fn is_empty(&self) -> bool {
        self.category.is_none() && self.metadata_filters.is_empty()
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata_filters.insert(key.into(), value.into());
        self
    }

    pub fn matches_category(&self, metadata: &DocumentMetadata) -> bool {
        let Some(category) = &self.category else {
            return true;
        };
        let directory = metadata.directory.to_lowercase();
        category_keywords(category)
            .iter()
            .any(|keyword| directory.contains(keyword.as_str()))
    }

    /// Every filter key must be present with exactly the given value.
    pub fn matches_metadata(&self, metadata: &DocumentMetadata) -> bool {
        self.metadata_filters
            .iter()
            .all(|(key, value)| metadata.field(key).as_deref() == Some(value.as_str()))
    }

    pub fn matches(&self, metadata: &DocumentMetadata) -> bool {
        self.matches_category(metadata) && self.matches_metadata(metadata)
    }
}

/// A raw query split into its semantic text and its filters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedQuery {
    pub text: String,
    pub filter: QueryFilter,
}

pub fn parse_query(input: &str) -> ParsedQuery {
    let mut rest = input.trim();
    let mut filter = QueryFilter::default();

    if let Some(stripped) = rest.strip_prefix('@') {
        let end = stripped
            .find(|c: char| !is_word_char(c))
            .unwrap_or(stripped.len());
        let (name, after) = stripped.split_at(end);
        let terminated = after.is_empty()
            || after.starts_with(':')
            || after.starts_with(char::is_whitespace);
        if !name.is_empty() && terminated {
            filter.category = Some(name.to_lowercase());
            rest = after.strip_prefix(':').unwrap_or(after);
        }
    }

    let mut words = Vec::new();
    for token in rest.split_whitespace() {
        match parse_filter_token(token) {
            Some((key, value)) => {
                filter.metadata_filters.insert(key, value);
            }
            None => words.push(token),
        }
    }

    ParsedQuery {
        text: words.join(" "),
        filter,
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn parse_filter_token(token: &str) -> Option<(String, String)> {
    let body = token.strip_prefix('#')?;
    let (key, value) = body.split_once(':')?;
    if key.is_empty() || value.is_empty() || !key.chars().all(is_word_char) {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}
