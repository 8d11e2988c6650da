//! Grounding-context assembly.
//!
//! Retrieved documents are rendered as `File: <source path>` followed by
//! their summary section and joined with [`CONTEXT_DELIMITER`], in rank
//! order, until the token budget is spent. A document that does not fit
//! ends the context; only the first document is ever cut mid-way, so the
//! model always sees at least one source.

use crate::models::Document;
use crate::preprocess::summary_section;

pub const CONTEXT_DELIMITER: &str = "\n---\n";

/// Token accounting used for budgeting. The application plugs in a BPE
/// tokenizer; [`WordCounter`] is a whitespace approximation.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
    /// The longest prefix of `text` that is at most `max_tokens` long.
    fn truncate(&self, text: &str, max_tokens: usize) -> String;
}

/// Counts whitespace-separated words.
pub struct WordCounter;

impl TokenCounter for WordCounter {
    fn count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }

    fn truncate(&self, text: &str, max_tokens: usize) -> String {
        text.split_whitespace()
            .take(max_tokens)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssembledContext {
    pub text: String,
    /// Positions of the documents that made it into `text`.
    pub included: Vec<usize>,
    /// Set when a document was cut or dropped for budget.
    pub truncated: bool,
}

pub fn format_entry(doc: &Document) -> String {
    format!(
        "File: {}\n{}",
        doc.metadata.source_path,
        summary_section(&doc.content).trim()
    )
}

/// Join `docs` into one context block. `max_tokens = None` means unlimited.
pub fn assemble_context(
    docs: &[&Document],
    max_tokens: Option<usize>,
    counter: &dyn TokenCounter,
) -> AssembledContext {
    let mut ctx = AssembledContext::default();
    let mut used = 0usize;
    let delimiter_cost = counter.count(CONTEXT_DELIMITER);

    for doc in docs {
        let entry = format_entry(doc);
        let Some(budget) = max_tokens else {
            push_entry(&mut ctx, doc.position, &entry);
            continue;
        };

        let separator = if ctx.included.is_empty() {
            0
        } else {
            delimiter_cost
        };
        let cost = counter.count(&entry);

        if used + separator + cost <= budget {
            used += separator + cost;
            push_entry(&mut ctx, doc.position, &entry);
        } else {
            if ctx.included.is_empty() && budget > 0 {
                let cut = counter.truncate(&entry, budget);
                push_entry(&mut ctx, doc.position, &cut);
            }
            ctx.truncated = true;
            break;
        }
    }
    ctx
}

fn push_entry(ctx: &mut AssembledContext, position: usize, entry: &str) {
    if !ctx.text.is_empty() {
        ctx.text.push_str(CONTEXT_DELIMITER);
    }
    ctx.text.push_str(entry);
    ctx.included.push(position);
}
