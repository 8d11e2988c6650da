//! `cl100k_base` token counting and truncation.

use summary_rag_core::context::TokenCounter;
use tiktoken_rs::CoreBPE;
use tracing::warn;

/// BPE tokenizer matching the OpenAI embedding and chat models. If the
/// encoder tables fail to load, counts fall back to a ~4 chars per token
/// estimate.
pub struct Tokenizer {
    bpe: Option<CoreBPE>,
}

impl Tokenizer {
    pub fn new() -> Self {
        match tiktoken_rs::cl100k_base() {
            Ok(bpe) => Self { bpe: Some(bpe) },
            Err(e) => {
                warn!(error = %e, "cl100k_base unavailable, estimating token counts");
                Self { bpe: None }
            }
        }
    }

    pub fn is_exact(&self) -> bool {
        self.bpe.is_some()
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCounter for Tokenizer {
    fn count(&self, text: &str) -> usize {
        match &self.bpe {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            None => text.len().div_ceil(4),
        }
    }

    fn truncate(&self, text: &str, max_tokens: usize) -> String {
        let Some(bpe) = &self.bpe else {
            return truncate_chars(text, max_tokens.saturating_mul(4));
        };

        let tokens = bpe.encode_with_special_tokens(text);
        if tokens.len() <= max_tokens {
            return text.to_string();
        }

        // A cut can split a multi-byte character across tokens; back off
        // until the prefix decodes.
        let mut end = max_tokens;
        while end > 0 {
            if let Ok(prefix) = bpe.decode(tokens[..end].to_vec()) {
                return prefix;
            }
            end -= 1;
        }
        String::new()
    }
}

fn truncate_chars(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
