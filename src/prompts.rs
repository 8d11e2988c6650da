//! Prompts for answer generation and query expansion.

use crate::config::LlmConfig;
use crate::llm::ChatRequest;

pub const ANSWER_SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions about code based on file summaries.
Use the provided context to answer questions accurately and concisely.
If you're not sure about something, say so.
Always reference the specific files you're drawing information from.
Format your response in markdown for better readability.";

pub const EXPANSION_SYSTEM_PROMPT: &str = "You rewrite search queries for a semantic search over source-code summaries.
Reply with 2 or 3 alternative phrasings of the user's query, one per line, using terms a code summary would likely contain.
Reply with the phrasings only: no numbering, no commentary.";

pub const MAX_EXPANSIONS: usize = 3;

pub fn answer_user_prompt(context: &str, question: &str) -> String {
    format!(
        "Context from codebase summaries:\n{}\n\nQuestion: {}",
        context, question
    )
}

pub fn answer_request(llm: &LlmConfig, model: &str, context: &str, question: &str) -> ChatRequest {
    ChatRequest {
        model: model.to_string(),
        system: ANSWER_SYSTEM_PROMPT.to_string(),
        user: answer_user_prompt(context, question),
        temperature: llm.temperature,
        max_tokens: llm.max_answer_tokens,
    }
}

pub fn expansion_request(llm: &LlmConfig, question: &str) -> ChatRequest {
    ChatRequest {
        model: llm.expansion_model().to_string(),
        system: EXPANSION_SYSTEM_PROMPT.to_string(),
        user: question.to_string(),
        temperature: 0.3,
        max_tokens: 150,
    }
}

/// Pull up to [`MAX_EXPANSIONS`] phrasings out of a model reply.
///
/// List markers (`-`, `*`, `1.`, `2)`) and surrounding quotes are removed;
/// blank lines and lines repeating the original query are skipped.
pub fn parse_expansions(reply: &str, original: &str) -> Vec<String> {
    let original = original.trim().to_lowercase();
    let mut out: Vec<String> = Vec::new();
    for line in reply.lines() {
        let phrase = strip_list_marker(line.trim())
            .trim()
            .trim_matches(|c: char| c == '"' || c == '\'')
            .trim();
        if phrase.is_empty() || phrase.to_lowercase() == original {
            continue;
        }
        if out.iter().any(|p| p.eq_ignore_ascii_case(phrase)) {
            continue;
        }
        out.push(phrase.to_string());
        if out.len() == MAX_EXPANSIONS {
            break;
        }
    }
    out
}

fn strip_list_marker(line: &str) -> &str {
    if let Some(rest) = line
        .strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .or_else(|| line.strip_prefix("• "))
    {
        return rest;
    }
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return rest;
        }
    }
    line
}

/// The text embedded for retrieval: the query followed by its expansions.
pub fn search_text(query: &str, expansions: &[String]) -> String {
    let mut parts = Vec::with_capacity(expansions.len() + 1);
    parts.push(query);
    parts.extend(expansions.iter().map(String::as_str));
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_prompt_layout() {
        assert_eq!(
            answer_user_prompt("File: a.py\nParses.", "What parses?"),
            "Context from codebase summaries:\nFile: a.py\nParses.\n\nQuestion: What parses?"
        );
    }

    #[test]
    fn expansions_strip_markers_and_cap() {
        let reply = "1. login flow implementation\n2) session token handling\n\n- \"user credential validation\"\n* password hashing";
        assert_eq!(
            parse_expansions(reply, "how does auth work"),
            vec![
                "login flow implementation",
                "session token handling",
                "user credential validation"
            ]
        );
    }

    #[test]
    fn expansions_skip_original_and_duplicates() {
        let reply = "How does auth work\nauth flow\nAuth Flow";
        assert_eq!(parse_expansions(reply, "how does auth work"), vec!["auth flow"]);
        assert!(parse_expansions("", "q").is_empty());
    }

    #[test]
    fn search_text_joins_lines() {
        assert_eq!(search_text("q", &[]), "q");
        assert_eq!(search_text("q", &["a".into(), "b".into()]), "q\na\nb");
    }

    #[test]
    fn requests_carry_config() {
        let llm = LlmConfig::default();
        let req = answer_request(&llm, "gpt-4", "ctx", "q");
        assert_eq!(req.model, "gpt-4");
        assert_eq!(req.max_tokens, 800);
        assert_eq!(req.system, ANSWER_SYSTEM_PROMPT);
        assert_eq!(expansion_request(&llm, "q").model, "gpt-3.5-turbo");
    }
}
