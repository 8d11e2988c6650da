//! Interactive session state: the selected model, input commands and
//! running usage totals.

use summary_rag_core::models::QueryAnswer;

/// The chat models offered at startup, keyed by what the user types.
/// The empty key is the default.
pub const MODEL_MENU: &[(&str, &str, &str)] = &[
    ("", "gpt-3.5-turbo", "GPT-3.5 Turbo (default, fastest)"),
    ("1", "gpt-4", "GPT-4 (most capable)"),
    ("2", "gpt-4-turbo-preview", "GPT-4 Turbo (large context)"),
    ("3", "gpt-3.5-turbo", "GPT-3.5 Turbo"),
];

/// Resolve a menu choice to a model id.
pub fn model_for_choice(choice: &str) -> Option<&'static str> {
    let choice = choice.trim();
    MODEL_MENU
        .iter()
        .find(|(key, _, _)| *key == choice)
        .map(|(_, model, _)| *model)
}

/// One line typed at the chat prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatInput<'a> {
    Empty,
    Help,
    Quit,
    Question(&'a str),
}

impl<'a> ChatInput<'a> {
    /// Commands match case-insensitively; anything else is a question.
    pub fn parse(line: &'a str) -> Self {
        let line = line.trim();
        match line.to_ascii_lowercase().as_str() {
            "" => ChatInput::Empty,
            "help" => ChatInput::Help,
            "quit" | "exit" | "q" => ChatInput::Quit,
            _ => ChatInput::Question(line),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub model: String,
    pub queries: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub model: String,
    pub queries: u64,
    pub total_tokens: u64,
    pub average_tokens: f64,
}

impl Session {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    /// Count a submitted question. Unanswered ones add no tokens.
    pub fn record(&mut self, answer: Option<&QueryAnswer>) {
        self.queries += 1;
        if let Some(answer) = answer {
            self.total_tokens += answer.usage.total_tokens;
        }
    }

    pub fn summary(&self) -> SessionSummary {
        let average_tokens = if self.queries == 0 {
            0.0
        } else {
            self.total_tokens as f64 / self.queries as f64
        };
        SessionSummary {
            model: self.model.clone(),
            queries: self.queries,
            total_tokens: self.total_tokens,
            average_tokens,
        }
    }
}
