//! Text preparation shared by ingestion and querying.
//!
//! Summaries and queries must go through the same [`strip_markdown`] pass
//! before embedding, otherwise the two sides of a similarity comparison are
//! drawn from different distributions.

use pulldown_cmark::{Event, Parser, TagEnd};

/// Labels recognized at the start of a metadata line, compared
/// case-insensitively: `Source: src/app.py`, ``Original file: `lib/x.rs` ``.
pub const METADATA_LABELS: &[&str] = &["source", "original file", "file", "path"];

/// Heading that introduces the prose part of a generated summary.
pub const SUMMARY_HEADING: &str = "## Summary";

/// Parse a single `<label>: <path>` line.
pub fn parse_metadata_line(line: &str) -> Option<String> {
    let (label, value) = line.trim().split_once(':')?;
    let label = label.trim().to_lowercase();
    if !METADATA_LABELS.contains(&label.as_str()) {
        return None;
    }
    let value = value.trim().trim_matches(|c: char| c == '`' || c == '"' || c == '\'');
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Remove the leading metadata line from a summary, if there is one.
///
/// The line is looked for on the first non-empty line, or on the line after
/// a leading `# ` title. Returns the original-file path it named and the
/// remaining content; content without a metadata line comes back unchanged.
pub fn split_metadata_line(content: &str) -> (Option<String>, String) {
    let lines: Vec<&str> = content.lines().collect();
    let mut non_empty = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty());

    let Some((first_idx, first)) = non_empty.next() else {
        return (None, content.to_string());
    };

    let found = match parse_metadata_line(first) {
        Some(path) => Some((first_idx, path)),
        None if first.trim_start().starts_with("# ") => non_empty
            .next()
            .and_then(|(idx, line)| parse_metadata_line(line).map(|path| (idx, path))),
        None => None,
    };

    match found {
        Some((idx, path)) => {
            let body: Vec<&str> = lines
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != idx)
                .map(|(_, line)| *line)
                .collect();
            (Some(path), body.join("\n").trim().to_string())
        }
        None => (None, content.to_string()),
    }
}

/// Reduce markdown to plain words: headers, emphasis markers, link and
/// image syntax, and raw HTML are dropped, whitespace is collapsed.
pub fn strip_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for event in Parser::new(text) {
        match event {
            Event::Text(t) | Event::Code(t) => out.push_str(&t),
            Event::SoftBreak | Event::HardBreak | Event::Rule => out.push(' '),
            Event::End(
                TagEnd::Paragraph | TagEnd::Heading(_) | TagEnd::Item | TagEnd::CodeBlock,
            ) => out.push(' '),
            _ => {}
        }
    }
    normalize_whitespace(&out)
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The part of a summary from its `## Summary` heading onward, or the
/// whole text when there is no such heading.
pub fn summary_section(content: &str) -> &str {
    let mut offset = 0;
    for line in content.split_inclusive('\n') {
        if line.trim_end().starts_with(SUMMARY_HEADING) {
            return &content[offset..];
        }
        offset += line.len();
    }
    content
}
