//! Clarification-question extraction from generated documents.
//!
//! Relies on the model emitting a heading containing
//! `CLARIFICATION QUESTIONS` followed by a numbered list. Outputs that use a
//! different heading yield no questions.

use regex::Regex;
use std::sync::OnceLock;

const QUESTIONS_HEADER: &str = "CLARIFICATION QUESTIONS";

static ITEM_PATTERN: OnceLock<Regex> = OnceLock::new();
static TRAILING_STARS: OnceLock<Regex> = OnceLock::new();

fn item_pattern() -> &'static Regex {
    ITEM_PATTERN.get_or_init(|| Regex::new(r"^[\*]*\d+[\.\)][\s\*]*").unwrap())
}

fn trailing_stars() -> &'static Regex {
    TRAILING_STARS.get_or_init(|| Regex::new(r"[\*]+$").unwrap())
}

/// Whether a line is the clarification-questions heading
pub fn is_questions_header(line: &str) -> bool {
    line.to_uppercase().contains(QUESTIONS_HEADER)
}

/// Extract the numbered clarification questions from a generated document.
///
/// Capture starts after the header line. Blank lines inside the block are
/// skipped; the first non-blank line that is not a numbered item ends it.
pub fn parse_questions(text: &str) -> Vec<String> {
    let mut questions = Vec::new();
    let mut capturing = false;

    for line in text.lines() {
        let trimmed = line.trim();

        if is_questions_header(trimmed) {
            capturing = true;
            continue;
        }
        if !capturing || trimmed.is_empty() {
            continue;
        }

        if !item_pattern().is_match(trimmed) {
            break;
        }

        let without_marker = item_pattern().replace(trimmed, "");
        let cleaned = trailing_stars().replace(&without_marker, "");
        let cleaned = cleaned.trim();
        if !cleaned.is_empty() {
            questions.push(cleaned.to_string());
        }
    }

    questions
}
