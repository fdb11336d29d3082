//! # Prompt Assembly
//!
//! Builds the text handed to the analysis agent from the project state:
//! global metadata, the stage input, earlier stage outputs, answered
//! clarifications, reference URLs and any scraped page content.

use regex::Regex;
use serde::{Serialize, Serializer};
use std::sync::OnceLock;

use crate::error::DiscoveryError;
use crate::stages::DiscoveryStage;
use crate::state::metadata::{MetadataField, ProjectMetadata};
use crate::state::project::ProjectState;

/// Reasoning preamble prepended to the system instruction in thinking mode
pub const THINKING_PREAMBLE: &str =
    "You are an expert Strategic Product Analyst. Step through your reasoning in <thought> tags first.";

const ASSET_DIRECTIVE: &str = "CRITICAL: If any visual assets (images or videos) or website URLs are provided, analyze them deeply.
Extract UI components, user interactions, process flows, or product features visible in the assets
and integrate these insights into the current discovery stage output.
Use the Stage-Specific Reference URLs provided to gather deep technical or business context.";

const SCRAPE_SEPARATOR: &str = "\n\n----------------\n\n";

static THOUGHT_BLOCK: OnceLock<Regex> = OnceLock::new();

/// `GLOBAL PROJECT CONTEXT` block listing every metadata field
pub fn metadata_context(metadata: &ProjectMetadata) -> String {
    let mut out = String::from("GLOBAL PROJECT CONTEXT:\n");
    for field in MetadataField::ALL {
        out.push_str(&format!("- {}: {}\n", field.label(), metadata.get(field)));
    }
    out
}

/// System instruction, wrapped with the reasoning preamble when thinking
pub fn system_instruction(instruction: &str, thinking: bool) -> String {
    if thinking {
        format!("{}\n\n{}", THINKING_PREAMBLE, instruction)
    } else {
        instruction.to_string()
    }
}

/// Question to answer map, serialized in question order
struct AnsweredQuestions<'a>(Vec<(&'a str, &'a str)>);

impl Serialize for AnsweredQuestions<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().copied())
    }
}

/// Assemble the user prompt for analyzing `stage`.
///
/// `scraped` holds one entry per reference URL, already fetched (or replaced
/// by a failure placeholder).
pub fn build_user_prompt(state: &ProjectState, stage: DiscoveryStage, scraped: &[String]) -> String {
    let data = state.stage(stage);

    let history = stage
        .previous_stages()
        .iter()
        .map(|s| format!("[{} ANALYSIS]:\n{}", s, state.stage(*s).output))
        .collect::<Vec<_>>()
        .join("\n\n");

    let answered = AnsweredQuestions(data.answered_questions());
    let answered_json = serde_json::to_string(&answered).unwrap_or_else(|_| "{}".to_string());

    let mut prompt = format!(
        "{}\nCURRENT STAGE INPUT: {}\nSTAGE HISTORY: {}\nUSER RESPONSES TO CLARIFICATIONS: {}\n\nSTAGE-SPECIFIC REFERENCE URLS:\n{}\n\n{}",
        metadata_context(&state.project_metadata),
        data.input,
        history,
        answered_json,
        data.urls.join("\n"),
        ASSET_DIRECTIVE,
    );

    if let Some(reference) = &data.format_reference {
        prompt.push_str(&format!(
            "\n\nSTRICT FORMATTING: Follow the structure of [REF: {}] exactly. Match its tables and section hierarchy.",
            reference.name
        ));
    }

    if !scraped.is_empty() {
        prompt.push_str(&format!(
            "\n\n=== SCRAPED WEB CONTENT ===\n{}\n===========================",
            scraped.join(SCRAPE_SEPARATOR)
        ));
    }

    prompt
}

/// Earlier stage outputs (with their answered refinements) formatted for
/// prepending to the current stage input.
pub fn import_history(state: &ProjectState, stage: DiscoveryStage) -> Result<String, DiscoveryError> {
    let previous = stage.previous_stages();
    if previous.is_empty() {
        return Err(DiscoveryError::NothingToImport("already on the first stage"));
    }

    let sections: Vec<String> = previous
        .iter()
        .filter_map(|s| state.stage_ref(*s).map(|data| (*s, data)))
        .filter(|(_, data)| !data.output.is_empty())
        .map(|(s, data)| {
            let refinements = data
                .answered_questions()
                .into_iter()
                .map(|(q, a)| format!("USER RESPONSE: {} -> {}", q, a))
                .collect::<Vec<_>>()
                .join("\n");

            if refinements.is_empty() {
                format!("--- {} ANALYSIS ---\n{}", s, data.output)
            } else {
                format!(
                    "--- {} ANALYSIS ---\n{}\n\n--- {} REFINEMENTS ---\n{}",
                    s, data.output, s, refinements
                )
            }
        })
        .collect();

    if sections.is_empty() {
        return Err(DiscoveryError::NothingToImport(
            "complete a previous stage first",
        ));
    }

    Ok(sections.join("\n\n"))
}

/// Remove `<thought>…</thought>` blocks (any case) and trim the result
pub fn strip_thoughts(text: &str) -> String {
    let pattern = THOUGHT_BLOCK
        .get_or_init(|| Regex::new(r"(?is)<thought>.*?</thought>").unwrap());
    pattern.replace_all(text, "").trim().to_string()
}
