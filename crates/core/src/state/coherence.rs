//! # Coherence Score
//!
//! Heuristic 0–99 completeness indicator shown next to each generated
//! document. It measures how much context the agent was given, not the
//! quality of what came back.

use super::metadata::ProjectMetadata;
use super::project::ProjectState;
use crate::stages::DiscoveryStage;

const BASE_SCORE: f64 = 40.0;
const METADATA_WEIGHT: f64 = 30.0;
const INPUT_WEIGHT: f64 = 15.0;
const INPUT_SATURATION_CHARS: f64 = 500.0;
const TOGGLE_WEIGHT: f64 = 7.5;
const CONSISTENCY_WEIGHT: f64 = 10.0;
const MAX_SCORE: u8 = 99;

/// Intelligence toggles that feed the score
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnalysisToggles {
    pub thinking: bool,
    pub search: bool,
}

/// Score a stage given the current project state and toggles
pub fn coherence_score(state: &ProjectState, stage: DiscoveryStage, toggles: AnalysisToggles) -> u8 {
    let mut score = BASE_SCORE;

    score += metadata_points(&state.project_metadata);

    let input_len = state
        .stage_ref(stage)
        .map(|s| s.input.chars().count())
        .unwrap_or(0) as f64;
    score += (input_len / INPUT_SATURATION_CHARS * INPUT_WEIGHT).min(INPUT_WEIGHT);

    if toggles.thinking {
        score += TOGGLE_WEIGHT;
    }
    if toggles.search {
        score += TOGGLE_WEIGHT;
    }

    let previous = stage.previous_stages();
    if previous.is_empty() {
        score += CONSISTENCY_WEIGHT;
    } else {
        let completed = previous
            .iter()
            .filter(|s| state.stage_ref(**s).is_some_and(|d| d.is_completed()))
            .count();
        score += completed as f64 / previous.len() as f64 * CONSISTENCY_WEIGHT;
    }

    (score.round() as u8).min(MAX_SCORE)
}

fn metadata_points(metadata: &ProjectMetadata) -> f64 {
    if metadata.is_complete() {
        METADATA_WEIGHT
    } else {
        metadata.filled_count() as f64 / 8.0 * METADATA_WEIGHT
    }
}
