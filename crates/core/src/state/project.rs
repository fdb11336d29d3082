//! # Project State
//!
//! The nested shape shared by the client store, the HTTP API and the
//! repository: project metadata, the current stage, and per-stage
//! input/output/history.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::metadata::ProjectMetadata;
use crate::stages::DiscoveryStage;

/// Client-side cap on retained versions per stage
pub const MAX_CLIENT_VERSIONS: usize = 10;

/// Lifecycle of a stage's generated document
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    Analyzing,
    Completed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Analyzing => "analyzing",
            Self::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "analyzing" => Self::Analyzing,
            "completed" => Self::Completed,
            _ => Self::Pending,
        }
    }
}

/// A context file attached to a stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileContext {
    pub name: String,
    /// Raw text, or base64 for binary media
    pub content: String,
    pub mime_type: String,
    pub size: u64,
}

/// A web citation collected during research grounding
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroundingSource {
    pub title: String,
    pub uri: String,
}

/// Immutable snapshot of a completed stage output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StageVersion {
    pub id: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub output: String,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub questions: Vec<String>,
    #[serde(default)]
    pub coherence_score: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_entry_point_html: Option<String>,
}

/// Everything held for one stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct StageData {
    pub input: String,
    pub output: String,
    pub files: Vec<FileContext>,
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format_reference: Option<FileContext>,
    pub status: StageStatus,
    pub questions: Vec<String>,
    /// Answers keyed by question index
    pub answers: BTreeMap<usize, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grounding_sources: Option<Vec<GroundingSource>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_entry_point_html: Option<String>,
    pub coherence_score: u8,
    /// Newest first
    pub versions: Vec<StageVersion>,
}

impl StageData {
    /// Answered clarifications as (question, answer) pairs, skipping blanks
    pub fn answered_questions(&self) -> Vec<(&str, &str)> {
        self.answers
            .iter()
            .filter(|(_, answer)| !answer.trim().is_empty())
            .filter_map(|(idx, answer)| {
                self.questions
                    .get(*idx)
                    .map(|q| (q.as_str(), answer.as_str()))
            })
            .collect()
    }

    pub fn is_completed(&self) -> bool {
        self.status == StageStatus::Completed
    }
}

/// The whole discovery project
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectState {
    #[serde(default)]
    pub current_stage: DiscoveryStage,
    #[serde(default)]
    pub project_metadata: ProjectMetadata,
    #[serde(default)]
    pub stages: BTreeMap<DiscoveryStage, StageData>,
}

impl Default for ProjectState {
    fn default() -> Self {
        Self {
            current_stage: DiscoveryStage::Domain,
            project_metadata: ProjectMetadata::default(),
            stages: DiscoveryStage::ALL
                .iter()
                .map(|stage| (*stage, StageData::default()))
                .collect(),
        }
    }
}

impl ProjectState {
    /// Stage data, or the zero value when the stage is absent
    pub fn stage(&self, stage: DiscoveryStage) -> StageData {
        self.stages.get(&stage).cloned().unwrap_or_default()
    }

    /// Borrow stage data if present
    pub fn stage_ref(&self, stage: DiscoveryStage) -> Option<&StageData> {
        self.stages.get(&stage)
    }

    pub fn current(&self) -> StageData {
        self.stage(self.current_stage)
    }

    pub fn is_metadata_complete(&self) -> bool {
        self.project_metadata.is_complete()
    }

    /// Copy with one stage replaced by the result of `f`
    pub fn with_stage(&self, stage: DiscoveryStage, f: impl FnOnce(&mut StageData)) -> Self {
        let mut next = self.clone();
        let data = next.stages.entry(stage).or_default();
        f(data);
        next
    }

    /// Merge a loaded state over the defaults and repair anything an
    /// interrupted session may have left behind.
    pub fn normalized(mut self) -> Self {
        for stage in DiscoveryStage::ALL {
            let data = self.stages.entry(stage).or_default();
            if data.status == StageStatus::Analyzing {
                data.status = if data.output.is_empty() {
                    StageStatus::Pending
                } else {
                    StageStatus::Completed
                };
            }
            data.versions.truncate(MAX_CLIENT_VERSIONS);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_has_all_stages() {
        let state = ProjectState::default();
        assert_eq!(state.stages.len(), 4);
        assert_eq!(state.current_stage, DiscoveryStage::Domain);
    }

    #[test]
    fn test_wire_shape() {
        let state = ProjectState::default().with_stage(DiscoveryStage::Bod, |s| {
            s.questions = vec!["Who pays?".into()];
            s.answers.insert(0, "Retailers".into());
        });
        let json = serde_json::to_value(&state).unwrap();

        assert_eq!(json["currentStage"], "DOMAIN");
        assert_eq!(json["stages"]["BOD"]["answers"]["0"], "Retailers");
        assert_eq!(json["stages"]["BOD"]["status"], "pending");
        assert_eq!(json["stages"]["BOD"]["coherenceScore"], 0);

        let back: ProjectState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_partial_payload_deserializes() {
        let json = r#"{"currentStage":"KPI","projectMetadata":{"companyName":"Acme"},
            "stages":{"KPI":{"input":"north star","status":"completed"}}}"#;
        let state: ProjectState = serde_json::from_str(json).unwrap();

        assert_eq!(state.current_stage, DiscoveryStage::Kpi);
        assert_eq!(state.stages.len(), 1);
        assert!(state.stage(DiscoveryStage::Kpi).is_completed());
        assert_eq!(state.stage(DiscoveryStage::Domain), StageData::default());
    }

    #[test]
    fn test_normalized_repairs_interrupted_analysis() {
        let mut state: ProjectState = serde_json::from_str(
            r#"{"stages":{"DOMAIN":{"status":"analyzing","output":"partial"},
                "BOD":{"status":"analyzing"}}}"#,
        )
        .unwrap();
        state = state.normalized();

        assert_eq!(state.stages.len(), 4);
        assert_eq!(
            state.stage(DiscoveryStage::Domain).status,
            StageStatus::Completed
        );
        assert_eq!(state.stage(DiscoveryStage::Bod).status, StageStatus::Pending);
    }

    #[test]
    fn test_answered_questions_skip_blank_and_unknown() {
        let mut data = StageData {
            questions: vec!["Q1".into(), "Q2".into()],
            ..Default::default()
        };
        data.answers.insert(0, "A1".into());
        data.answers.insert(1, "   ".into());
        data.answers.insert(7, "orphan".into());

        assert_eq!(data.answered_questions(), vec![("Q1", "A1")]);
    }
}
