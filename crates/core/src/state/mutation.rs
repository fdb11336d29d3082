//! # State Mutations
//!
//! Every change to the project goes through a [`Mutation`]. Applying one is
//! a pure transformation: the previous state is borrowed, a new state is
//! returned, and invalid requests come back as [`DiscoveryError`]s without
//! touching anything.

use super::files::normalize_url;
use super::metadata::MetadataField;
use super::project::{
    FileContext, GroundingSource, ProjectState, StageData, StageStatus, StageVersion,
    MAX_CLIENT_VERSIONS,
};
use crate::analysis::prompt::import_history;
use crate::analysis::questions::parse_questions;
use crate::error::DiscoveryError;
use crate::stages::DiscoveryStage;

/// How new input text is combined with what is already there
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Replace,
    /// Joined to the existing text with a newline
    Append,
}

/// Result of a finished analysis, ready to be folded into the stage
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedAnalysis {
    pub output: String,
    pub grounding_sources: Option<Vec<GroundingSource>>,
    pub search_entry_point_html: Option<String>,
    pub coherence_score: u8,
    pub version_id: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

/// What a stage showed before an analysis run cleared it
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StageSnapshot {
    pub output: String,
    pub status: StageStatus,
}

impl StageSnapshot {
    pub fn of(data: &StageData) -> Self {
        Self {
            output: data.output.clone(),
            status: data.status,
        }
    }
}

/// A single change to the project state
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    SetMetadata {
        field: MetadataField,
        value: String,
    },
    SetInput {
        stage: DiscoveryStage,
        text: String,
        mode: InputMode,
    },
    AddUrl {
        stage: DiscoveryStage,
        url: String,
    },
    RemoveUrl {
        stage: DiscoveryStage,
        url: String,
    },
    AddFiles {
        stage: DiscoveryStage,
        files: Vec<FileContext>,
    },
    RemoveFile {
        stage: DiscoveryStage,
        name: String,
    },
    SetFormatReference {
        stage: DiscoveryStage,
        file: Option<FileContext>,
    },
    SetAnswer {
        stage: DiscoveryStage,
        index: usize,
        text: String,
    },
    /// Prepend earlier stage outputs to the current stage input
    ImportPrevious,
    SwitchStage(DiscoveryStage),
    BeginAnalysis(DiscoveryStage),
    AppendPartial {
        stage: DiscoveryStage,
        text: String,
    },
    CompleteAnalysis {
        stage: DiscoveryStage,
        result: CompletedAnalysis,
    },
    /// Drop partial output and put back what the stage showed before the run
    FailAnalysis {
        stage: DiscoveryStage,
        restore: StageSnapshot,
    },
    RevertVersion {
        stage: DiscoveryStage,
        version_id: String,
    },
    ResetStage(DiscoveryStage),
}

impl Mutation {
    /// Whether the resulting state should be pushed to the backend.
    /// Transient analysis progress is never persisted.
    pub fn persists(&self) -> bool {
        !matches!(self, Self::BeginAnalysis(_) | Self::AppendPartial { .. })
    }

    /// Short name for log lines
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SetMetadata { .. } => "set_metadata",
            Self::SetInput { .. } => "set_input",
            Self::AddUrl { .. } => "add_url",
            Self::RemoveUrl { .. } => "remove_url",
            Self::AddFiles { .. } => "add_files",
            Self::RemoveFile { .. } => "remove_file",
            Self::SetFormatReference { .. } => "set_format_reference",
            Self::SetAnswer { .. } => "set_answer",
            Self::ImportPrevious => "import_previous",
            Self::SwitchStage(_) => "switch_stage",
            Self::BeginAnalysis(_) => "begin_analysis",
            Self::AppendPartial { .. } => "append_partial",
            Self::CompleteAnalysis { .. } => "complete_analysis",
            Self::FailAnalysis { .. } => "fail_analysis",
            Self::RevertVersion { .. } => "revert_version",
            Self::ResetStage(_) => "reset_stage",
        }
    }

    /// Produce the next state. `state` is never modified.
    pub fn apply(self, state: &ProjectState) -> Result<ProjectState, DiscoveryError> {
        match self {
            Self::SetMetadata { field, value } => {
                let mut next = state.clone();
                next.project_metadata = state.project_metadata.with_field(field, value);
                Ok(next)
            }

            Self::SetInput { stage, text, mode } => Ok(state.with_stage(stage, |s| {
                s.input = match mode {
                    InputMode::Replace => text,
                    InputMode::Append if s.input.is_empty() => text,
                    InputMode::Append => format!("{}\n{}", s.input, text),
                };
            })),

            Self::AddUrl { stage, url } => match normalize_url(&url) {
                Some(url) => Ok(state.with_stage(stage, |s| s.urls.push(url))),
                None => Ok(state.clone()),
            },

            Self::RemoveUrl { stage, url } => {
                Ok(state.with_stage(stage, |s| s.urls.retain(|u| *u != url)))
            }

            Self::AddFiles { stage, files } => {
                Ok(state.with_stage(stage, |s| s.files.extend(files)))
            }

            Self::RemoveFile { stage, name } => {
                Ok(state.with_stage(stage, |s| s.files.retain(|f| f.name != name)))
            }

            Self::SetFormatReference { stage, file } => {
                Ok(state.with_stage(stage, |s| s.format_reference = file))
            }

            Self::SetAnswer { stage, index, text } => {
                let count = state.stage_ref(stage).map_or(0, |s| s.questions.len());
                if index >= count {
                    return Err(DiscoveryError::AnswerOutOfRange { index, count });
                }
                Ok(state.with_stage(stage, |s| {
                    s.answers.insert(index, text);
                }))
            }

            Self::ImportPrevious => {
                let stage = state.current_stage;
                let history = import_history(state, stage)?;
                Ok(state.with_stage(stage, |s| {
                    s.input = format!("{}\n\n--- NEW INPUT ---\n{}", history, s.input);
                }))
            }

            Self::SwitchStage(stage) => {
                if !state.is_metadata_complete() {
                    return Err(DiscoveryError::MetadataIncomplete);
                }
                let mut next = state.clone();
                next.current_stage = stage;
                Ok(next)
            }

            Self::BeginAnalysis(stage) => Ok(state.with_stage(stage, |s| {
                s.output.clear();
                s.status = StageStatus::Analyzing;
            })),

            Self::AppendPartial { stage, text } => {
                Ok(state.with_stage(stage, |s| s.output.push_str(&text)))
            }

            Self::CompleteAnalysis { stage, result } => {
                Ok(state.with_stage(stage, |s| complete_stage(s, result)))
            }

            Self::FailAnalysis { stage, restore } => Ok(state.with_stage(stage, |s| {
                s.output = restore.output;
                s.status = restore.status;
            })),

            Self::RevertVersion { stage, version_id } => {
                let version = state
                    .stage_ref(stage)
                    .and_then(|s| s.versions.iter().find(|v| v.id == version_id))
                    .cloned()
                    .ok_or_else(|| DiscoveryError::UnknownVersion {
                        stage,
                        id: version_id.clone(),
                    })?;

                Ok(state.with_stage(stage, |s| {
                    s.output = version.output;
                    s.input = version.input;
                    s.questions = version.questions;
                    s.coherence_score = version.coherence_score;
                    s.search_entry_point_html = version.search_entry_point_html;
                    s.status = StageStatus::Completed;
                }))
            }

            Self::ResetStage(stage) => Ok(state.with_stage(stage, |s| *s = StageData::default())),
        }
    }
}

fn complete_stage(data: &mut StageData, result: CompletedAnalysis) {
    let questions = parse_questions(&result.output);

    let changed = data
        .versions
        .first()
        .map_or(true, |latest| latest.output != result.output);
    if changed {
        data.versions.insert(
            0,
            StageVersion {
                id: result.version_id,
                timestamp: result.timestamp,
                output: result.output.clone(),
                input: data.input.clone(),
                questions: questions.clone(),
                coherence_score: result.coherence_score,
                search_entry_point_html: result.search_entry_point_html.clone(),
            },
        );
        data.versions.truncate(MAX_CLIENT_VERSIONS);
    }

    data.output = result.output;
    data.status = StageStatus::Completed;
    data.questions = questions;
    data.grounding_sources = result.grounding_sources;
    data.search_entry_point_html = result.search_entry_point_html;
    data.coherence_score = result.coherence_score;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::metadata::ProjectMetadata;

    fn ready_state() -> ProjectState {
        let metadata = MetadataField::REQUIRED
            .iter()
            .fold(ProjectMetadata::default(), |m, f| m.with_field(*f, "x"));
        ProjectState {
            project_metadata: metadata,
            ..Default::default()
        }
    }

    fn completed(output: &str, id: &str) -> CompletedAnalysis {
        CompletedAnalysis {
            output: output.to_string(),
            grounding_sources: None,
            search_entry_point_html: None,
            coherence_score: 80,
            version_id: id.to_string(),
            timestamp: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_apply_leaves_previous_state_untouched() {
        let before = ready_state();
        let snapshot = before.clone();
        let after = Mutation::SetInput {
            stage: DiscoveryStage::Domain,
            text: "vision".into(),
            mode: InputMode::Replace,
        }
        .apply(&before)
        .unwrap();

        assert_eq!(before, snapshot);
        assert_eq!(after.stage(DiscoveryStage::Domain).input, "vision");
    }

    #[test]
    fn test_append_joins_with_newline() {
        let state = ready_state().with_stage(DiscoveryStage::Domain, |s| s.input = "a".into());
        let next = Mutation::SetInput {
            stage: DiscoveryStage::Domain,
            text: "b".into(),
            mode: InputMode::Append,
        }
        .apply(&state)
        .unwrap();
        assert_eq!(next.stage(DiscoveryStage::Domain).input, "a\nb");
    }

    #[test]
    fn test_add_url_normalizes_and_ignores_blank() {
        let state = ready_state();
        let next = Mutation::AddUrl {
            stage: DiscoveryStage::Bod,
            url: " acme.io ".into(),
        }
        .apply(&state)
        .unwrap();
        assert_eq!(next.stage(DiscoveryStage::Bod).urls, vec!["https://acme.io"]);

        let unchanged = Mutation::AddUrl {
            stage: DiscoveryStage::Bod,
            url: "   ".into(),
        }
        .apply(&next)
        .unwrap();
        assert_eq!(unchanged, next);
    }

    #[test]
    fn test_switch_stage_requires_metadata() {
        let err = Mutation::SwitchStage(DiscoveryStage::Kpi)
            .apply(&ProjectState::default())
            .unwrap_err();
        assert_eq!(err, DiscoveryError::MetadataIncomplete);

        let next = Mutation::SwitchStage(DiscoveryStage::Kpi)
            .apply(&ready_state())
            .unwrap();
        assert_eq!(next.current_stage, DiscoveryStage::Kpi);
    }

    #[test]
    fn test_answer_out_of_range_rejected() {
        let state = ready_state().with_stage(DiscoveryStage::Domain, |s| {
            s.questions = vec!["Q?".into()];
        });
        let err = Mutation::SetAnswer {
            stage: DiscoveryStage::Domain,
            index: 1,
            text: "A".into(),
        }
        .apply(&state)
        .unwrap_err();
        assert_eq!(err, DiscoveryError::AnswerOutOfRange { index: 1, count: 1 });
    }

    #[test]
    fn test_complete_analysis_records_version_and_questions() {
        let doc = "## Plan\n### CLARIFICATION QUESTIONS\n1. Budget?";
        let state = Mutation::BeginAnalysis(DiscoveryStage::Domain)
            .apply(&ready_state())
            .unwrap();
        assert_eq!(state.stage(DiscoveryStage::Domain).status, StageStatus::Analyzing);

        let next = Mutation::CompleteAnalysis {
            stage: DiscoveryStage::Domain,
            result: completed(doc, "v1"),
        }
        .apply(&state)
        .unwrap();

        let data = next.stage(DiscoveryStage::Domain);
        assert_eq!(data.status, StageStatus::Completed);
        assert_eq!(data.questions, vec!["Budget?"]);
        assert_eq!(data.versions.len(), 1);
        assert_eq!(data.versions[0].id, "v1");
        assert_eq!(data.coherence_score, 80);
    }

    #[test]
    fn test_identical_output_does_not_add_version() {
        let once = Mutation::CompleteAnalysis {
            stage: DiscoveryStage::Domain,
            result: completed("same", "v1"),
        }
        .apply(&ready_state())
        .unwrap();
        let twice = Mutation::CompleteAnalysis {
            stage: DiscoveryStage::Domain,
            result: completed("same", "v2"),
        }
        .apply(&once)
        .unwrap();
        assert_eq!(twice.stage(DiscoveryStage::Domain).versions.len(), 1);
    }

    #[test]
    fn test_versions_capped_newest_first() {
        let mut state = ready_state();
        for i in 0..12 {
            state = Mutation::CompleteAnalysis {
                stage: DiscoveryStage::Kpi,
                result: completed(&format!("doc {}", i), &format!("v{}", i)),
            }
            .apply(&state)
            .unwrap();
        }
        let versions = state.stage(DiscoveryStage::Kpi).versions;
        assert_eq!(versions.len(), MAX_CLIENT_VERSIONS);
        assert_eq!(versions[0].id, "v11");
        assert_eq!(versions[9].id, "v2");
    }

    #[test]
    fn test_fail_analysis_restores_snapshot() {
        let done = Mutation::CompleteAnalysis {
            stage: DiscoveryStage::Bod,
            result: completed("good", "v1"),
        }
        .apply(&ready_state())
        .unwrap();
        let restore = StageSnapshot::of(&done.stage(DiscoveryStage::Bod));
        let streaming = Mutation::BeginAnalysis(DiscoveryStage::Bod).apply(&done).unwrap();
        let streaming = Mutation::AppendPartial {
            stage: DiscoveryStage::Bod,
            text: "half".into(),
        }
        .apply(&streaming)
        .unwrap();
        let failed = Mutation::FailAnalysis {
            stage: DiscoveryStage::Bod,
            restore,
        }
        .apply(&streaming)
        .unwrap();

        let data = failed.stage(DiscoveryStage::Bod);
        assert_eq!(data.output, "good");
        assert_eq!(data.status, StageStatus::Completed);

        let fresh = Mutation::FailAnalysis {
            stage: DiscoveryStage::Kpi,
            restore: StageSnapshot::default(),
        }
        .apply(&ready_state())
        .unwrap();
        assert_eq!(fresh.stage(DiscoveryStage::Kpi).status, StageStatus::Pending);
    }

    #[test]
    fn test_fail_after_revert_keeps_reverted_output() {
        let v1 = Mutation::CompleteAnalysis {
            stage: DiscoveryStage::Domain,
            result: completed("one", "v1"),
        }
        .apply(&ready_state())
        .unwrap();
        let v2 = Mutation::CompleteAnalysis {
            stage: DiscoveryStage::Domain,
            result: completed("two", "v2"),
        }
        .apply(&v1)
        .unwrap();
        let reverted = Mutation::RevertVersion {
            stage: DiscoveryStage::Domain,
            version_id: "v1".into(),
        }
        .apply(&v2)
        .unwrap();

        let restore = StageSnapshot::of(&reverted.stage(DiscoveryStage::Domain));
        let streaming = Mutation::BeginAnalysis(DiscoveryStage::Domain)
            .apply(&reverted)
            .unwrap();
        let failed = Mutation::FailAnalysis {
            stage: DiscoveryStage::Domain,
            restore,
        }
        .apply(&streaming)
        .unwrap();

        assert_eq!(failed.stage(DiscoveryStage::Domain).output, "one");
        assert_eq!(failed, reverted);
    }

    #[test]
    fn test_revert_restores_snapshot() {
        let state = ready_state()
            .with_stage(DiscoveryStage::Domain, |s| s.input = "first".into())
            .with_stage(DiscoveryStage::Bod, |s| {
                s.output = "BOD doc".into();
                s.status = StageStatus::Completed;
            });
        let v1 = Mutation::CompleteAnalysis {
            stage: DiscoveryStage::Domain,
            result: completed("one", "v1"),
        }
        .apply(&state)
        .unwrap();
        let edited = v1.with_stage(DiscoveryStage::Domain, |s| s.input = "second".into());
        let v2 = Mutation::CompleteAnalysis {
            stage: DiscoveryStage::Domain,
            result: completed("two", "v2"),
        }
        .apply(&edited)
        .unwrap();

        let reverted = Mutation::RevertVersion {
            stage: DiscoveryStage::Domain,
            version_id: "v1".into(),
        }
        .apply(&v2)
        .unwrap();
        let data = reverted.stage(DiscoveryStage::Domain);
        assert_eq!(data.output, "one");
        assert_eq!(data.input, "first");
        assert_eq!(data.versions.len(), 2);
        assert_eq!(reverted.stage(DiscoveryStage::Bod).output, "BOD doc");
        assert_eq!(
            reverted.stage(DiscoveryStage::Bod),
            v2.stage(DiscoveryStage::Bod)
        );

        let missing = Mutation::RevertVersion {
            stage: DiscoveryStage::Domain,
            version_id: "nope".into(),
        }
        .apply(&v2);
        assert!(matches!(missing, Err(DiscoveryError::UnknownVersion { .. })));
    }

    #[test]
    fn test_import_previous_prepends_history() {
        let state = ready_state()
            .with_stage(DiscoveryStage::Domain, |s| s.output = "Domain doc".into())
            .with_stage(DiscoveryStage::Bod, |s| s.input = "mine".into());
        let state = Mutation::SwitchStage(DiscoveryStage::Bod).apply(&state).unwrap();
        let next = Mutation::ImportPrevious.apply(&state).unwrap();

        assert_eq!(
            next.stage(DiscoveryStage::Bod).input,
            "--- DOMAIN ANALYSIS ---\nDomain doc\n\n--- NEW INPUT ---\nmine"
        );
    }

    #[test]
    fn test_reset_stage() {
        let state = ready_state()
            .with_stage(DiscoveryStage::Epics, |s| {
                s.input = "x".into();
                s.urls.push("https://a.b".into());
            })
            .with_stage(DiscoveryStage::Kpi, |s| {
                s.input = "targets".into();
                s.output = "KPI doc".into();
                s.status = StageStatus::Completed;
            });
        let next = Mutation::ResetStage(DiscoveryStage::Epics).apply(&state).unwrap();
        assert_eq!(next.stage(DiscoveryStage::Epics), StageData::default());
        assert_eq!(next.stage(DiscoveryStage::Kpi), state.stage(DiscoveryStage::Kpi));
        assert_eq!(next.project_metadata, state.project_metadata);
    }

    #[test]
    fn test_transient_mutations_do_not_persist() {
        assert!(!Mutation::BeginAnalysis(DiscoveryStage::Domain).persists());
        assert!(!Mutation::AppendPartial {
            stage: DiscoveryStage::Domain,
            text: String::new()
        }
        .persists());
        assert!(Mutation::ResetStage(DiscoveryStage::Domain).persists());
    }
}
