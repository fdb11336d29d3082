//! # Domain Errors
//!
//! Failures that callers are expected to branch on. Everything else travels
//! as `anyhow::Error` with context attached.

use thiserror::Error;

use crate::stages::DiscoveryStage;

/// Errors raised by state transitions, persistence and provider wiring
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DiscoveryError {
    /// A required API key is not configured
    #[error("Missing {0} on server")]
    MissingCredential(&'static str),

    /// Analysis or navigation attempted before the global context is filled in
    #[error("Project metadata is incomplete")]
    MetadataIncomplete,

    /// A stage identifier that is not one of the four discovery stages
    #[error("Unknown discovery stage '{0}'")]
    UnknownStage(String),

    /// Revert requested for a version id the stage does not hold
    #[error("Stage {stage} has no version '{id}'")]
    UnknownVersion { stage: DiscoveryStage, id: String },

    /// Answer recorded for a question index the stage does not have
    #[error("Question index {index} is out of range ({count} questions)")]
    AnswerOutOfRange { index: usize, count: usize },

    /// Import requested with nothing earlier to import
    #[error("No previous stage output to import: {0}")]
    NothingToImport(&'static str),

    /// Optimistic concurrency check failed on save
    #[error("Project revision conflict: expected {expected}, found {actual}")]
    RevisionConflict { expected: i64, actual: i64 },

    /// No project has been saved yet
    #[error("No project found")]
    ProjectNotFound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_credential_message() {
        let err = DiscoveryError::MissingCredential("GROQ_API_KEY");
        assert_eq!(err.to_string(), "Missing GROQ_API_KEY on server");
    }

    #[test]
    fn test_downcast_through_anyhow() {
        let err: anyhow::Error = DiscoveryError::RevisionConflict {
            expected: 2,
            actual: 3,
        }
        .into();
        assert!(matches!(
            err.downcast_ref::<DiscoveryError>(),
            Some(DiscoveryError::RevisionConflict { expected: 2, actual: 3 })
        ));
    }
}
