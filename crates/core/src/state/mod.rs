//! Project state: the data model, its mutations, the client-side controller
//! and SQLite persistence.

pub mod coherence;
pub mod db;
pub mod files;
pub mod io;
pub mod metadata;
pub mod mutation;
pub mod project;
pub mod repository;
pub mod store;

pub use coherence::{coherence_score, AnalysisToggles};
pub use db::DiscoveryDb;
pub use metadata::{MetadataField, ProjectMetadata};
pub use mutation::{CompletedAnalysis, InputMode, Mutation};
pub use project::{
    FileContext, GroundingSource, ProjectState, StageData, StageStatus, StageVersion,
};
pub use repository::{LoadedProject, ProjectRepository, SaveReceipt, DEFAULT_PROJECT_ID};
pub use store::{
    AnalysisTicket, ControllerConfig, DiscoveryController, ProjectBackend, DEFAULT_SYNC_DEBOUNCE,
};
