//! # Discovery Core
//!
//! Business logic for the Discovery workbench: the four-stage pipeline that
//! takes a product idea from domain strategy to an engineering backlog.
//!
//! ## Architecture
//!
//! - `stages` - Stage registry (titles, agent instructions, status copy)
//! - `state/` - Project state, mutations, the client controller and SQLite persistence
//! - `analysis/` - Prompt assembly, scraping, search grounding and streamed generation
//! - `voice/` - Transcription, tool-calling intents and the voice session loop
//! - `export/` - Document export and slide-deck rendering
//! - `client` - HTTP client for a running Discovery server
//!
//! ## Usage
//!
//! ```rust,ignore
//! use discovery_core::client::DiscoveryClient;
//! use discovery_core::state::{ControllerConfig, DiscoveryController, Mutation};
//!
//! let client = Arc::new(DiscoveryClient::new("http://127.0.0.1:3000"));
//! let mut controller = DiscoveryController::new(client.clone(), ControllerConfig::default());
//! controller.load().await?;
//! controller.apply(Mutation::SwitchStage(DiscoveryStage::Bod)).await?;
//! controller.flush().await?;
//! ```

pub mod analysis;
pub mod client;
pub mod error;
pub mod export;
pub mod models;
pub mod stages;
pub mod state;
pub mod voice;

pub use error::DiscoveryError;
pub use stages::DiscoveryStage;
