//! # Analysis
//!
//! Everything between a stage's inputs and its generated document: prompt
//! assembly, reference scraping, research grounding, model calls and the
//! SSE event stream that carries results back to the client.

pub mod llm;
pub mod orchestrator;
pub mod prompt;
pub mod questions;
pub mod scraper;
pub mod search;
pub mod stream;

use anyhow::Result;
use async_trait::async_trait;

pub use orchestrator::{AnalysisRequest, Orchestrator};
pub use stream::{AnalysisEvent, EventStream};

/// Anything that can turn an analysis request into a stream of events.
///
/// The server implements this with [`Orchestrator`]; clients implement it
/// by calling `POST /api/analyze`.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    async fn analyze(&self, request: AnalysisRequest) -> Result<EventStream>;
}
