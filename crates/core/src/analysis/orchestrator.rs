//! # Analysis Orchestrator
//!
//! Server-side pipeline behind `/api/analyze`:
//!
//! 1. optional research grounding (query generation, web search)
//! 2. model selection (vision model when images are attached)
//! 3. message assembly (multipart when images are present)
//! 4. streamed generation, re-framed as [`AnalysisEvent`]s

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::llm::{ChatMessage, ChatRequest, ContentPart, ImageUrl, LanguageModel, MessageContent};
use super::prompt::{build_user_prompt, system_instruction};
use super::search::SearchProvider;
use super::stream::{AnalysisEvent, EventStream};
use super::AnalysisBackend;
use crate::models::ModelConfig;
use crate::stages::DiscoveryStage;
use crate::state::coherence::AnalysisToggles;
use crate::state::project::{FileContext, GroundingSource, ProjectState};

/// Characters of the user prompt used to derive a search query
pub const QUERY_PROMPT_CHARS: usize = 1000;

const QUERY_SYSTEM_PROMPT: &str = "Generate a single high-impact Google search query to find market trends or competitors based on the user intent. Output ONLY the query string.";

/// Body of `POST /api/analyze`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    /// Caller's model hint. Selection happens server-side.
    #[serde(default)]
    pub model_name: String,
    pub system_instruction: String,
    pub user_prompt: String,
    #[serde(default)]
    pub context_files: Vec<FileContext>,
    #[serde(default)]
    pub is_thinking: bool,
    #[serde(default)]
    pub use_search: bool,
}

impl AnalysisRequest {
    /// Request for analyzing `stage` of `state`, with reference pages
    /// already scraped
    pub fn for_stage(
        state: &ProjectState,
        stage: DiscoveryStage,
        scraped: &[String],
        toggles: AnalysisToggles,
    ) -> Self {
        let data = state.stage(stage);
        let mut context_files = data.files.clone();
        if let Some(reference) = data.format_reference.clone() {
            context_files.push(reference);
        }

        Self {
            model_name: ModelConfig::default().reasoning,
            system_instruction: stage.config().system_instruction.to_string(),
            user_prompt: build_user_prompt(state, stage, scraped),
            context_files,
            is_thinking: toggles.thinking,
            use_search: toggles.search,
        }
    }

    pub fn has_images(&self) -> bool {
        self.context_files.iter().any(FileContext::is_image)
    }

    /// Sampling parameters: `(temperature, max_tokens)`
    pub fn sampling(&self) -> (f32, u32) {
        if self.is_thinking {
            (0.7, 4096)
        } else {
            (0.5, 2048)
        }
    }
}

/// Research context gathered before generation
#[derive(Debug, Clone, PartialEq)]
pub struct Grounding {
    pub query: String,
    pub block: String,
    pub sources: Vec<GroundingSource>,
}

/// Strip wrapping quotes; reject queries too short to be useful
pub fn clean_query(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let is_quote = |c: char| c == '"' || c == '\'';
    let trimmed = trimmed.strip_prefix(is_quote).unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix(is_quote).unwrap_or(trimmed);
    let query = trimmed.trim();
    (query.chars().count() > 3).then(|| query.to_string())
}

/// Chat messages for a request whose prompt may already carry grounding
pub fn build_messages(request: &AnalysisRequest, prompt: &str) -> Vec<ChatMessage> {
    let system = ChatMessage::system(system_instruction(
        &request.system_instruction,
        request.is_thinking,
    ));

    let mut text = prompt.to_string();
    let mut images = Vec::new();
    let has_images = request.has_images();

    for file in &request.context_files {
        if has_images && file.is_image() {
            images.push(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: file.data_uri(),
                },
            });
        } else {
            text.push_str(&format!("\n\n[FILE: {}]\n{}", file.name, file.content));
        }
    }

    let content = if has_images {
        let mut parts = vec![ContentPart::Text { text }];
        parts.extend(images);
        MessageContent::Parts(parts)
    } else {
        MessageContent::Text(text)
    };

    vec![system, ChatMessage::user(content)]
}

/// Runs analyses against a language model and optional search provider
pub struct Orchestrator {
    llm: Arc<dyn LanguageModel>,
    search: Option<Arc<dyn SearchProvider>>,
    models: ModelConfig,
}

impl Orchestrator {
    pub fn new(llm: Arc<dyn LanguageModel>, models: ModelConfig) -> Self {
        Self {
            llm,
            search: None,
            models,
        }
    }

    pub fn with_search(mut self, search: Arc<dyn SearchProvider>) -> Self {
        self.search = Some(search);
        self
    }

    /// Ask the fast model for one search query
    pub async fn generate_query(&self, prompt: &str) -> Result<Option<String>> {
        let excerpt: String = prompt.chars().take(QUERY_PROMPT_CHARS).collect();
        let request = ChatRequest::new(
            self.models.query.clone(),
            vec![
                ChatMessage::system(QUERY_SYSTEM_PROMPT),
                ChatMessage::user(MessageContent::Text(excerpt)),
            ],
        )
        .temperature(0.3)
        .max_tokens(50);

        let reply = self.llm.complete(request).await?;
        Ok(reply.content.as_deref().and_then(clean_query))
    }

    /// Research grounding. Any failure is logged and yields `None`.
    pub async fn ground(&self, prompt: &str) -> Option<Grounding> {
        let search = self.search.as_ref()?;

        let query = match self.generate_query(prompt).await {
            Ok(Some(query)) => query,
            Ok(None) => {
                tracing::debug!("Query generation produced nothing usable");
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Search query generation failed");
                return None;
            }
        };

        match search.search(&query).await {
            Ok(results) if !results.is_empty() => {
                tracing::info!(query = %query, sources = results.sources.len(), "Research grounding added");
                Some(Grounding {
                    block: results.grounding_block(&query),
                    sources: results.sources,
                    query,
                })
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(query = %query, error = %e, "Search failed");
                None
            }
        }
    }
}

#[async_trait]
impl AnalysisBackend for Orchestrator {
    async fn analyze(&self, request: AnalysisRequest) -> Result<EventStream> {
        let mut prompt = request.user_prompt.clone();
        let mut sources = Vec::new();

        if request.use_search {
            if let Some(grounding) = self.ground(&request.user_prompt).await {
                prompt = format!("{}\n\n{}", grounding.block, prompt);
                sources = grounding.sources;
            }
        }

        let model = self.models.generation_model(request.has_images()).to_string();
        let (temperature, max_tokens) = request.sampling();
        tracing::info!(
            model = %model,
            thinking = request.is_thinking,
            files = request.context_files.len(),
            "Starting analysis"
        );

        let chat = ChatRequest::new(model, build_messages(&request, &prompt))
            .temperature(temperature)
            .max_tokens(max_tokens);
        let deltas = self.llm.stream(chat).await?;

        let head = futures::stream::iter(
            (!sources.is_empty()).then(|| Ok::<_, anyhow::Error>(AnalysisEvent::Sources(sources))),
        );
        let body = deltas.map(|delta| match delta {
            Ok(text) => Ok(AnalysisEvent::Text(text)),
            Err(e) => {
                tracing::error!(error = %e, "Analysis stream failed");
                Ok(AnalysisEvent::Error(e.to_string()))
            }
        });
        let done = futures::stream::once(futures::future::ready(Ok(AnalysisEvent::Done)));

        // An error event is terminal
        let events = head
            .chain(body)
            .chain(done)
            .scan(false, |errored, event| {
                if *errored {
                    return futures::future::ready(None);
                }
                *errored = matches!(event, Ok(AnalysisEvent::Error(_)));
                futures::future::ready(Some(event))
            });

        Ok(events.boxed())
    }
}
