//! # Research Search
//!
//! Web search used to ground a generated document in current market data.
//! [`SerperClient`] talks to the Serper Google-search API.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::state::project::GroundingSource;

/// Serper search endpoint
pub const SERPER_ENDPOINT: &str = "https://google.serper.dev/search";

/// Organic results requested per query
pub const RESULTS_PER_QUERY: usize = 5;

/// Parsed search response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResults {
    /// `(link, snippet)` pairs, knowledge-graph entry first when present
    pub snippets: Vec<(String, String)>,
    pub sources: Vec<GroundingSource>,
}

impl SearchResults {
    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty()
    }

    /// Grounding block prepended to the user prompt
    pub fn grounding_block(&self, query: &str) -> String {
        let body = self
            .snippets
            .iter()
            .map(|(link, snippet)| format!("[SOURCE: {}]\n{}", link, snippet))
            .collect::<Vec<_>>()
            .join("\n\n");
        format!(
            "=== VERIFIED MARKET DATA (Query: {}) ===\n{}\n=============================================",
            query, body
        )
    }
}

/// A web search backend
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<SearchResults>;
}

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SerperOrganic>,
    #[serde(default, rename = "knowledgeGraph")]
    knowledge_graph: Option<SerperKnowledgeGraph>,
}

#[derive(Debug, Deserialize)]
struct SerperOrganic {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
}

#[derive(Debug, Deserialize)]
struct SerperKnowledgeGraph {
    #[serde(default)]
    title: String,
    description: Option<String>,
    website: Option<String>,
}

/// Convert a raw Serper JSON body into results
pub fn parse_serper(body: &str) -> Result<SearchResults> {
    let response: SerperResponse =
        serde_json::from_str(body).context("Malformed Serper response")?;
    let mut results = SearchResults::default();

    if let Some(kg) = response.knowledge_graph {
        if let Some(description) = kg.description {
            let link = kg.website.clone().unwrap_or_else(|| "Knowledge Graph".to_string());
            results.snippets.push((link, description));
        }
        if let Some(website) = kg.website {
            results.sources.push(GroundingSource {
                title: kg.title,
                uri: website,
            });
        }
    }

    for item in response.organic.into_iter().take(RESULTS_PER_QUERY) {
        results.snippets.push((item.link.clone(), item.snippet));
        results.sources.push(GroundingSource {
            title: item.title,
            uri: item.link,
        });
    }

    Ok(results)
}

/// Serper API client
pub struct SerperClient {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl SerperClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build search HTTP client")?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint: SERPER_ENDPOINT.to_string(),
        })
    }

    /// Point the client at a different endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl SearchProvider for SerperClient {
    async fn search(&self, query: &str) -> Result<SearchResults> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", &self.api_key)
            .json(&json!({ "q": query, "num": RESULTS_PER_QUERY }))
            .send()
            .await
            .context("Search request failed")?
            .error_for_status()
            .context("Search provider returned an error")?;

        let body = response.text().await?;
        let results = parse_serper(&body)?;
        tracing::debug!(query = %query, hits = results.snippets.len(), "Search completed");
        Ok(results)
    }
}
