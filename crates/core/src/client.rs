//! # Discovery Client
//!
//! HTTP client for a running Discovery server. It is the remote
//! implementation of every backend seam the controller and voice session
//! depend on.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::analysis::orchestrator::AnalysisRequest;
use crate::analysis::stream::{decode_events, EventStream};
use crate::analysis::AnalysisBackend;
use crate::error::DiscoveryError;
use crate::state::project::ProjectState;
use crate::state::repository::{LoadedProject, SaveReceipt};
use crate::state::store::ProjectBackend;
use crate::voice::service::{VoiceBackend, VoiceReply};

/// Server address used when none is configured
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:3000";

/// Error body returned by every API route
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    revision: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SaveBody<'a> {
    #[serde(flatten)]
    state: &'a ProjectState,
    #[serde(skip_serializing_if = "Option::is_none")]
    expected_revision: Option<i64>,
}

/// Client for the Discovery HTTP API
#[derive(Clone)]
pub struct DiscoveryClient {
    client: reqwest::Client,
    base_url: String,
}

impl DiscoveryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn error_body(response: reqwest::Response) -> (StatusCode, Option<ErrorBody>, String) {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let body = serde_json::from_str::<ErrorBody>(&text).ok();
        (status, body, text)
    }

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let (status, body, text) = Self::error_body(response).await;
        let message = body.map(|b| b.error).unwrap_or(text);
        anyhow::bail!("Server returned {}: {}", status, message)
    }

    /// Fetch a rendered export, `None` when the stage has no output yet
    pub async fn fetch_document(&self, path: &str) -> Result<Option<String>> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .context("Export request failed")?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let body = Self::ensure_success(response).await?.text().await?;
        Ok(Some(body))
    }
}

#[async_trait]
impl ProjectBackend for DiscoveryClient {
    async fn load(&self) -> Result<Option<LoadedProject>> {
        let response = self
            .client
            .get(self.url("/api/project"))
            .send()
            .await
            .context("Failed to reach project API")?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let loaded = Self::ensure_success(response)
            .await?
            .json::<LoadedProject>()
            .await
            .context("Malformed project payload")?;
        Ok(Some(loaded))
    }

    async fn save(
        &self,
        state: &ProjectState,
        expected_revision: Option<i64>,
    ) -> Result<SaveReceipt> {
        let response = self
            .client
            .post(self.url("/api/project"))
            .json(&SaveBody {
                state,
                expected_revision,
            })
            .send()
            .await
            .context("Failed to reach project API")?;

        if response.status() == StatusCode::CONFLICT {
            let (_, body, _) = Self::error_body(response).await;
            return Err(DiscoveryError::RevisionConflict {
                expected: expected_revision.unwrap_or_default(),
                actual: body.and_then(|b| b.revision).unwrap_or_default(),
            }
            .into());
        }

        Self::ensure_success(response)
            .await?
            .json::<SaveReceipt>()
            .await
            .context("Malformed save response")
    }
}

#[async_trait]
impl AnalysisBackend for DiscoveryClient {
    async fn analyze(&self, request: AnalysisRequest) -> Result<EventStream> {
        let response = self
            .client
            .post(self.url("/api/analyze"))
            .json(&request)
            .send()
            .await
            .context("Failed to reach analysis API")?;
        let response = Self::ensure_success(response).await?;
        Ok(decode_events(response.bytes_stream()))
    }
}

#[async_trait]
impl VoiceBackend for DiscoveryClient {
    async fn respond(
        &self,
        audio: Vec<u8>,
        file_name: &str,
        state: &ProjectState,
    ) -> Result<VoiceReply> {
        let app_state = serde_json::to_string(state)?;
        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio).file_name(file_name.to_string()),
            )
            .text("appState", app_state);

        let response = self
            .client
            .post(self.url("/api/voice"))
            .multipart(form)
            .send()
            .await
            .context("Failed to reach voice API")?;
        Self::ensure_success(response)
            .await?
            .json::<VoiceReply>()
            .await
            .context("Malformed voice response")
    }
}
