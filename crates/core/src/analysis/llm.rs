//! # Language Model Client
//!
//! Minimal OpenAI-compatible chat-completions client: blocking completions
//! (with tool calls), streamed completions and audio transcription.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::pin::Pin;

use super::stream::SseDecoder;
use crate::models::ModelConfig;

/// One part of a multimodal user message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// Message body: plain text or a list of parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(content: MessageContent) -> Self {
        Self {
            role: "user".to_string(),
            content,
        }
    }

    /// Text of the message, with parts flattened
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// A chat-completions request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    pub stream: bool,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: 0.5,
            max_tokens: 2048,
            tools: Vec::new(),
            tool_choice: None,
            stream: false,
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Offer tools and let the model decide whether to call them
    pub fn tools(mut self, tools: Vec<serde_json::Value>) -> Self {
        self.tools = tools;
        self.tool_choice = Some("auto".to_string());
        self
    }
}

/// Function invocation requested by the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub kind: String,
    pub function: FunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

/// Assistant reply
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

/// Chat-completion capable model
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse>;

    /// Stream content deltas
    async fn stream(&self, request: ChatRequest) -> Result<BoxStream<'static, Result<String>>>;
}

/// Speech-to-text model
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: Vec<u8>, file_name: &str) -> Result<String>;
}

#[derive(Deserialize)]
struct CompletionBody {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: ChatResponse,
}

#[derive(Deserialize)]
struct ChunkBody {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct TranscriptionBody {
    #[serde(default)]
    text: String,
}

/// Content delta carried by one streamed chunk, if any
pub fn parse_chunk(data: &str) -> Result<Option<String>> {
    let chunk: ChunkBody = serde_json::from_str(data).context("Malformed completion chunk")?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|c| !c.is_empty()))
}

struct DeltaState<S> {
    body: Pin<Box<S>>,
    decoder: SseDecoder,
    queue: VecDeque<String>,
    finished: bool,
}

/// Turn an upstream completion byte stream into content deltas.
/// Malformed chunks are logged and skipped; `[DONE]` ends the stream.
pub fn decode_deltas<S, B, E>(body: S) -> BoxStream<'static, Result<String>>
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: std::error::Error + Send + Sync + 'static,
{
    let state = DeltaState {
        body: Box::pin(body),
        decoder: SseDecoder::new(),
        queue: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(delta) = st.queue.pop_front() {
                return Some((Ok(delta), st));
            }
            if st.finished {
                return None;
            }
            let frames = match st.body.next().await {
                Some(Ok(chunk)) => st.decoder.push(chunk.as_ref()),
                Some(Err(e)) => {
                    st.finished = true;
                    let err = anyhow::Error::new(e).context("Model stream interrupted");
                    return Some((Err(err), st));
                }
                None => {
                    st.finished = true;
                    st.decoder.finish()
                }
            };
            for frame in frames {
                if frame.data == "[DONE]" {
                    st.finished = true;
                    break;
                }
                match parse_chunk(&frame.data) {
                    Ok(Some(delta)) => st.queue.push_back(delta),
                    Ok(None) => {}
                    Err(e) => tracing::warn!(error = %e, "Skipping malformed model chunk"),
                }
            }
        }
    })
    .boxed()
}

/// Client for any OpenAI-compatible provider
pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    transcription_model: String,
}

impl OpenAiClient {
    pub fn new(config: &ModelConfig, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.api_base(),
            api_key: api_key.into(),
            transcription_model: config.transcription.clone(),
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("Model provider returned {}: {}", status, body)
    }

    async fn post_chat(&self, request: &ChatRequest) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .context("Model request failed")?;
        Self::check(response).await
    }
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    async fn complete(&self, mut request: ChatRequest) -> Result<ChatResponse> {
        request.stream = false;
        let body: CompletionBody = self
            .post_chat(&request)
            .await?
            .json()
            .await
            .context("Malformed completion response")?;
        let reply = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .unwrap_or_default();
        tracing::debug!(
            model = %request.model,
            tool_calls = reply.tool_calls.len(),
            "Completion received"
        );
        Ok(reply)
    }

    async fn stream(&self, mut request: ChatRequest) -> Result<BoxStream<'static, Result<String>>> {
        request.stream = true;
        let response = self.post_chat(&request).await?;
        tracing::debug!(model = %request.model, "Streaming completion");
        Ok(decode_deltas(response.bytes_stream()))
    }
}

#[async_trait]
impl Transcriber for OpenAiClient {
    async fn transcribe(&self, audio: Vec<u8>, file_name: &str) -> Result<String> {
        let part = reqwest::multipart::Part::bytes(audio).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.transcription_model.clone());

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .context("Transcription request failed")?;
        let body: TranscriptionBody = Self::check(response)
            .await?
            .json()
            .await
            .context("Malformed transcription response")?;
        Ok(body.text.trim().to_string())
    }
}
