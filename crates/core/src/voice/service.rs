//! Server-side voice turn: transcribe, then ask the voice model which tools
//! to call.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::intent::{system_prompt, tool_definitions};
use crate::analysis::llm::{
    ChatMessage, ChatRequest, ChatResponse, LanguageModel, MessageContent, Transcriber,
};
use crate::models::ModelConfig;
use crate::state::project::ProjectState;

/// Result of one voice turn, as returned by `POST /api/voice`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceReply {
    pub user_text: String,
    /// `None` when nothing intelligible was said
    pub ai_response: Option<ChatResponse>,
}

/// Turns recorded audio into a [`VoiceReply`]
#[async_trait]
pub trait VoiceBackend: Send + Sync {
    async fn respond(
        &self,
        audio: Vec<u8>,
        file_name: &str,
        state: &ProjectState,
    ) -> Result<VoiceReply>;
}

/// Transcription plus tool-calling chat against the configured provider
pub struct VoiceService {
    transcriber: Arc<dyn Transcriber>,
    llm: Arc<dyn LanguageModel>,
    models: ModelConfig,
}

impl VoiceService {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        llm: Arc<dyn LanguageModel>,
        models: ModelConfig,
    ) -> Self {
        Self {
            transcriber,
            llm,
            models,
        }
    }

    /// Run a turn with an explicit system prompt
    pub async fn process(
        &self,
        audio: Vec<u8>,
        file_name: &str,
        system_prompt: &str,
    ) -> Result<VoiceReply> {
        let user_text = self
            .transcriber
            .transcribe(audio, file_name)
            .await
            .context("Transcription failed")?;

        if user_text.trim().is_empty() {
            tracing::debug!("Empty transcription; skipping voice model");
            return Ok(VoiceReply::default());
        }

        let request = ChatRequest::new(
            self.models.voice.clone(),
            vec![
                ChatMessage::system(system_prompt),
                ChatMessage::user(MessageContent::Text(user_text.clone())),
            ],
        )
        .tools(tool_definitions());

        let response = self.llm.complete(request).await?;
        tracing::info!(
            chars = user_text.len(),
            tool_calls = response.tool_calls.len(),
            "Voice turn processed"
        );

        Ok(VoiceReply {
            user_text,
            ai_response: Some(response),
        })
    }
}

#[async_trait]
impl VoiceBackend for VoiceService {
    async fn respond(
        &self,
        audio: Vec<u8>,
        file_name: &str,
        state: &ProjectState,
    ) -> Result<VoiceReply> {
        self.process(audio, file_name, &system_prompt(state)).await
    }
}
