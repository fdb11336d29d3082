//! # Voice API
//!
//! `POST /api/voice` accepts one recorded utterance and returns the
//! transcription with the voice model's reply and tool calls.

use axum::{
    extract::{Multipart, State},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use discovery_core::state::ProjectState;
use discovery_core::voice::{system_prompt, VoiceReply};

use super::{ApiError, AppState, ErrorResponse};

/// `{userText, aiResponse}`
#[derive(Debug, Serialize, ToSchema)]
pub struct VoiceResponse {
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub reply: VoiceReply,
}

#[derive(Default)]
struct VoiceUpload {
    audio: Option<(Vec<u8>, String)>,
    app_state: Option<String>,
    system_prompt: Option<String>,
}

async fn read_upload(mut multipart: Multipart) -> Result<VoiceUpload, ApiError> {
    let mut upload = VoiceUpload::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("audio.webm").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
                upload.audio = Some((bytes.to_vec(), file_name));
            }
            "appState" | "systemPrompt" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
                if name == "appState" {
                    upload.app_state = Some(text);
                } else {
                    upload.system_prompt = Some(text);
                }
            }
            other => tracing::debug!(field = other, "Ignoring unexpected voice form field"),
        }
    }
    Ok(upload)
}

/// Transcribe and interpret one voice command
#[utoipa::path(
    post,
    path = "/api/voice",
    tag = "voice",
    request_body(content_type = "multipart/form-data", description = "`file` audio, `appState` JSON, optional `systemPrompt`"),
    responses(
        (status = 200, description = "Transcription and model reply", body = VoiceResponse),
        (status = 400, description = "Missing audio or malformed state", body = ErrorResponse),
        (status = 500, description = "Missing credentials or upstream failure", body = ErrorResponse)
    )
)]
pub async fn voice(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<VoiceResponse>, ApiError> {
    let service = state.voice()?;
    let upload = read_upload(multipart).await?;
    let (audio, file_name) = upload
        .audio
        .ok_or_else(|| ApiError::bad_request("No audio file provided"))?;

    let prompt = match upload.system_prompt.filter(|p| !p.trim().is_empty()) {
        Some(prompt) => prompt,
        None => {
            let app_state: ProjectState = match upload.app_state.as_deref() {
                Some(raw) => serde_json::from_str(raw)
                    .map_err(|e| ApiError::bad_request(format!("Invalid appState: {}", e)))?,
                None => ProjectState::default(),
            };
            system_prompt(&app_state)
        }
    };

    let reply = service.process(audio, &file_name, &prompt).await?;
    Ok(Json(VoiceResponse { reply }))
}

#[cfg(test)]
mod tests {
    use crate::api::router;
    use crate::api::tests::{body_json, test_state};
    use anyhow::Result;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use discovery_core::analysis::llm::{
        ChatRequest, ChatResponse, FunctionCall, LanguageModel, ToolCall, Transcriber,
    };
    use discovery_core::models::ModelConfig;
    use discovery_core::voice::VoiceService;
    use futures::stream::BoxStream;
    use std::sync::{Arc, Mutex};
    use tower::ServiceExt;

    const BOUNDARY: &str = "discovery-boundary";

    struct Heard(&'static str);

    #[async_trait]
    impl Transcriber for Heard {
        async fn transcribe(&self, audio: Vec<u8>, _file_name: &str) -> Result<String> {
            assert!(!audio.is_empty());
            Ok(self.0.to_string())
        }
    }

    #[derive(Default)]
    struct Switcher {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LanguageModel for Switcher {
        async fn complete(&self, request: ChatRequest) -> Result<ChatResponse> {
            self.prompts.lock().unwrap().push(request.messages[0].text());
            Ok(ChatResponse {
                content: Some("Switching to KPIs.".into()),
                tool_calls: vec![ToolCall {
                    id: "call_1".into(),
                    kind: "function".into(),
                    function: FunctionCall {
                        name: "switchModule".into(),
                        arguments: r#"{"module":"KPI"}"#.into(),
                    },
                }],
            })
        }

        async fn stream(&self, _request: ChatRequest) -> Result<BoxStream<'static, Result<String>>> {
            anyhow::bail!("not used")
        }
    }

    fn multipart(fields: &[(&str, Option<&str>, &str)]) -> Request<Body> {
        let mut body = String::new();
        for (name, file_name, value) in fields {
            body.push_str(&format!("--{}\r\n", BOUNDARY));
            match file_name {
                Some(file) => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: audio/webm\r\n\r\n",
                    name, file
                )),
                None => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                    name
                )),
            }
            body.push_str(value);
            body.push_str("\r\n");
        }
        body.push_str(&format!("--{}--\r\n", BOUNDARY));

        Request::builder()
            .method("POST")
            .uri("/api/voice")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn state_with(transcript: &'static str, model: Arc<Switcher>) -> crate::api::AppState {
        let mut state = test_state();
        state.voice = Some(Arc::new(VoiceService::new(
            Arc::new(Heard(transcript)),
            model,
            ModelConfig::default(),
        )));
        state
    }

    #[tokio::test]
    async fn test_reply_shape() {
        let model = Arc::new(Switcher::default());
        let app = router(state_with("show me the metrics", model.clone()));
        let app_state = r#"{"currentStage":"BOD","stages":{"BOD":{"questions":["Who pays?"]}}}"#;

        let response = app
            .oneshot(multipart(&[
                ("file", Some("turn.webm"), "RIFF"),
                ("appState", None, app_state),
            ]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["userText"], "show me the metrics");
        assert_eq!(json["aiResponse"]["content"], "Switching to KPIs.");
        assert_eq!(
            json["aiResponse"]["tool_calls"][0]["function"]["name"],
            "switchModule"
        );

        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].contains("Current Module: BOD"));
        assert!(prompts[0].contains("0: Who pays?"));
    }

    #[tokio::test]
    async fn test_explicit_prompt_wins() {
        let model = Arc::new(Switcher::default());
        let app = router(state_with("hello", model.clone()));
        app.oneshot(multipart(&[
            ("file", Some("turn.webm"), "RIFF"),
            ("appState", None, "{}"),
            ("systemPrompt", None, "Custom prompt"),
        ]))
        .await
        .unwrap();
        assert_eq!(model.prompts.lock().unwrap()[0], "Custom prompt");
    }

    #[tokio::test]
    async fn test_silence_has_null_response() {
        let model = Arc::new(Switcher::default());
        let app = router(state_with("", model.clone()));
        let response = app
            .oneshot(multipart(&[("file", Some("turn.webm"), "RIFF")]))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["userText"], "");
        assert!(json["aiResponse"].is_null());
        assert!(model.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_400() {
        let app = router(state_with("x", Arc::new(Switcher::default())));
        let response = app
            .oneshot(multipart(&[("appState", None, "{}")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_key_is_500() {
        let response = router(test_state())
            .oneshot(multipart(&[("file", Some("turn.webm"), "RIFF")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
