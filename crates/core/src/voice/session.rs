//! # Voice Session
//!
//! Drives the listen, process, speak cycle for one user. Audio capture and
//! speech playback are platform concerns behind [`AudioCapture`] and
//! [`SpeechOutput`]; the session only sequences them and folds the model's
//! tool calls into the [`DiscoveryController`].

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;

use super::intent::{VoiceIntent, DEFAULT_ACKNOWLEDGEMENT};
use super::service::VoiceBackend;
use crate::state::store::DiscoveryController;

/// Spoken when a turn fails
pub const APOLOGY: &str = "I'm sorry, I had trouble processing your voice.";

/// Where the assistant is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoicePhase {
    #[default]
    Idle,
    Listening,
    Processing,
    Speaking,
}

impl VoicePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Processing => "processing",
            Self::Speaking => "speaking",
        }
    }
}

/// One recorded utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedAudio {
    pub bytes: Vec<u8>,
    pub file_name: String,
}

/// Records a single utterance
#[async_trait]
pub trait AudioCapture: Send + Sync {
    async fn record(&self) -> Result<CapturedAudio>;
}

/// Speaks a reply aloud
#[async_trait]
pub trait SpeechOutput: Send + Sync {
    async fn speak(&self, text: &str) -> Result<()>;
}

/// What happened during one turn
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoiceTurn {
    pub user_text: String,
    pub spoken: Option<String>,
    pub applied: Vec<VoiceIntent>,
    pub rejected: usize,
}

/// A voice assistant bound to capture, playback and a backend
pub struct VoiceSession {
    capture: Arc<dyn AudioCapture>,
    speech: Arc<dyn SpeechOutput>,
    backend: Arc<dyn VoiceBackend>,
    continuous: bool,
    phase: watch::Sender<VoicePhase>,
}

impl VoiceSession {
    pub fn new(
        capture: Arc<dyn AudioCapture>,
        speech: Arc<dyn SpeechOutput>,
        backend: Arc<dyn VoiceBackend>,
    ) -> Self {
        let (phase, _) = watch::channel(VoicePhase::Idle);
        Self {
            capture,
            speech,
            backend,
            continuous: false,
            phase,
        }
    }

    /// Return to listening after each reply instead of going idle
    pub fn continuous(mut self, continuous: bool) -> Self {
        self.continuous = continuous;
        self
    }

    pub fn phase(&self) -> VoicePhase {
        *self.phase.borrow()
    }

    /// Observe phase changes
    pub fn subscribe(&self) -> watch::Receiver<VoicePhase> {
        self.phase.subscribe()
    }

    fn set_phase(&self, phase: VoicePhase) {
        self.phase.send_replace(phase);
    }

    fn resting_phase(&self) -> VoicePhase {
        if self.continuous {
            VoicePhase::Listening
        } else {
            VoicePhase::Idle
        }
    }

    /// Record one utterance, process it and apply the resulting intents.
    /// Returns `None` when nothing could be recorded.
    pub async fn run_turn(&self, controller: &mut DiscoveryController) -> Option<VoiceTurn> {
        self.set_phase(VoicePhase::Listening);
        let audio = match self.capture.record().await {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!(error = %e, "Microphone capture failed");
                self.set_phase(VoicePhase::Idle);
                return None;
            }
        };

        self.set_phase(VoicePhase::Processing);
        let state = controller.state();
        let reply = match self
            .backend
            .respond(audio.bytes, &audio.file_name, &state)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(error = %e, "Voice turn failed");
                self.say(APOLOGY).await;
                self.set_phase(VoicePhase::Idle);
                return Some(VoiceTurn {
                    spoken: Some(APOLOGY.to_string()),
                    ..Default::default()
                });
            }
        };

        let mut turn = VoiceTurn {
            user_text: reply.user_text,
            ..Default::default()
        };

        let Some(response) = reply.ai_response else {
            // Nothing was transcribed
            self.set_phase(VoicePhase::Idle);
            return Some(turn);
        };

        let intents = VoiceIntent::decode_all(&response.tool_calls);
        turn.rejected = response.tool_calls.len() - intents.len();

        for intent in intents {
            let stage = controller.state().current_stage;
            match controller.apply(intent.clone().into_mutation(stage)).await {
                Ok(_) => turn.applied.push(intent),
                Err(e) => {
                    tracing::warn!(error = %e, intent = ?intent, "Voice intent rejected");
                    turn.rejected += 1;
                }
            }
        }

        let text = response
            .content
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ACKNOWLEDGEMENT.to_string());
        self.say(&text).await;
        turn.spoken = Some(text);

        self.set_phase(self.resting_phase());
        Some(turn)
    }

    async fn say(&self, text: &str) {
        self.set_phase(VoicePhase::Speaking);
        if let Err(e) = self.speech.speak(text).await {
            tracing::warn!(error = %e, "Speech playback failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::llm::{ChatResponse, FunctionCall, ToolCall};
    use crate::stages::DiscoveryStage;
    use crate::state::mutation::Mutation;
    use crate::state::project::ProjectState;
    use crate::state::metadata::MetadataField;
    use crate::state::store::tests::MemoryBackend;
    use crate::state::store::ControllerConfig;
    use crate::voice::service::VoiceReply;
    use std::sync::Mutex;

    struct FakeMic(bool);

    #[async_trait]
    impl AudioCapture for FakeMic {
        async fn record(&self) -> Result<CapturedAudio> {
            if !self.0 {
                anyhow::bail!("permission denied");
            }
            Ok(CapturedAudio {
                bytes: vec![0; 4],
                file_name: "turn.webm".into(),
            })
        }
    }

    #[derive(Default)]
    struct Transcript(Mutex<Vec<String>>);

    #[async_trait]
    impl SpeechOutput for Transcript {
        async fn speak(&self, text: &str) -> Result<()> {
            self.0.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    struct Scripted(Option<VoiceReply>);

    #[async_trait]
    impl VoiceBackend for Scripted {
        async fn respond(&self, _: Vec<u8>, _: &str, _: &ProjectState) -> Result<VoiceReply> {
            self.0.clone().ok_or_else(|| anyhow::anyhow!("backend down"))
        }
    }

    fn call(name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: "c".into(),
            kind: "function".into(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    fn reply(content: Option<&str>, tool_calls: Vec<ToolCall>) -> VoiceReply {
        VoiceReply {
            user_text: "said something".into(),
            ai_response: Some(ChatResponse {
                content: content.map(String::from),
                tool_calls,
            }),
        }
    }

    async fn controller() -> DiscoveryController {
        let backend = Arc::new(MemoryBackend::default());
        let mut controller = DiscoveryController::new(backend, ControllerConfig::default());
        controller
            .apply(Mutation::SetMetadata {
                field: MetadataField::CompanyName,
                value: "x".into(),
            })
            .await
            .unwrap();
        controller
    }

    fn session(reply: Option<VoiceReply>, speech: Arc<Transcript>) -> VoiceSession {
        VoiceSession::new(Arc::new(FakeMic(true)), speech, Arc::new(Scripted(reply)))
    }

    #[tokio::test]
    async fn test_tool_calls_update_state_and_acknowledge() {
        let mut controller = controller().await;
        let speech = Arc::new(Transcript::default());
        let session = session(
            Some(reply(
                None,
                vec![call(
                    "updateMainContext",
                    r#"{"text":"Fleet telematics","mode":"replace"}"#,
                )],
            )),
            speech.clone(),
        );

        let turn = session.run_turn(&mut controller).await.unwrap();
        assert_eq!(turn.applied.len(), 1);
        assert_eq!(
            controller.state().stage(DiscoveryStage::Domain).input,
            "Fleet telematics"
        );
        assert_eq!(*speech.0.lock().unwrap(), vec![DEFAULT_ACKNOWLEDGEMENT]);
        assert_eq!(session.phase(), VoicePhase::Idle);
    }

    #[tokio::test]
    async fn test_out_of_range_answer_leaves_state_untouched() {
        let mut controller = controller().await;
        let before = controller.state();
        let session = session(
            Some(reply(
                Some("Noted."),
                vec![call("updateRefinementAnswer", r#"{"index":4,"text":"x"}"#)],
            )),
            Arc::new(Transcript::default()),
        );

        let turn = session.run_turn(&mut controller).await.unwrap();
        assert!(turn.applied.is_empty());
        assert_eq!(turn.rejected, 1);
        assert_eq!(turn.spoken.as_deref(), Some("Noted."));
        assert_eq!(controller.state(), before);
    }

    #[tokio::test]
    async fn test_switch_is_gated_on_metadata() {
        let mut controller = controller().await;
        let session = session(
            Some(reply(None, vec![call("switchModule", r#"{"module":"KPI"}"#)])),
            Arc::new(Transcript::default()),
        );
        session.run_turn(&mut controller).await.unwrap();
        assert_eq!(controller.state().current_stage, DiscoveryStage::Domain);

        for field in MetadataField::REQUIRED {
            controller
                .apply(Mutation::SetMetadata {
                    field,
                    value: "x".into(),
                })
                .await
                .unwrap();
        }
        session.run_turn(&mut controller).await.unwrap();
        assert_eq!(controller.state().current_stage, DiscoveryStage::Kpi);
    }

    #[tokio::test]
    async fn test_backend_failure_apologizes_and_goes_idle() {
        let mut controller = controller().await;
        let speech = Arc::new(Transcript::default());
        let session = session(None, speech.clone()).continuous(true);

        let turn = session.run_turn(&mut controller).await.unwrap();
        assert_eq!(turn.spoken.as_deref(), Some(APOLOGY));
        assert_eq!(*speech.0.lock().unwrap(), vec![APOLOGY]);
        assert_eq!(session.phase(), VoicePhase::Idle);
    }

    #[tokio::test]
    async fn test_continuous_session_keeps_listening_after_reply() {
        let mut controller = controller().await;
        let session = session(Some(reply(Some("Sure."), vec![])), Arc::new(Transcript::default()))
            .continuous(true);

        session.run_turn(&mut controller).await.unwrap();
        assert_eq!(session.phase(), VoicePhase::Listening);
    }

    #[tokio::test]
    async fn test_capture_failure_goes_idle() {
        let mut controller = controller().await;
        let session = VoiceSession::new(
            Arc::new(FakeMic(false)),
            Arc::new(Transcript::default()),
            Arc::new(Scripted(None)),
        )
        .continuous(true);

        assert!(session.run_turn(&mut controller).await.is_none());
        assert_eq!(session.phase(), VoicePhase::Idle);
    }

    #[tokio::test]
    async fn test_silence_speaks_nothing() {
        let mut controller = controller().await;
        let speech = Arc::new(Transcript::default());
        let session = session(Some(VoiceReply::default()), speech.clone()).continuous(true);

        let turn = session.run_turn(&mut controller).await.unwrap();
        assert!(turn.spoken.is_none());
        assert!(speech.0.lock().unwrap().is_empty());
        assert_eq!(session.phase(), VoicePhase::Idle);
    }
}
