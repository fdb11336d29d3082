//! # Voice Assistant
//!
//! Hands-free editing: recorded speech is transcribed, a tool-calling model
//! decides what to change, and the resulting [`VoiceIntent`]s are applied
//! through the same mutations the UI uses.

pub mod intent;
pub mod service;
pub mod session;

pub use intent::{system_prompt, tool_definitions, VoiceIntent};
pub use service::{VoiceBackend, VoiceReply, VoiceService};
pub use session::{AudioCapture, CapturedAudio, SpeechOutput, VoicePhase, VoiceSession, VoiceTurn};
