//! # Models
//!
//! Provider and model selection for the analysis and voice agents. Every
//! supported provider speaks the OpenAI chat-completions dialect, so a
//! provider is just a base URL and the environment variable holding its key.

use serde::{Deserialize, Serialize};

/// Supported OpenAI-compatible providers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Groq,
    #[serde(rename = "openai")]
    OpenAI,
    OpenRouter,
}

impl LlmProvider {
    /// Get all available providers
    pub fn all() -> Vec<LlmProvider> {
        vec![LlmProvider::Groq, LlmProvider::OpenAI, LlmProvider::OpenRouter]
    }

    /// Display name for CLI output
    pub fn display_name(&self) -> &'static str {
        match self {
            LlmProvider::Groq => "Groq",
            LlmProvider::OpenAI => "OpenAI",
            LlmProvider::OpenRouter => "OpenRouter",
        }
    }

    /// API root used when no base URL override is configured
    pub fn default_base_url(&self) -> &'static str {
        match self {
            LlmProvider::Groq => "https://api.groq.com/openai/v1",
            LlmProvider::OpenAI => "https://api.openai.com/v1",
            LlmProvider::OpenRouter => "https://openrouter.ai/api/v1",
        }
    }

    /// Environment variable holding the API key
    pub fn api_key_env(&self) -> &'static str {
        match self {
            LlmProvider::Groq => "GROQ_API_KEY",
            LlmProvider::OpenAI => "OPENAI_API_KEY",
            LlmProvider::OpenRouter => "OPENROUTER_API_KEY",
        }
    }
}

/// Which model each agent role uses
///
/// ## Example
/// ```rust,ignore
/// use discovery_core::models::{ModelConfig, LlmProvider};
///
/// let config = ModelConfig::default().with_base_url("http://localhost:8080/v1");
/// let reasoning = config.reasoning.clone();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    pub provider: LlmProvider,
    /// Optional base URL override for self-hosted or proxied endpoints
    pub base_url: Option<String>,
    /// Long-form document generation
    pub reasoning: String,
    /// Used instead of `reasoning` when image context is attached
    pub vision: String,
    /// Fast model that writes the research search query
    pub query: String,
    /// Speech-to-text
    pub transcription: String,
    /// Tool-calling model behind the voice assistant
    pub voice: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Groq,
            base_url: None,
            reasoning: "openai/gpt-oss-120b".to_string(),
            vision: "meta-llama/llama-4-scout-17b-16e-instruct".to_string(),
            query: "llama-3.3-70b-versatile".to_string(),
            transcription: "whisper-large-v3-turbo".to_string(),
            voice: "openai/gpt-oss-120b".to_string(),
        }
    }
}

impl ModelConfig {
    /// Config for a specific provider with the default model lineup
    pub fn with_provider(provider: LlmProvider) -> Self {
        Self {
            provider,
            ..Self::default()
        }
    }

    /// Set base URL
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Effective API root, without a trailing slash
    pub fn api_base(&self) -> String {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
            .trim_end_matches('/')
            .to_string()
    }

    /// Pick the generation model for a request
    pub fn generation_model(&self, has_images: bool) -> &str {
        if has_images {
            &self.vision
        } else {
            &self.reasoning
        }
    }
}
