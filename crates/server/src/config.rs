//! Server and CLI configuration.
//!
//! Settings are layered: built-in defaults, then `.discovery/config.json`,
//! then environment variables (a `.env` file is loaded first), then CLI flags.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use discovery_core::client::DEFAULT_SERVER_URL;
use discovery_core::models::{LlmProvider, ModelConfig};
use discovery_core::state::io::get_runtime_path;
use discovery_core::state::DEFAULT_SYNC_DEBOUNCE;

pub const CONFIG_FILE: &str = "config.json";
pub const SERPER_API_KEY_ENV: &str = "SERPER_API_KEY";
pub const SERVER_URL_ENV: &str = "DISCOVERY_SERVER_URL";

/// Configuration persisted in the runtime directory
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<LlmProvider>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vision_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_debounce_ms: Option<u64>,
}

impl PersistedConfig {
    pub fn default_path() -> PathBuf {
        get_runtime_path().join(CONFIG_FILE)
    }

    /// Load from `path`; a missing or unreadable file yields defaults
    pub async fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match tokio::fs::read_to_string(path).await {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring malformed config");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        discovery_core::state::io::write_file(path, &content)
            .await
            .with_context(|| format!("Failed to save config to {}", path.display()))
    }

    /// Overlay every field `other` sets
    pub fn merge(&mut self, other: PersistedConfig) {
        if other.provider.is_some() {
            self.provider = other.provider;
        }
        if other.base_url.is_some() {
            self.base_url = other.base_url;
        }
        if other.reasoning_model.is_some() {
            self.reasoning_model = other.reasoning_model;
        }
        if other.vision_model.is_some() {
            self.vision_model = other.vision_model;
        }
        if other.query_model.is_some() {
            self.query_model = other.query_model;
        }
        if other.transcription_model.is_some() {
            self.transcription_model = other.transcription_model;
        }
        if other.voice_model.is_some() {
            self.voice_model = other.voice_model;
        }
        if other.server_url.is_some() {
            self.server_url = other.server_url;
        }
        if other.sync_debounce_ms.is_some() {
            self.sync_debounce_ms = other.sync_debounce_ms;
        }
    }

    /// Model lineup with overrides applied
    pub fn models(&self) -> ModelConfig {
        let mut models = ModelConfig::with_provider(self.provider.unwrap_or_default());
        models.base_url = self.base_url.clone();
        let overrides = [
            (&mut models.reasoning, &self.reasoning_model),
            (&mut models.vision, &self.vision_model),
            (&mut models.query, &self.query_model),
            (&mut models.transcription, &self.transcription_model),
            (&mut models.voice, &self.voice_model),
        ];
        for (slot, value) in overrides {
            if let Some(value) = value {
                *slot = value.clone();
            }
        }
        models
    }
}

/// Fully resolved runtime settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub models: ModelConfig,
    /// Key for the configured model provider
    pub api_key: Option<String>,
    pub serper_api_key: Option<String>,
    pub server_url: String,
    pub sync_debounce: Duration,
}

impl ServerConfig {
    /// Resolve from the persisted file and the process environment
    pub async fn load() -> Self {
        let persisted = PersistedConfig::load(&PersistedConfig::default_path()).await;
        Self::resolve(persisted, |name| std::env::var(name).ok())
    }

    /// Resolve with an explicit environment lookup
    pub fn resolve(persisted: PersistedConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let models = persisted.models();
        let non_empty = |name: &str| env(name).filter(|v| !v.trim().is_empty());

        Self {
            api_key: non_empty(models.provider.api_key_env()),
            serper_api_key: non_empty(SERPER_API_KEY_ENV),
            server_url: non_empty(SERVER_URL_ENV)
                .or(persisted.server_url)
                .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string()),
            sync_debounce: persisted
                .sync_debounce_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_SYNC_DEBOUNCE),
            models,
        }
    }

    /// Name of the variable the provider key is read from
    pub fn api_key_env(&self) -> &'static str {
        self.models.provider.api_key_env()
    }
}
