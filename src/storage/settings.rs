//! Settings storage
//!
//! Manages persistence of engine settings: which model artifact to run,
//! generation budgets, stop sequences, sampling parameters and the
//! optional remote fallback endpoint.

use crate::storage::{get_data_dir, StorageError};
use crate::types::{ModelSpec, SamplingParams};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Remote fallback provider configuration
///
/// The bearer token is taken from the environment at request time, never
/// persisted here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// Streaming chat-completion endpoint
    pub endpoint: String,
    /// Model identifier understood by the endpoint
    pub model: String,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://openrouter.ai/api/v1/chat/completions".to_string(),
            model: "xiaomi/mimo-v2-flash:free".to_string(),
        }
    }
}

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Model artifact to run locally
    pub model: ModelSpec,
    /// Maximum number of tokens to generate per turn
    pub max_tokens: u32,
    /// Response budget applied when the power guard advises throttling
    pub throttled_max_tokens: u32,
    /// Stop sequences ending a generation
    pub stop_sequences: Vec<String>,
    /// Sampling parameters
    pub sampling: SamplingParams,
    /// Remote fallback provider, if configured
    #[serde(default)]
    pub remote: Option<RemoteSettings>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            model: ModelSpec::tinyllama_chat(),
            max_tokens: 512,
            throttled_max_tokens: 128,
            stop_sequences: vec!["User:".to_string(), "\n\n".to_string()],
            sampling: SamplingParams::default(),
            remote: None,
        }
    }
}

impl EngineSettings {
    /// Validate settings values
    ///
    /// Ensures all parameters are within acceptable ranges.
    pub fn validate(&mut self) {
        self.sampling.temperature = self.sampling.temperature.clamp(0.0, 2.0);
        self.sampling.top_p = self.sampling.top_p.clamp(0.0, 1.0);

        if self.sampling.top_k == 0 {
            self.sampling.top_k = 40;
        }

        self.max_tokens = self.max_tokens.clamp(1, 4096);
        if self.throttled_max_tokens == 0 || self.throttled_max_tokens > self.max_tokens {
            self.throttled_max_tokens = (self.max_tokens / 4).max(1);
        }

        if self.model.name.trim().is_empty() || self.model.source_url.trim().is_empty() {
            self.model = ModelSpec::tinyllama_chat();
        }
    }
}

/// Get the settings file path
fn get_settings_path() -> Result<PathBuf, StorageError> {
    Ok(get_data_dir()?.join("settings.json"))
}

/// Load settings from disk
///
/// Returns default settings if the file doesn't exist or is corrupted
pub fn load_settings() -> EngineSettings {
    match load_settings_internal() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("Failed to load settings, using defaults: {}", e);
            EngineSettings::default()
        }
    }
}

fn load_settings_internal() -> Result<EngineSettings, StorageError> {
    let path = get_settings_path()?;

    if !path.exists() {
        tracing::info!("Settings file not found, using defaults");
        return Ok(EngineSettings::default());
    }

    let json = fs::read_to_string(&path)?;
    let mut settings: EngineSettings = serde_json::from_str(&json)?;
    settings.validate();

    tracing::debug!("Loaded settings from disk");
    Ok(settings)
}

/// Save settings to disk
pub fn save_settings(settings: &EngineSettings) -> Result<(), StorageError> {
    let path = get_settings_path()?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json)?;

    tracing::debug!("Saved settings to disk");
    Ok(())
}
