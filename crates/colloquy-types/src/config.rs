//! Global configuration types for Colloquy.
//!
//! `GlobalConfig` represents the top-level `config.toml` that controls the
//! default model, generation parameters, title suggestion, the inference
//! provider endpoint, and the per-owner generation cap.

use serde::{Deserialize, Serialize};

use crate::chat::DEFAULT_SESSION_TITLE;

/// Top-level configuration for the Colloquy engine.
///
/// Loaded from `~/.colloquy/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Model used for new sessions when the caller does not pick one.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Placeholder title given to new sessions.
    #[serde(default = "default_title")]
    pub default_title: String,

    /// Maximum output tokens per generation.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature for chat generations.
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Optional system prompt prepended to every generation.
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Whether to suggest a title after the first exchange.
    #[serde(default = "default_true")]
    pub title_suggestions: bool,

    /// Model used for title suggestion; falls back to the session model.
    #[serde(default)]
    pub title_model: Option<String>,

    /// Inference provider endpoint settings.
    #[serde(default)]
    pub provider: ProviderSettings,

    /// Cap on generations (sends + retries) per owner for this process.
    /// `None` means unlimited.
    #[serde(default)]
    pub max_generations_per_owner: Option<u32>,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_title() -> String {
    DEFAULT_SESSION_TITLE.to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f64 {
    0.7
}

fn default_true() -> bool {
    true
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            default_title: default_title(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            system_prompt: None,
            title_suggestions: true,
            title_model: None,
            provider: ProviderSettings::default(),
            max_generations_per_owner: None,
        }
    }
}

/// Connection settings for an OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Provider name used in logs (e.g., "openai", "ollama").
    #[serde(default = "default_provider_name")]
    pub name: String,
    /// Base URL up to and including the API version segment.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Request timeout in seconds for a whole generation.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_provider_name() -> String {
    "openai".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}
