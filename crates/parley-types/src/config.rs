//! Global configuration types for Parley.
//!
//! `GlobalConfig` represents the top-level `config.toml` that controls the
//! HTTP listener, the completion provider, and streaming limits.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the Parley server.
///
/// Loaded from `~/.parley/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub provider: ProviderSettings,

    #[serde(default)]
    pub completion: CompletionConfig,
}

/// Where the HTTP API listens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Completion provider selection and request defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Provider name ("openai", "gemini", "mistral", or any custom name).
    #[serde(default = "default_provider_name")]
    pub name: String,
    /// Override for the API base URL; required for custom provider names.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: Option<f64>,
    /// Optional system prompt prepended to every conversation.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_provider_name() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_temperature() -> Option<f64> {
    Some(0.7)
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            base_url: None,
            model: default_model(),
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            system_prompt: None,
        }
    }
}

/// Limits applied to a single streamed completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Hard deadline for one completion, from request to last fragment.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Buffered SSE events per client before the relay waits.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_channel_capacity() -> usize {
    32
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            channel_capacity: default_channel_capacity(),
        }
    }
}
