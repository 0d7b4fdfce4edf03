//! Main settings module
//!
//! Priority: env vars > config/{env}.yaml > config/default.yaml > defaults.
//! Upstream API keys are only ever read from the environment and are never
//! serialized back out or logged.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Main application settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub pipeline: PipelineSettings,

    #[serde(default)]
    pub llm: LlmSettings,

    #[serde(default)]
    pub tts: TtsSettings,

    #[serde(default)]
    pub avatar: AvatarSettings,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP/WebSocket server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Maximum WebSocket message size in bytes (oversized frames are
    /// rejected at message level, the channel stays open).
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,

    /// Interval between server-initiated heartbeat envelopes.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Receive timeout on the client channel; a quiet interval is a
    /// continue, not an error.
    #[serde(default = "default_receive_timeout")]
    pub receive_timeout_secs: u64,

    #[serde(default = "default_max_sessions")]
    pub max_concurrent_sessions: usize,
}

fn default_port() -> u16 {
    8000
}

fn default_true() -> bool {
    true
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://localhost:8080".to_string(),
        "http://localhost:5173".to_string(),
    ]
}

fn default_max_message_bytes() -> usize {
    1024 * 1024
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_receive_timeout() -> u64 {
    5
}

fn default_max_sessions() -> usize {
    100
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            cors_enabled: true,
            cors_origins: default_cors_origins(),
            max_message_bytes: default_max_message_bytes(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            receive_timeout_secs: default_receive_timeout(),
            max_concurrent_sessions: default_max_sessions(),
        }
    }
}

/// Audio canonicalization and upload limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Canonical sample rate all audio is converted to.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Samples per analysis chunk (1600 = 100ms at 16kHz).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_buffer_seconds")]
    pub max_buffer_seconds: f64,

    #[serde(default = "default_max_upload")]
    pub max_upload_bytes: usize,

    #[serde(default = "default_extensions")]
    pub supported_extensions: Vec<String>,
}

fn default_sample_rate() -> u32 {
    16_000
}

fn default_chunk_size() -> usize {
    1600
}

fn default_buffer_seconds() -> f64 {
    10.0
}

fn default_max_upload() -> usize {
    10 * 1024 * 1024
}

fn default_extensions() -> Vec<String> {
    vec![
        "wav".to_string(),
        "mp3".to_string(),
        "m4a".to_string(),
        "ogg".to_string(),
    ]
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            chunk_size: default_chunk_size(),
            max_buffer_seconds: default_buffer_seconds(),
            max_upload_bytes: default_max_upload(),
            supported_extensions: default_extensions(),
        }
    }
}

/// Pipeline orchestration defaults, overridable per session through the
/// `config_update` whitelist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_true")]
    pub enable_parallel_processing: bool,

    /// Per-chunk deadline for the whole pipeline step.
    #[serde(default = "default_chunk_timeout")]
    pub chunk_timeout_secs: f64,

    /// Chunks between LLM coaching calls.
    #[serde(default = "default_feedback_frequency")]
    pub feedback_frequency: u32,

    /// Chunks between metrics aggregation runs.
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval: u32,

    #[serde(default = "default_max_feedback")]
    pub max_feedback_per_chunk: usize,
}

fn default_chunk_timeout() -> f64 {
    5.0
}

fn default_feedback_frequency() -> u32 {
    5
}

fn default_metrics_interval() -> u32 {
    3
}

fn default_max_feedback() -> usize {
    3
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            enable_parallel_processing: true,
            chunk_timeout_secs: default_chunk_timeout(),
            feedback_frequency: default_feedback_frequency(),
            metrics_interval: default_metrics_interval(),
            max_feedback_per_chunk: default_max_feedback(),
        }
    }
}

/// Generative LLM upstream configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// API key, read from the environment only.
    #[serde(skip_serializing, default = "default_llm_api_key")]
    pub api_key: Option<String>,

    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

fn default_llm_api_key() -> Option<String> {
    std::env::var("GEMINI_API_KEY").ok()
}

fn default_llm_endpoint() -> String {
    std::env::var("GEMINI_API_BASE")
        .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".to_string())
}

fn default_llm_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_llm_timeout() -> u64 {
    5
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_key: default_llm_api_key(),
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

/// Text-to-speech upstream configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsSettings {
    #[serde(skip_serializing, default = "default_tts_api_key")]
    pub api_key: Option<String>,

    #[serde(default = "default_tts_endpoint")]
    pub endpoint: String,

    /// Default voice, id or alias.
    #[serde(default = "default_tts_voice")]
    pub default_voice: String,

    #[serde(default = "default_tts_model")]
    pub model: String,

    #[serde(default = "default_tts_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_tts_timeout")]
    pub timeout_secs: u64,
}

fn default_tts_api_key() -> Option<String> {
    std::env::var("ELEVENLABS_API_KEY").ok()
}

fn default_tts_endpoint() -> String {
    std::env::var("ELEVENLABS_API_BASE")
        .unwrap_or_else(|_| "https://api.elevenlabs.io".to_string())
}

fn default_tts_voice() -> String {
    "Rachel".to_string()
}

fn default_tts_model() -> String {
    "eleven_multilingual_v2".to_string()
}

fn default_tts_sample_rate() -> u32 {
    44_100
}

fn default_tts_timeout() -> u64 {
    15
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self {
            api_key: default_tts_api_key(),
            endpoint: default_tts_endpoint(),
            default_voice: default_tts_voice(),
            model: default_tts_model(),
            sample_rate: default_tts_sample_rate(),
            timeout_secs: default_tts_timeout(),
        }
    }
}

/// Talking-avatar upstream configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvatarSettings {
    #[serde(skip_serializing, default = "default_avatar_api_key")]
    pub api_key: Option<String>,

    #[serde(default = "default_avatar_endpoint")]
    pub endpoint: String,

    /// Explicit upstream WebSocket base; when unset the URL is resolved
    /// from the service's agent record.
    #[serde(default)]
    pub ws_base: Option<String>,

    /// Allow falling back to the hard-coded upstream URL pattern when the
    /// service record lacks a URL field.
    #[serde(default)]
    pub allow_url_fallback: bool,
}

fn default_avatar_api_key() -> Option<String> {
    std::env::var("AVATAR_API_KEY").ok()
}

fn default_avatar_endpoint() -> String {
    std::env::var("AVATAR_API_BASE").unwrap_or_else(|_| "https://api.d-id.com".to_string())
}

impl Default for AvatarSettings {
    fn default() -> Self {
        Self {
            api_key: default_avatar_api_key(),
            endpoint: default_avatar_endpoint(),
            ws_base: std::env::var("AVATAR_WS_BASE").ok(),
            allow_url_fallback: false,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.audio.sample_rate < 8_000 || self.audio.sample_rate > 48_000 {
            return Err(ConfigError::InvalidValue {
                field: "audio.sample_rate".to_string(),
                message: format!("must be between 8000 and 48000, got {}", self.audio.sample_rate),
            });
        }
        if self.audio.chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "audio.chunk_size".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.pipeline.chunk_timeout_secs < 0.5 || self.pipeline.chunk_timeout_secs > 60.0 {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.chunk_timeout_secs".to_string(),
                message: format!(
                    "must be between 0.5 and 60, got {}",
                    self.pipeline.chunk_timeout_secs
                ),
            });
        }
        if !(1..=30).contains(&self.pipeline.feedback_frequency) {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.feedback_frequency".to_string(),
                message: format!(
                    "must be between 1 and 30, got {}",
                    self.pipeline.feedback_frequency
                ),
            });
        }
        if self.pipeline.metrics_interval == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.metrics_interval".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Load settings with the standard priority chain.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("COACH")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 8000);
        assert_eq!(settings.audio.sample_rate, 16_000);
        assert_eq!(settings.audio.chunk_size, 1600);
        assert_eq!(settings.pipeline.metrics_interval, 3);
        assert!(settings.pipeline.enable_parallel_processing);
    }

    #[test]
    fn test_settings_validation() {
        let mut settings = Settings::default();
        settings.pipeline.chunk_timeout_secs = 0.1;
        assert!(settings.validate().is_err());

        settings.pipeline.chunk_timeout_secs = 5.0;
        assert!(settings.validate().is_ok());

        settings.pipeline.feedback_frequency = 31;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_api_keys_not_serialized() {
        let mut settings = Settings::default();
        settings.llm.api_key = Some("secret".to_string());
        settings.tts.api_key = Some("secret".to_string());
        let json = serde_json::to_string(&settings).unwrap();
        assert!(!json.contains("secret"));
    }
}
