//! Configuration management for the coaching server
//!
//! Supports loading configuration from:
//! - YAML files (config/default.yaml, config/{env}.yaml)
//! - Environment variables (COACH__ prefix)
//!
//! Also hosts the immutable per-language coaching profiles (audio
//! expectations, benchmark tables, localized messages).

pub mod language;
pub mod settings;

pub use language::{
    language_profile, supported_languages, ui_message, AudioExpectations, Benchmark,
    BenchmarkTable, LanguageProfile, ScoreWeights,
};
pub use settings::{
    load_settings, AudioConfig, AvatarSettings, LlmSettings, ObservabilityConfig,
    PipelineSettings, RuntimeEnvironment, ServerConfig, Settings, TtsSettings,
};

use thiserror::Error;

/// Configuration errors. Fatal at startup, never at runtime.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
