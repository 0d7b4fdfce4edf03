//! Error taxonomy
//!
//! Closed set of error kinds shared by every crate in the workspace. Each
//! error carries a short code, an HTTP-style status, a details map, and a
//! timestamp, and serializes to a stable wire envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Closed set of error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    SessionNotFound,
    SessionExpired,
    InvalidSessionState,
    AudioFormat,
    AudioTooLarge,
    AudioQuality,
    AudioBuffer,
    LlmUnavailable,
    LlmQuotaExceeded,
    LlmTimeout,
    LlmResponseInvalid,
    PipelineTimeout,
    PipelineConfig,
    PipelineResource,
    ChannelMessage,
    StorageUnavailable,
    StorageCapacityExceeded,
    DataIntegrity,
    Validation,
    Configuration,
    RateLimitExceeded,
    ServiceUnavailable,
}

impl ErrorKind {
    /// Short machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::SessionNotFound => "SESSION_NOT_FOUND",
            ErrorKind::SessionExpired => "SESSION_EXPIRED",
            ErrorKind::InvalidSessionState => "INVALID_SESSION_STATE",
            ErrorKind::AudioFormat => "AUDIO_FORMAT_ERROR",
            ErrorKind::AudioTooLarge => "AUDIO_TOO_LARGE",
            ErrorKind::AudioQuality => "AUDIO_QUALITY_ERROR",
            ErrorKind::AudioBuffer => "AUDIO_BUFFER_ERROR",
            ErrorKind::LlmUnavailable => "LLM_UNAVAILABLE",
            ErrorKind::LlmQuotaExceeded => "LLM_QUOTA_EXCEEDED",
            ErrorKind::LlmTimeout => "LLM_TIMEOUT",
            ErrorKind::LlmResponseInvalid => "LLM_RESPONSE_INVALID",
            ErrorKind::PipelineTimeout => "PIPELINE_TIMEOUT",
            ErrorKind::PipelineConfig => "PIPELINE_CONFIG_ERROR",
            ErrorKind::PipelineResource => "PIPELINE_RESOURCE_ERROR",
            ErrorKind::ChannelMessage => "CHANNEL_MESSAGE_ERROR",
            ErrorKind::StorageUnavailable => "STORAGE_UNAVAILABLE",
            ErrorKind::StorageCapacityExceeded => "STORAGE_CAPACITY_EXCEEDED",
            ErrorKind::DataIntegrity => "DATA_INTEGRITY_ERROR",
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::Configuration => "CONFIGURATION_ERROR",
            ErrorKind::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorKind::ServiceUnavailable => "SERVICE_UNAVAILABLE",
        }
    }

    /// HTTP-style status for API responses.
    pub fn status(&self) -> u16 {
        match self {
            ErrorKind::SessionNotFound => 404,
            ErrorKind::SessionExpired => 410,
            ErrorKind::InvalidSessionState => 409,
            ErrorKind::AudioFormat => 400,
            ErrorKind::AudioTooLarge => 413,
            ErrorKind::AudioQuality => 422,
            ErrorKind::AudioBuffer => 500,
            ErrorKind::LlmUnavailable => 503,
            ErrorKind::LlmQuotaExceeded => 429,
            ErrorKind::LlmTimeout => 504,
            ErrorKind::LlmResponseInvalid => 502,
            ErrorKind::PipelineTimeout => 504,
            ErrorKind::PipelineConfig => 500,
            ErrorKind::PipelineResource => 503,
            ErrorKind::ChannelMessage => 400,
            ErrorKind::StorageUnavailable => 503,
            ErrorKind::StorageCapacityExceeded => 507,
            ErrorKind::DataIntegrity => 500,
            ErrorKind::Validation => 400,
            ErrorKind::Configuration => 500,
            ErrorKind::RateLimitExceeded => 429,
            ErrorKind::ServiceUnavailable => 503,
        }
    }

    /// Whether callers may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::LlmTimeout
                | ErrorKind::LlmUnavailable
                | ErrorKind::ChannelMessage
                | ErrorKind::StorageUnavailable
                | ErrorKind::ServiceUnavailable
                | ErrorKind::PipelineResource
        )
    }

    /// Variant name used as the `type` field of the wire envelope.
    pub fn type_name(&self) -> &'static str {
        match self {
            ErrorKind::SessionNotFound => "SessionNotFound",
            ErrorKind::SessionExpired => "SessionExpired",
            ErrorKind::InvalidSessionState => "InvalidSessionState",
            ErrorKind::AudioFormat => "AudioFormatError",
            ErrorKind::AudioTooLarge => "AudioTooLarge",
            ErrorKind::AudioQuality => "AudioQualityError",
            ErrorKind::AudioBuffer => "AudioBufferError",
            ErrorKind::LlmUnavailable => "LLMUnavailable",
            ErrorKind::LlmQuotaExceeded => "LLMQuotaExceeded",
            ErrorKind::LlmTimeout => "LLMTimeout",
            ErrorKind::LlmResponseInvalid => "LLMResponseInvalid",
            ErrorKind::PipelineTimeout => "PipelineTimeout",
            ErrorKind::PipelineConfig => "PipelineConfigError",
            ErrorKind::PipelineResource => "PipelineResourceError",
            ErrorKind::ChannelMessage => "ChannelMessageError",
            ErrorKind::StorageUnavailable => "StorageUnavailable",
            ErrorKind::StorageCapacityExceeded => "StorageCapacityExceeded",
            ErrorKind::DataIntegrity => "DataIntegrity",
            ErrorKind::Validation => "ValidationError",
            ErrorKind::Configuration => "ConfigurationError",
            ErrorKind::RateLimitExceeded => "RateLimitExceeded",
            ErrorKind::ServiceUnavailable => "ServiceUnavailable",
        }
    }
}

/// Structured error with context and metadata.
#[derive(Debug, Clone)]
pub struct CoachError {
    pub kind: ErrorKind,
    pub message: String,
    pub details: BTreeMap<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl CoachError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Attach a key/value detail to the error context.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn status(&self) -> u16 {
        self.kind.status()
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Stable wire representation.
    pub fn to_envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            error: true,
            code: self.kind.code().to_string(),
            message: self.message.clone(),
            status: self.kind.status(),
            details: self.details.clone(),
            timestamp: self.timestamp.to_rfc3339(),
            r#type: self.kind.type_name().to_string(),
        }
    }
}

impl std::fmt::Display for CoachError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind.code(), self.message)
    }
}

impl std::error::Error for CoachError {}

/// Serialized error envelope: `{error, code, message, status, details, timestamp, type}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: bool,
    pub code: String,
    pub message: String,
    pub status: u16,
    pub details: BTreeMap<String, Value>,
    pub timestamp: String,
    pub r#type: String,
}

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, CoachError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_set() {
        assert!(ErrorKind::LlmTimeout.is_retryable());
        assert!(ErrorKind::LlmUnavailable.is_retryable());
        assert!(ErrorKind::ChannelMessage.is_retryable());
        assert!(ErrorKind::StorageUnavailable.is_retryable());
        assert!(ErrorKind::ServiceUnavailable.is_retryable());
        assert!(ErrorKind::PipelineResource.is_retryable());

        assert!(!ErrorKind::LlmQuotaExceeded.is_retryable());
        assert!(!ErrorKind::SessionNotFound.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
    }

    #[test]
    fn test_envelope_shape() {
        let err = CoachError::new(ErrorKind::AudioFormat, "could not decode audio")
            .with_detail("format", "unknown");
        let envelope = err.to_envelope();

        assert!(envelope.error);
        assert_eq!(envelope.code, "AUDIO_FORMAT_ERROR");
        assert_eq!(envelope.status, 400);
        assert_eq!(envelope.r#type, "AudioFormatError");

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["error"], true);
        assert!(json["timestamp"].is_string());
        assert_eq!(json["details"]["format"], "unknown");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(ErrorKind::SessionNotFound.status(), 404);
        assert_eq!(ErrorKind::AudioTooLarge.status(), 413);
        assert_eq!(ErrorKind::RateLimitExceeded.status(), 429);
        assert_eq!(ErrorKind::PipelineTimeout.status(), 504);
    }
}
