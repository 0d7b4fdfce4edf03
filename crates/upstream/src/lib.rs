//! Upstream bridges
//!
//! Uniform wrappers over the LLM, TTS, and avatar upstreams. All bridges
//! classify upstream failures into one taxonomy, normalize HTTP statuses
//! (401/403/404/429/5xx), and never log credentials.

pub mod avatar;
pub mod llm;
pub mod retry;
pub mod tts;

pub use avatar::{AvatarBridge, AvatarErrorCode, AvatarServerFrame, UpstreamStage};
pub use llm::{CoachingModel, GenerativeLlmClient};
pub use retry::RetryPolicy;
pub use tts::{SpeechSynthesizer, TtsAudio, TtsRequest};

use coach_core::{CoachError, ErrorKind};
use thiserror::Error;

/// Classified upstream failures.
#[derive(Error, Debug, Clone)]
pub enum UpstreamError {
    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    #[error("upstream quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("upstream timeout: {0}")]
    Timeout(String),

    #[error("upstream response invalid: {0}")]
    InvalidResponse(String),

    #[error("request blocked by safety policy: {0}")]
    BlockedBySafety(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("upstream rejected credentials: {0}")]
    Unauthorized(String),

    #[error("upstream resource not found: {0}")]
    NotFound(String),

    #[error("bridge configuration error: {0}")]
    Configuration(String),
}

impl UpstreamError {
    /// Only transient transport-level failures are retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UpstreamError::Unavailable(_) | UpstreamError::Timeout(_)
        )
    }

    /// Classify an upstream HTTP status.
    pub fn from_status(status: u16, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match status {
            401 | 403 => UpstreamError::Unauthorized(detail),
            404 => UpstreamError::NotFound(detail),
            408 => UpstreamError::Timeout(detail),
            429 => UpstreamError::QuotaExceeded(detail),
            400..=499 => UpstreamError::InvalidRequest(detail),
            _ => UpstreamError::Unavailable(detail),
        }
    }

    /// Map into the LLM slice of the core taxonomy.
    pub fn into_llm_error(self) -> CoachError {
        let message = self.to_string();
        let kind = match self {
            UpstreamError::Timeout(_) => ErrorKind::LlmTimeout,
            UpstreamError::QuotaExceeded(_) => ErrorKind::LlmQuotaExceeded,
            UpstreamError::InvalidResponse(_) | UpstreamError::BlockedBySafety(_) => {
                ErrorKind::LlmResponseInvalid
            }
            UpstreamError::Configuration(_) => ErrorKind::Configuration,
            _ => ErrorKind::LlmUnavailable,
        };
        CoachError::new(kind, message)
    }

    /// Map into the generic service slice of the core taxonomy.
    ///
    /// Upstream auth and not-found failures are reported to clients as
    /// service unavailability; a client-bound 401/404 must never leak
    /// through from an upstream.
    pub fn into_service_error(self) -> CoachError {
        let message = self.to_string();
        let kind = match self {
            UpstreamError::QuotaExceeded(_) => ErrorKind::RateLimitExceeded,
            UpstreamError::InvalidRequest(_) => ErrorKind::Validation,
            UpstreamError::Configuration(_) => ErrorKind::Configuration,
            _ => ErrorKind::ServiceUnavailable,
        };
        CoachError::new(kind, message)
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UpstreamError::Timeout(err.to_string())
        } else if err.is_connect() {
            UpstreamError::Unavailable(err.to_string())
        } else if let Some(status) = err.status() {
            UpstreamError::from_status(status.as_u16(), err.to_string())
        } else {
            UpstreamError::Unavailable(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            UpstreamError::from_status(401, "x"),
            UpstreamError::Unauthorized(_)
        ));
        assert!(matches!(
            UpstreamError::from_status(403, "x"),
            UpstreamError::Unauthorized(_)
        ));
        assert!(matches!(
            UpstreamError::from_status(404, "x"),
            UpstreamError::NotFound(_)
        ));
        assert!(matches!(
            UpstreamError::from_status(429, "x"),
            UpstreamError::QuotaExceeded(_)
        ));
        assert!(matches!(
            UpstreamError::from_status(503, "x"),
            UpstreamError::Unavailable(_)
        ));
    }

    #[test]
    fn test_retryable_classes() {
        assert!(UpstreamError::Unavailable("x".into()).is_retryable());
        assert!(UpstreamError::Timeout("x".into()).is_retryable());

        assert!(!UpstreamError::QuotaExceeded("x".into()).is_retryable());
        assert!(!UpstreamError::BlockedBySafety("x".into()).is_retryable());
        assert!(!UpstreamError::InvalidRequest("x".into()).is_retryable());
        assert!(!UpstreamError::InvalidResponse("x".into()).is_retryable());
    }

    #[test]
    fn test_auth_failures_do_not_leak_as_401() {
        let err = UpstreamError::from_status(401, "bad key").into_service_error();
        assert_eq!(err.kind, ErrorKind::ServiceUnavailable);
        assert_eq!(err.status(), 503);

        let err = UpstreamError::from_status(404, "no voice").into_service_error();
        assert_eq!(err.kind, ErrorKind::ServiceUnavailable);
    }

    #[test]
    fn test_llm_error_mapping() {
        assert_eq!(
            UpstreamError::Timeout("t".into()).into_llm_error().kind,
            ErrorKind::LlmTimeout
        );
        assert_eq!(
            UpstreamError::QuotaExceeded("q".into()).into_llm_error().kind,
            ErrorKind::LlmQuotaExceeded
        );
        assert_eq!(
            UpstreamError::Unavailable("u".into()).into_llm_error().kind,
            ErrorKind::LlmUnavailable
        );
    }
}
