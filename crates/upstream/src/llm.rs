//! Generative LLM bridge
//!
//! Request-response client for the coaching model. Replies are expected to
//! be JSON; schema validation happens in the feedback generator.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use coach_config::LlmSettings;

use crate::{RetryPolicy, UpstreamError};

/// Minimal capability the feedback generator needs from a language model.
#[async_trait]
pub trait CoachingModel: Send + Sync {
    /// Generate a completion for the prompt.
    async fn generate(&self, prompt: &str) -> Result<String, UpstreamError>;
}

/// HTTP client for a generative-language endpoint.
#[derive(Debug)]
pub struct GenerativeLlmClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    retry: RetryPolicy,
}

impl GenerativeLlmClient {
    pub fn new(settings: &LlmSettings) -> Result<Self, UpstreamError> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                UpstreamError::Configuration(
                    "LLM API key not set (GEMINI_API_KEY)".to_string(),
                )
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| UpstreamError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            api_key,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn generate_once(&self, prompt: &str) -> Result<String, UpstreamError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.endpoint, self.model
        );

        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": { "temperature": 0.7 }
        });

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            // The body may carry request ids but must not reach logs with
            // credentials; the key only ever travels in the header.
            let detail = response.text().await.unwrap_or_default();
            let detail = detail.chars().take(200).collect::<String>();
            return Err(UpstreamError::from_status(status.as_u16(), detail));
        }

        let reply: GenerateReply = response
            .json()
            .await
            .map_err(|e| UpstreamError::InvalidResponse(e.to_string()))?;

        if let Some(feedback) = reply.prompt_feedback {
            if let Some(reason) = feedback.block_reason {
                return Err(UpstreamError::BlockedBySafety(reason));
            }
        }

        let candidate = reply
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| UpstreamError::InvalidResponse("no candidates in reply".to_string()))?;

        if candidate.finish_reason.as_deref() == Some("SAFETY") {
            return Err(UpstreamError::BlockedBySafety(
                "candidate stopped for safety".to_string(),
            ));
        }

        let text = candidate
            .content
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(UpstreamError::InvalidResponse(
                "empty completion".to_string(),
            ));
        }

        Ok(text)
    }
}

#[async_trait]
impl CoachingModel for GenerativeLlmClient {
    async fn generate(&self, prompt: &str) -> Result<String, UpstreamError> {
        self.retry.run(|| self.generate_once(prompt)).await
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateReply {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_is_configuration_error() {
        let settings = LlmSettings {
            api_key: None,
            ..Default::default()
        };
        let err = GenerativeLlmClient::new(&settings).unwrap_err();
        assert!(matches!(err, UpstreamError::Configuration(_)));
    }

    #[test]
    fn test_reply_deserialization() {
        let raw = serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": "{\"a\":1}" }] },
                "finishReason": "STOP"
            }]
        });
        let reply: GenerateReply = serde_json::from_value(raw).unwrap();
        assert_eq!(reply.candidates.len(), 1);
        let candidate = &reply.candidates[0];
        assert_eq!(candidate.finish_reason.as_deref(), Some("STOP"));
    }

    #[test]
    fn test_blocked_reply_shape() {
        let raw = serde_json::json!({
            "candidates": [],
            "promptFeedback": { "blockReason": "SAFETY" }
        });
        let reply: GenerateReply = serde_json::from_value(raw).unwrap();
        assert_eq!(
            reply.prompt_feedback.unwrap().block_reason.as_deref(),
            Some("SAFETY")
        );
    }
}
