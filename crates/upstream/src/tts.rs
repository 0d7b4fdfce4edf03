//! Text-to-speech bridge
//!
//! Synchronous synthesis plus a chunked streaming entry point for the
//! `/tts-stream` proxy. Voice aliases are normalized to ids; an unknown
//! alias falls back to the default voice, never to a 404-inducing value.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use coach_config::TtsSettings;

use crate::UpstreamError;

/// Known-good voice used when nothing else resolves.
const FALLBACK_VOICE_ID: &str = "21m00Tcm4TlvDq8ikWAM";

/// Premade voice aliases shipped by the upstream.
const VOICE_ALIASES: &[(&str, &str)] = &[
    ("rachel", "21m00Tcm4TlvDq8ikWAM"),
    ("domi", "AZnzlk1XvdvUeBnXmlld"),
    ("bella", "EXAVITQu4vr4xnSDxMaL"),
    ("antoni", "ErXwobaYiN019PkySvjV"),
    ("josh", "TxGEqnHWrfWFTfGW9XjX"),
    ("adam", "pNInz6obpgDQGcFmaJgB"),
];

/// Synthesis request.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TtsRequest {
    pub text: String,
    #[serde(default)]
    pub voice_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub output_format: Option<String>,
    #[serde(default)]
    pub sample_rate: Option<u32>,
}

/// Synthesis result.
#[derive(Debug, Clone)]
pub struct TtsAudio {
    pub audio: Vec<u8>,
    pub content_type: String,
    pub sample_rate: u32,
    pub voice_id: String,
    pub model: String,
}

/// Synchronous HTTP TTS client.
#[derive(Debug)]
pub struct SpeechSynthesizer {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    default_voice: String,
    model: String,
    sample_rate: u32,
}

impl SpeechSynthesizer {
    pub fn new(settings: &TtsSettings) -> Result<Self, UpstreamError> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                UpstreamError::Configuration(
                    "TTS API key not set (ELEVENLABS_API_KEY)".to_string(),
                )
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| UpstreamError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            api_key,
            default_voice: settings.default_voice.clone(),
            model: settings.model.clone(),
            sample_rate: settings.sample_rate,
        })
    }

    /// Resolve a requested voice to an upstream id.
    ///
    /// Precedence: explicit request, configured default, hard-coded
    /// known-good default. Textual aliases map to ids; an unknown alias
    /// resolves to the default with a warning.
    pub fn resolve_voice(&self, requested: Option<&str>) -> String {
        let candidate = requested
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(&self.default_voice);

        if let Some(id) = normalize_voice(candidate) {
            return id;
        }

        tracing::warn!(voice = %candidate, "Unknown voice alias, using default");
        normalize_voice(&self.default_voice).unwrap_or_else(|| FALLBACK_VOICE_ID.to_string())
    }

    /// Synthesize speech synchronously.
    pub async fn synthesize(&self, request: &TtsRequest) -> Result<TtsAudio, UpstreamError> {
        if request.text.trim().is_empty() {
            return Err(UpstreamError::InvalidRequest("text is empty".to_string()));
        }

        let voice_id = self.resolve_voice(request.voice_id.as_deref());
        let model = request.model.clone().unwrap_or_else(|| self.model.clone());
        let sample_rate = request.sample_rate.unwrap_or(self.sample_rate);

        let url = format!("{}/v1/text-to-speech/{}", self.endpoint, voice_id);
        let body = serde_json::json!({
            "text": request.text,
            "model_id": model,
            "output_format": request.output_format.clone().unwrap_or_else(|| "mp3_44100_128".to_string()),
        });

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let detail = detail.chars().take(200).collect::<String>();
            return Err(UpstreamError::from_status(status.as_u16(), detail));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("audio/mpeg")
            .to_string();

        let audio = response.bytes().await.map_err(UpstreamError::from)?.to_vec();
        if audio.is_empty() {
            return Err(UpstreamError::InvalidResponse(
                "upstream returned no audio".to_string(),
            ));
        }

        Ok(TtsAudio {
            audio,
            content_type,
            sample_rate,
            voice_id,
            model,
        })
    }

    /// Open a chunked synthesis stream.
    ///
    /// Returns the raw upstream response for byte-level proxying. An
    /// upstream status >= 400 is classified and returned as an error so the
    /// caller can emit a single JSON error frame instead of audio.
    pub async fn open_stream(
        &self,
        request: &TtsRequest,
    ) -> Result<(reqwest::Response, String), UpstreamError> {
        if request.text.trim().is_empty() {
            return Err(UpstreamError::InvalidRequest("text is empty".to_string()));
        }

        let voice_id = self.resolve_voice(request.voice_id.as_deref());
        let model = request.model.clone().unwrap_or_else(|| self.model.clone());

        let url = format!("{}/v1/text-to-speech/{}/stream", self.endpoint, voice_id);
        let body = serde_json::json!({
            "text": request.text,
            "model_id": model,
        });

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let detail = detail.chars().take(200).collect::<String>();
            return Err(UpstreamError::from_status(status.as_u16(), detail));
        }

        Ok((response, voice_id))
    }
}

/// Map a voice string to an upstream id, or `None` for an unknown alias.
///
/// Values that already look like upstream ids pass through unchanged.
fn normalize_voice(voice: &str) -> Option<String> {
    let trimmed = voice.trim();
    // Upstream ids are 20-char alphanumeric tokens.
    if trimmed.len() == 20 && trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Some(trimmed.to_string());
    }
    let lower = trimmed.to_lowercase();
    VOICE_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .map(|(_, id)| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthesizer() -> SpeechSynthesizer {
        let settings = TtsSettings {
            api_key: Some("test-key".to_string()),
            default_voice: "Rachel".to_string(),
            ..Default::default()
        };
        SpeechSynthesizer::new(&settings).unwrap()
    }

    #[test]
    fn test_alias_resolution() {
        let tts = synthesizer();
        assert_eq!(tts.resolve_voice(Some("Rachel")), "21m00Tcm4TlvDq8ikWAM");
        assert_eq!(tts.resolve_voice(Some("JOSH")), "TxGEqnHWrfWFTfGW9XjX");
    }

    #[test]
    fn test_explicit_id_passes_through() {
        let tts = synthesizer();
        assert_eq!(
            tts.resolve_voice(Some("AZnzlk1XvdvUeBnXmlld")),
            "AZnzlk1XvdvUeBnXmlld"
        );
    }

    #[test]
    fn test_unknown_alias_falls_back_to_default() {
        let tts = synthesizer();
        // Never forwards an unknown alias upstream.
        assert_eq!(tts.resolve_voice(Some("not-a-voice")), "21m00Tcm4TlvDq8ikWAM");
    }

    #[test]
    fn test_missing_request_uses_default() {
        let tts = synthesizer();
        assert_eq!(tts.resolve_voice(None), "21m00Tcm4TlvDq8ikWAM");
        assert_eq!(tts.resolve_voice(Some("  ")), "21m00Tcm4TlvDq8ikWAM");
    }

    #[test]
    fn test_missing_key_is_configuration_error() {
        let settings = TtsSettings {
            api_key: None,
            ..Default::default()
        };
        assert!(matches!(
            SpeechSynthesizer::new(&settings).unwrap_err(),
            UpstreamError::Configuration(_)
        ));
    }
}
