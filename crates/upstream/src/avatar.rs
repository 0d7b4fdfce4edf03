//! Avatar realtime bridge
//!
//! Client side of the two-direction tunnel to the talking-avatar upstream.
//! The server crate pumps frames between the client channel and the
//! upstream socket; this module owns URL resolution, the upstream
//! handshake, and the tunnel frame protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use coach_config::AvatarSettings;

use crate::UpstreamError;

/// Upstream websocket pattern used only when explicitly enabled.
const WS_URL_FALLBACK_PATTERN: &str = "wss://realtime.api.d-id.com/v1/agents";

/// Stages reported through `avatar.meta`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamStage {
    Accepted,
    UpstreamConnected,
}

/// Error codes surfaced on `avatar.error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AvatarErrorCode {
    #[serde(rename = "CONNECT_FAILED")]
    ConnectFailed,
    #[serde(rename = "SERVICE_INIT_FAILED")]
    ServiceInitFailed,
    #[serde(rename = "UPSTREAM_HTTP_ERROR")]
    UpstreamHttpError,
    #[serde(rename = "STREAM_EXCEPTION")]
    StreamException,
}

/// Control frames from the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AvatarClientFrame {
    #[serde(rename = "avatar.start")]
    Start {
        #[serde(default)]
        agent_id: Option<String>,
    },
    #[serde(rename = "avatar.forward")]
    Forward { data: Value },
    #[serde(rename = "avatar.end")]
    End,
}

/// Frames the server emits to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AvatarServerFrame {
    #[serde(rename = "avatar.meta")]
    Meta { stage: UpstreamStage },
    #[serde(rename = "avatar.started")]
    Started,
    #[serde(rename = "avatar.upstream")]
    Upstream { json: Value },
    #[serde(rename = "avatar.upstream_text")]
    UpstreamText { text: String },
    #[serde(rename = "avatar.end")]
    End,
    #[serde(rename = "avatar.error")]
    Error {
        code: AvatarErrorCode,
        message: String,
    },
}

/// Agent record returned by the avatar service.
#[derive(Debug, Deserialize)]
struct AgentRecord {
    #[serde(rename = "wsUrl")]
    ws_url: Option<String>,
    websocket_url: Option<String>,
    streams_url: Option<String>,
}

pub type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection factory for the avatar upstream.
#[derive(Debug)]
pub struct AvatarBridge {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    ws_base: Option<String>,
    allow_url_fallback: bool,
}

impl AvatarBridge {
    pub fn new(settings: &AvatarSettings) -> Result<Self, UpstreamError> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                UpstreamError::Configuration("avatar API key not set (AVATAR_API_KEY)".to_string())
            })?;

        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            api_key,
            ws_base: settings.ws_base.clone(),
            allow_url_fallback: settings.allow_url_fallback,
        })
    }

    /// Resolve the upstream websocket URL for an agent.
    ///
    /// Precedence: configured base, URL field on the agent record, then the
    /// hard-coded pattern iff `allow_url_fallback` is set.
    pub async fn resolve_ws_url(&self, agent_id: &str) -> Result<String, UpstreamError> {
        if let Some(base) = &self.ws_base {
            return Ok(format!("{}/{}/streams", base.trim_end_matches('/'), agent_id));
        }

        match self.fetch_agent(agent_id).await {
            Ok(record) => {
                if let Some(url) = record
                    .ws_url
                    .or(record.websocket_url)
                    .or(record.streams_url)
                {
                    return Ok(url);
                }
                tracing::warn!(agent_id, "Agent record carries no websocket URL");
            }
            Err(err) => {
                tracing::warn!(agent_id, error = %err, "Agent record lookup failed");
                if !self.allow_url_fallback {
                    return Err(err);
                }
            }
        }

        if self.allow_url_fallback {
            Ok(format!("{}/{}/streams", WS_URL_FALLBACK_PATTERN, agent_id))
        } else {
            Err(UpstreamError::InvalidResponse(
                "agent record lacks a websocket URL and URL fallback is disabled".to_string(),
            ))
        }
    }

    async fn fetch_agent(&self, agent_id: &str) -> Result<AgentRecord, UpstreamError> {
        let url = format!("{}/agents/{}", self.endpoint, agent_id);
        let response = self
            .client
            .get(&url)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Basic {}", self.api_key),
            )
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let detail = detail.chars().take(200).collect::<String>();
            return Err(UpstreamError::from_status(status.as_u16(), detail));
        }

        response
            .json()
            .await
            .map_err(|e| UpstreamError::InvalidResponse(e.to_string()))
    }

    /// Open the upstream websocket for an agent.
    pub async fn connect(&self, agent_id: &str) -> Result<UpstreamSocket, UpstreamError> {
        let url = self.resolve_ws_url(agent_id).await?;

        let mut request = url
            .clone()
            .into_client_request()
            .map_err(|e| UpstreamError::InvalidRequest(e.to_string()))?;
        request.headers_mut().insert(
            "Authorization",
            format!("Basic {}", self.api_key)
                .parse()
                .map_err(|_| UpstreamError::Configuration("invalid API key bytes".to_string()))?,
        );

        let (socket, _) = connect_async(request)
            .await
            .map_err(|e| UpstreamError::Unavailable(format!("upstream handshake failed: {e}")))?;

        tracing::info!(agent_id, "Avatar upstream connected");
        Ok(socket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(ws_base: Option<&str>, fallback: bool) -> AvatarSettings {
        AvatarSettings {
            api_key: Some("key".to_string()),
            endpoint: "https://api.example.test".to_string(),
            ws_base: ws_base.map(String::from),
            allow_url_fallback: fallback,
        }
    }

    #[tokio::test]
    async fn test_configured_base_takes_precedence() {
        let bridge = AvatarBridge::new(&settings(Some("wss://ws.example.test/agents"), false)).unwrap();
        let url = bridge.resolve_ws_url("agent-1").await.unwrap();
        assert_eq!(url, "wss://ws.example.test/agents/agent-1/streams");
    }

    #[test]
    fn test_frame_wire_format() {
        let frame = AvatarServerFrame::Meta {
            stage: UpstreamStage::Accepted,
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "avatar.meta");
        assert_eq!(json["stage"], "accepted");

        let error = AvatarServerFrame::Error {
            code: AvatarErrorCode::ConnectFailed,
            message: "boom".to_string(),
        };
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["type"], "avatar.error");
        assert_eq!(json["code"], "CONNECT_FAILED");
    }

    #[test]
    fn test_client_frame_parsing() {
        let start: AvatarClientFrame =
            serde_json::from_str(r#"{"type":"avatar.start","agent_id":"a1"}"#).unwrap();
        assert!(matches!(start, AvatarClientFrame::Start { agent_id: Some(ref id) } if id == "a1"));

        let forward: AvatarClientFrame =
            serde_json::from_str(r#"{"type":"avatar.forward","data":{"k":1}}"#).unwrap();
        assert!(matches!(forward, AvatarClientFrame::Forward { .. }));

        let end: AvatarClientFrame = serde_json::from_str(r#"{"type":"avatar.end"}"#).unwrap();
        assert!(matches!(end, AvatarClientFrame::End));
    }

    #[test]
    fn test_missing_key_is_configuration_error() {
        let mut s = settings(None, false);
        s.api_key = None;
        assert!(matches!(
            AvatarBridge::new(&s).unwrap_err(),
            UpstreamError::Configuration(_)
        ));
    }
}
