//! WebSocket session channel
//!
//! One bidirectional channel per session. The socket task is the session's
//! driver: it feeds the audio ring, drains fixed-size chunks through the
//! pipeline, and forwards envelopes in ingestion order. Heartbeats and
//! control replies interleave but never pre-empt a chunk's result group.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use coach_core::{
    ChunkPriority, CoachError, Envelope, ErrorKind, Session, SessionConfig, TaggedChunk,
};
use coach_pipeline::{PipelineConfig, PipelineConfigUpdate, SessionPipeline};

use crate::metrics as server_metrics;
use crate::state::AppState;

/// Processors announced in `session_initialized`.
const PROCESSORS: [&str; 3] = ["VoiceAnalyzer", "FeedbackGenerator", "MetricsAggregator"];

/// Client-to-server messages.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    AudioChunk {
        audio_data: String,
        #[serde(default)]
        sample_rate: Option<u32>,
        #[serde(default)]
        sequence_number: Option<u64>,
        #[serde(default)]
        timestamp: Option<String>,
    },
    ControlCommand {
        command: ControlCommand,
    },
    ConfigUpdate {
        config: PipelineConfigUpdate,
    },
    Heartbeat,
    RequestSummary,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ControlCommand {
    StartSession,
    PauseSession,
    ResumeSession,
    EndSession,
}

/// Server-to-client messages that are not pipeline envelopes.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    SessionInitialized {
        session_id: Uuid,
        processors: Vec<&'static str>,
        timestamp: DateTime<Utc>,
    },
    SessionStarted {
        session_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    SessionPaused {
        session_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    SessionResumed {
        session_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    SessionEnded {
        session_id: Uuid,
        summary: coach_core::PipelineSummary,
        timestamp: DateTime<Utc>,
    },
    SessionSummary {
        session_id: Uuid,
        summary: coach_core::PipelineSummary,
        timestamp: DateTime<Utc>,
    },
    ConfigUpdated {
        session_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    Heartbeat {
        timestamp: DateTime<Utc>,
        stats: SessionStats,
    },
    HeartbeatResponse {
        timestamp: DateTime<Utc>,
        stats: SessionStats,
    },
    Error {
        error: coach_core::ErrorEnvelope,
        timestamp: DateTime<Utc>,
    },
}

/// Per-connection counters, shared with the heartbeat task.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub connected_at: DateTime<Utc>,
    pub messages_received: u64,
    pub audio_chunks_processed: u64,
    pub feedback_items_sent: u64,
    pub errors_count: u64,
}

impl SessionStats {
    fn new() -> Self {
        Self {
            connected_at: Utc::now(),
            messages_received: 0,
            audio_chunks_processed: 0,
            feedback_items_sent: 0,
            errors_count: 0,
        }
    }
}

type WsSender = Arc<tokio::sync::Mutex<SplitSink<WebSocket, Message>>>;

/// Tracks active session channels. Each session runs as an independent
/// task; this map is the only cross-session shared state.
pub struct ConnectionManager {
    sessions: DashMap<Uuid, Arc<RwLock<SessionStats>>>,
    max_sessions: usize,
}

impl ConnectionManager {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_sessions,
        }
    }

    pub fn active_sessions(&self) -> Vec<Uuid> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn stats_for(&self, session_id: Uuid) -> Option<SessionStats> {
        self.sessions
            .get(&session_id)
            .map(|entry| entry.value().read().clone())
    }

    fn register(&self, session_id: Uuid) -> Option<Arc<RwLock<SessionStats>>> {
        if self.sessions.len() >= self.max_sessions {
            return None;
        }
        let stats = Arc::new(RwLock::new(SessionStats::new()));
        self.sessions.insert(session_id, stats.clone());
        Some(stats)
    }

    fn unregister(&self, session_id: Uuid) {
        self.sessions.remove(&session_id);
    }
}

/// WebSocket upgrade handler for `/ws/session/{session_id}`.
pub async fn session_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Response, axum::http::StatusCode> {
    // Resolve or create the session before accepting the socket.
    let session = match state.store.get(session_id).await {
        Ok(Some(session)) => session,
        Ok(None) => {
            let mut session = Session::new("anonymous", SessionConfig::default());
            session.id = session_id;
            if state.store.create(&session).await.is_err() {
                return Err(axum::http::StatusCode::SERVICE_UNAVAILABLE);
            }
            session
        }
        Err(_) => return Err(axum::http::StatusCode::SERVICE_UNAVAILABLE),
    };

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, session, state)))
}

async fn handle_socket(socket: WebSocket, mut session: Session, state: AppState) {
    let session_id = session.id;

    let Some(stats) = state.connections.register(session_id) else {
        tracing::warn!(session_id = %session_id, "Max concurrent sessions reached");
        let mut socket = socket;
        let err = CoachError::new(ErrorKind::PipelineResource, "max concurrent sessions reached");
        let _ = socket
            .send(Message::Text(
                serde_json::to_string(&ServerMessage::Error {
                    error: err.to_envelope(),
                    timestamp: Utc::now(),
                })
                .unwrap_or_default(),
            ))
            .await;
        return;
    };
    server_metrics::record_ws_connection(1);

    let (audio_cfg, pipeline_cfg, receive_timeout, heartbeat_interval, max_message_bytes) = {
        let config = state.get_config();
        (
            config.audio.clone(),
            PipelineConfig {
                enable_parallel_processing: config.pipeline.enable_parallel_processing,
                chunk_timeout: Duration::from_secs_f64(config.pipeline.chunk_timeout_secs),
                feedback_frequency: session.config.feedback_frequency,
                metrics_interval: config.pipeline.metrics_interval,
            },
            Duration::from_secs(config.server.receive_timeout_secs),
            Duration::from_secs(config.server.heartbeat_interval_secs),
            config.server.max_message_bytes,
        )
    };

    let model = if session.config.ai_coaching {
        state.llm.clone()
    } else {
        None
    };
    let mut pipeline = SessionPipeline::new(
        session_id,
        session.config.language,
        audio_cfg.sample_rate,
        model,
        pipeline_cfg,
    );
    let ring = coach_core::AudioRing::new(audio_cfg.sample_rate, audio_cfg.max_buffer_seconds);
    let chunk_size = audio_cfg.chunk_size;

    let (sender, mut receiver) = socket.split();
    let sender: WsSender = Arc::new(tokio::sync::Mutex::new(sender));

    send_message(
        &sender,
        &ServerMessage::SessionInitialized {
            session_id,
            processors: PROCESSORS.to_vec(),
            timestamp: Utc::now(),
        },
    )
    .await;

    // Server-initiated heartbeats. A congested sender drops the heartbeat
    // rather than queueing behind coaching results.
    let heartbeat_task = {
        let sender = sender.clone();
        let stats = stats.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // immediate first tick is not a heartbeat
            loop {
                ticker.tick().await;
                let message = ServerMessage::Heartbeat {
                    timestamp: Utc::now(),
                    stats: stats.read().clone(),
                };
                let Ok(json) = serde_json::to_string(&message) else {
                    continue;
                };
                match sender.try_lock() {
                    Ok(mut s) => {
                        if s.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => {
                        tracing::debug!("Sender busy, heartbeat dropped");
                    }
                }
            }
        })
    };

    let mut chunk_counter: u64 = 0;

    loop {
        let received = tokio::time::timeout(receive_timeout, receiver.next()).await;
        let message = match received {
            // Quiet interval: keep waiting.
            Err(_) => continue,
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                tracing::warn!(session_id = %session_id, error = %e, "WebSocket receive error");
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) => {
                stats.write().messages_received += 1;

                if text.len() > max_message_bytes {
                    stats.write().errors_count += 1;
                    send_error(
                        &sender,
                        CoachError::new(
                            ErrorKind::ChannelMessage,
                            format!("message exceeds {max_message_bytes} bytes"),
                        ),
                    )
                    .await;
                    continue;
                }

                let parsed: Result<ClientMessage, _> = serde_json::from_str(&text);
                match parsed {
                    Ok(ClientMessage::AudioChunk {
                        audio_data,
                        sample_rate,
                        sequence_number,
                        ..
                    }) => {
                        handle_audio_chunk(
                            &sender,
                            &stats,
                            &mut pipeline,
                            &ring,
                            chunk_size,
                            &mut chunk_counter,
                            &session,
                            audio_data,
                            sample_rate,
                            sequence_number,
                        )
                        .await;
                    }
                    Ok(ClientMessage::ControlCommand { command }) => {
                        let ended = handle_control(
                            &state,
                            &sender,
                            &mut session,
                            &pipeline,
                            command,
                        )
                        .await;
                        if ended {
                            break;
                        }
                    }
                    Ok(ClientMessage::ConfigUpdate { config }) => {
                        pipeline.update_config(&config);
                        send_message(
                            &sender,
                            &ServerMessage::ConfigUpdated {
                                session_id,
                                timestamp: Utc::now(),
                            },
                        )
                        .await;
                    }
                    Ok(ClientMessage::Heartbeat) => {
                        let current_stats = stats.read().clone();
                        send_message(
                            &sender,
                            &ServerMessage::HeartbeatResponse {
                                timestamp: Utc::now(),
                                stats: current_stats,
                            },
                        )
                        .await;
                    }
                    Ok(ClientMessage::RequestSummary) => {
                        send_message(
                            &sender,
                            &ServerMessage::SessionSummary {
                                session_id,
                                summary: pipeline.summary(),
                                timestamp: Utc::now(),
                            },
                        )
                        .await;
                    }
                    Err(e) => {
                        stats.write().errors_count += 1;
                        send_error(
                            &sender,
                            CoachError::new(
                                ErrorKind::ChannelMessage,
                                format!("unknown message type: {e}"),
                            ),
                        )
                        .await;
                    }
                }
            }
            Message::Binary(data) => {
                // Raw PCM frames are accepted on the main channel too.
                stats.write().messages_received += 1;
                if data.len() > max_message_bytes {
                    stats.write().errors_count += 1;
                    send_error(
                        &sender,
                        CoachError::new(
                            ErrorKind::ChannelMessage,
                            format!("frame exceeds {max_message_bytes} bytes"),
                        ),
                    )
                    .await;
                    continue;
                }
                match ring.append_bytes(&data, Some(audio_cfg.sample_rate)) {
                    Ok(_) => {
                        drain_ring(
                            &sender,
                            &stats,
                            &mut pipeline,
                            &ring,
                            chunk_size,
                            &mut chunk_counter,
                            session_id,
                        )
                        .await;
                    }
                    Err(e) => {
                        stats.write().errors_count += 1;
                        send_error(&sender, e).await;
                    }
                }
            }
            Message::Ping(data) => {
                let mut s = sender.lock().await;
                let _ = s.send(Message::Pong(data)).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    // Teardown: persist the final summary and release everything.
    heartbeat_task.abort();
    let summary = pipeline.summary();
    if let Err(e) = state.store.store_summary(session_id, &summary).await {
        tracing::warn!(session_id = %session_id, error = %e, "Failed to persist final summary");
    }
    if !session.status().is_terminal() {
        if session.is_active() || session.status() == coach_core::SessionStatus::Paused {
            let _ = session.complete();
        }
        let _ = state.store.update(&session).await;
    }
    state.connections.unregister(session_id);
    server_metrics::record_ws_connection(-1);
    tracing::info!(session_id = %session_id, chunks = summary.chunks_processed, "WebSocket closed");
}

#[allow(clippy::too_many_arguments)]
async fn handle_audio_chunk(
    sender: &WsSender,
    stats: &Arc<RwLock<SessionStats>>,
    pipeline: &mut SessionPipeline,
    ring: &coach_core::AudioRing,
    chunk_size: usize,
    chunk_counter: &mut u64,
    session: &Session,
    audio_data: String,
    sample_rate: Option<u32>,
    _sequence_number: Option<u64>,
) {
    if session.is_expired() {
        stats.write().errors_count += 1;
        send_error(
            sender,
            CoachError::new(ErrorKind::SessionExpired, "session has expired"),
        )
        .await;
        return;
    }

    let bytes = match BASE64.decode(audio_data.as_bytes()) {
        Ok(bytes) => bytes,
        Err(e) => {
            stats.write().errors_count += 1;
            send_error(
                sender,
                CoachError::new(ErrorKind::AudioFormat, format!("invalid base64 audio: {e}")),
            )
            .await;
            return;
        }
    };

    if let Err(e) = ring.append_bytes(&bytes, sample_rate) {
        stats.write().errors_count += 1;
        send_error(sender, e).await;
        return;
    }

    drain_ring(
        sender,
        stats,
        pipeline,
        ring,
        chunk_size,
        chunk_counter,
        session.id,
    )
    .await;
}

/// Pull every full chunk from the ring through the pipeline, forwarding
/// envelopes in order.
async fn drain_ring(
    sender: &WsSender,
    stats: &Arc<RwLock<SessionStats>>,
    pipeline: &mut SessionPipeline,
    ring: &coach_core::AudioRing,
    chunk_size: usize,
    chunk_counter: &mut u64,
    session_id: Uuid,
) {
    while let Some(samples) = ring.read_chunk(chunk_size) {
        *chunk_counter += 1;
        let chunk = TaggedChunk {
            session_id,
            chunk_id: format!("{}_{}", session_id, chunk_counter),
            chunk_number: *chunk_counter,
            priority: ChunkPriority::Normal,
            timestamp: Utc::now(),
            sample_rate: ring.sample_rate(),
            samples,
        };

        let start = std::time::Instant::now();
        let envelopes = pipeline.process_chunk(chunk).await;
        server_metrics::record_chunk_processed();
        server_metrics::record_pipeline_latency(start.elapsed().as_secs_f64());

        {
            let mut s = stats.write();
            s.audio_chunks_processed += 1;
            for envelope in &envelopes {
                match envelope {
                    Envelope::RealtimeSuggestion { .. } => s.feedback_items_sent += 1,
                    Envelope::AudioProcessingError { .. } | Envelope::ProcessingError { .. } => {
                        s.errors_count += 1;
                        server_metrics::record_pipeline_error("pipeline");
                    }
                    _ => {}
                }
            }
        }

        for envelope in envelopes {
            let Ok(json) = serde_json::to_string(&envelope) else {
                continue;
            };
            let mut s = sender.lock().await;
            if s.send(Message::Text(json)).await.is_err() {
                return;
            }
        }
    }
}

/// Handle a control command; returns true when the session ended.
async fn handle_control(
    state: &AppState,
    sender: &WsSender,
    session: &mut Session,
    pipeline: &SessionPipeline,
    command: ControlCommand,
) -> bool {
    let session_id = session.id;
    let result = match command {
        ControlCommand::StartSession => session.start().map(|_| ServerMessage::SessionStarted {
            session_id,
            timestamp: Utc::now(),
        }),
        ControlCommand::PauseSession => session.pause().map(|_| ServerMessage::SessionPaused {
            session_id,
            timestamp: Utc::now(),
        }),
        ControlCommand::ResumeSession => session.resume().map(|_| ServerMessage::SessionResumed {
            session_id,
            timestamp: Utc::now(),
        }),
        ControlCommand::EndSession => session
            .complete()
            // A session that was never started is cancelled instead.
            .or_else(|_| session.cancel())
            .map(|_| ServerMessage::SessionEnded {
                session_id,
                summary: pipeline.summary(),
                timestamp: Utc::now(),
            }),
    };

    match result {
        Ok(message) => {
            if let Err(e) = state.store.update(session).await {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to persist state change");
            }
            send_message(sender, &message).await;
            matches!(command, ControlCommand::EndSession)
        }
        Err(e) => {
            send_error(sender, e).await;
            false
        }
    }
}

async fn send_message(sender: &WsSender, message: &ServerMessage) {
    let Ok(json) = serde_json::to_string(message) else {
        return;
    };
    let mut s = sender.lock().await;
    let _ = s.send(Message::Text(json)).await;
}

async fn send_error(sender: &WsSender, error: CoachError) {
    send_message(
        sender,
        &ServerMessage::Error {
            error: error.to_envelope(),
            timestamp: Utc::now(),
        },
    )
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"audio_chunk","audio_data":"AAAA","sample_rate":16000,"sequence_number":1}"#,
        )
        .unwrap();
        assert!(matches!(msg, ClientMessage::AudioChunk { .. }));

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"control_command","command":"end_session"}"#).unwrap();
        assert!(matches!(
            msg,
            ClientMessage::ControlCommand {
                command: ControlCommand::EndSession
            }
        ));

        let unknown = serde_json::from_str::<ClientMessage>(r#"{"type":"bogus"}"#);
        assert!(unknown.is_err());
    }

    #[test]
    fn test_server_message_wire_format() {
        let message = ServerMessage::SessionInitialized {
            session_id: Uuid::new_v4(),
            processors: PROCESSORS.to_vec(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "session_initialized");
        assert_eq!(json["processors"].as_array().unwrap().len(), 3);

        let heartbeat = ServerMessage::Heartbeat {
            timestamp: Utc::now(),
            stats: SessionStats::new(),
        };
        let json = serde_json::to_value(&heartbeat).unwrap();
        assert_eq!(json["type"], "heartbeat");
        assert_eq!(json["stats"]["audio_chunks_processed"], 0);
    }

    #[test]
    fn test_connection_manager_capacity() {
        let manager = ConnectionManager::new(2);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        assert!(manager.register(a).is_some());
        assert!(manager.register(b).is_some());
        assert!(manager.register(c).is_none());

        manager.unregister(a);
        assert!(manager.register(c).is_some());
        assert_eq!(manager.count(), 2);
    }
}
