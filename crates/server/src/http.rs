//! HTTP endpoints
//!
//! Session administration, file uploads, synchronous analysis, feedback,
//! analytics, TTS bridging, and health.

use axum::body::Body;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use futures::StreamExt;
use serde::Deserialize;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use coach_analysis::VoiceAnalyzer;
use coach_coaching::parse_coaching_reply;
use coach_core::{
    decode_audio, validate_audio_bytes, ChunkPriority, CoachError, Envelope, ErrorKind, Session,
    SessionConfig, TaggedChunk,
};
use coach_persistence::{FeedbackQuery, SessionQuery, SessionUpdate};
use coach_pipeline::{PipelineConfig, SessionPipeline};
use coach_upstream::{TtsRequest, UpstreamError};

use crate::avatar_ws::avatar_ws_handler;
use crate::metrics::metrics_handler;
use crate::request_id::propagate_request_id;
use crate::state::AppState;
use crate::websocket::session_ws_handler;
use crate::ApiError;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let config = state.config.read();
    let cors_layer = build_cors_layer(&config.server.cors_origins, config.server.cors_enabled);
    drop(config);

    Router::new()
        // Session administration
        .route("/api/sessions", post(create_session).get(list_sessions))
        .route(
            "/api/sessions/:id",
            get(get_session).put(update_session).delete(delete_session),
        )
        // Audio
        .route("/api/sessions/:id/audio/upload", post(upload_audio))
        .route("/api/sessions/:id/audio/analyze", post(analyze_audio))
        // Feedback and analytics
        .route(
            "/api/sessions/:id/feedback",
            get(list_feedback).post(generate_feedback),
        )
        .route("/api/sessions/:id/feedback/generate", post(generate_feedback))
        .route("/api/sessions/:id/analytics", get(session_analytics))
        // TTS bridging
        .route("/api/tts", post(synthesize_tts))
        .route("/api/tts-stream", post(tts_stream))
        // Languages
        .route("/api/languages", get(list_languages))
        // Health
        .route("/health", get(health_minimal))
        .route("/api/health", get(health_detailed))
        // Prometheus metrics
        .route("/metrics", get(metrics_handler))
        // Realtime channels
        .route("/ws/session/:session_id", get(session_ws_handler))
        .route("/ws/avatar/:session_id", get(avatar_ws_handler))
        // Middleware
        .layer(axum::middleware::from_fn(propagate_request_id))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
}

/// CORS from configured origins; permissive only when explicitly disabled.
fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        tracing::warn!("CORS is disabled - allowing all origins (NOT FOR PRODUCTION)");
        return CorsLayer::permissive();
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!("Invalid CORS origin: {}", origin);
                None
            })
        })
        .collect();

    if parsed.is_empty() {
        tracing::info!("No valid CORS origins configured, defaulting to localhost:3000");
        return CorsLayer::new()
            .allow_origin("http://localhost:3000".parse::<HeaderValue>().unwrap())
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers(Any);
    }

    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any)
}

#[derive(Debug, Deserialize)]
struct CreateSessionRequest {
    user_id: String,
    #[serde(default)]
    config: Option<SessionConfig>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

fn session_json(session: &Session) -> serde_json::Value {
    serde_json::json!({
        "id": session.id,
        "user_id": session.user_id,
        "title": session.title,
        "description": session.description,
        "config": session.config,
        "state": session.state,
        "status": session.status().as_str(),
        "created_at": session.created_at,
        "started_at": session.started_at,
        "ended_at": session.ended_at,
        "duration_seconds": session.duration_seconds,
        "expires_at": session.expires_at(),
    })
}

async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    crate::metrics::record_request("create_session");

    let config = request.config.unwrap_or_default();
    config.validate()?;

    let mut session = Session::new(request.user_id, config);
    session.title = request.title;
    session.description = request.description;

    state.store.create(&session).await?;
    tracing::info!(session_id = %session.id, user_id = %session.user_id, "Session created");

    Ok((StatusCode::CREATED, Json(session_json(&session))))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = load_session(&state, id).await?;
    Ok(Json(session_json(&session)))
}

#[derive(Debug, Deserialize)]
struct ListSessionsQuery {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_limit() -> usize {
    20
}

async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<ListSessionsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(
            serde_json::from_value(serde_json::Value::String(raw.to_string())).map_err(|_| {
                CoachError::new(ErrorKind::Validation, format!("unknown status: {raw}"))
            })?,
        ),
    };

    let sessions = state
        .store
        .list(&SessionQuery {
            user_id: query.user_id,
            status,
            limit: query.limit,
            offset: query.offset,
        })
        .await?;

    Ok(Json(serde_json::json!({
        "sessions": sessions.iter().map(session_json).collect::<Vec<_>>(),
        "count": sessions.len(),
        "limit": query.limit.clamp(1, 100),
        "offset": query.offset,
    })))
}

async fn update_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(update): Json<SessionUpdate>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut session = load_session(&state, id).await?;

    if let Some(title) = update.title {
        session.title = Some(title);
    }
    if let Some(description) = update.description {
        session.description = Some(description);
    }
    if let Some(config) = update.config {
        config.validate()?;
        session.config = config;
    }
    if let Some(status) = update.status {
        use coach_core::SessionStatus;
        match status {
            SessionStatus::Active if session.status() == SessionStatus::Paused => {
                session.resume()?
            }
            SessionStatus::Active => session.start()?,
            SessionStatus::Paused => session.pause()?,
            SessionStatus::Completed => session.complete()?,
            SessionStatus::Cancelled => session.cancel()?,
            other => {
                return Err(CoachError::new(
                    ErrorKind::Validation,
                    format!("cannot request transition to {}", other.as_str()),
                )
                .into())
            }
        }
    }

    state.store.update(&session).await?;
    Ok(Json(session_json(&session)))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    // Existence check keeps DELETE idempotent but 404-accurate.
    load_session(&state, id).await?;
    state.store.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Multipart upload: decode the whole file, run it through a one-shot
/// pipeline, and return the per-chunk results inline.
async fn upload_audio(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    crate::metrics::record_request("upload_audio");
    let session = load_session(&state, id).await?;

    let (max_bytes, extensions, sample_rate, chunk_size) = {
        let config = state.get_config();
        (
            config.audio.max_upload_bytes,
            config.audio.supported_extensions.clone(),
            config.audio.sample_rate,
            config.audio.chunk_size,
        )
    };

    let mut file_bytes: Option<Vec<u8>> = None;
    let mut file_name = String::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| CoachError::new(ErrorKind::Validation, format!("bad multipart body: {e}")))?
    {
        if field.name() == Some("file") || field.name() == Some("audio") {
            file_name = field.file_name().unwrap_or("upload").to_string();
            let data = field.bytes().await.map_err(|e| {
                CoachError::new(ErrorKind::Validation, format!("failed reading upload: {e}"))
            })?;
            file_bytes = Some(data.to_vec());
        }
    }

    let data = file_bytes
        .ok_or_else(|| CoachError::new(ErrorKind::Validation, "missing file field"))?;

    if data.len() > max_bytes {
        return Err(CoachError::new(
            ErrorKind::AudioTooLarge,
            format!("file is {} bytes (max {})", data.len(), max_bytes),
        )
        .into());
    }

    let extension = file_name.rsplit('.').next().unwrap_or("").to_lowercase();
    if !extensions.iter().any(|e| e == &extension) {
        return Err(CoachError::new(
            ErrorKind::AudioFormat,
            format!("unsupported file type .{extension}"),
        )
        .with_detail("supported", extensions.join(","))
        .into());
    }

    let validation = validate_audio_bytes(&data, max_bytes, sample_rate);
    let decoded = decode_audio(&data, None, sample_rate)?;

    // Whole-file analysis for the top-level report.
    let mut analyzer = VoiceAnalyzer::new(session.config.language, sample_rate);
    let audio_analysis = analyzer.analyze(&decoded.samples)?;

    // One-shot pipeline pass over fixed-size chunks.
    let model = if session.config.ai_coaching {
        state.llm.clone()
    } else {
        None
    };
    let pipeline_cfg = {
        let config = state.get_config();
        PipelineConfig {
            enable_parallel_processing: config.pipeline.enable_parallel_processing,
            chunk_timeout: Duration::from_secs_f64(config.pipeline.chunk_timeout_secs),
            feedback_frequency: session.config.feedback_frequency,
            metrics_interval: config.pipeline.metrics_interval,
        }
    };
    let mut pipeline = SessionPipeline::new(
        session.id,
        session.config.language,
        sample_rate,
        model,
        pipeline_cfg,
    );

    let mut envelopes: Vec<Envelope> = Vec::new();
    for (index, chunk) in decoded.samples.chunks(chunk_size).enumerate() {
        if chunk.len() < chunk_size {
            break; // trailing partial chunk is below the analysis minimum
        }
        let number = index as u64 + 1;
        let tagged = TaggedChunk {
            session_id: session.id,
            chunk_id: format!("{}_upload_{}", session.id, number),
            chunk_number: number,
            priority: ChunkPriority::Normal,
            timestamp: Utc::now(),
            samples: chunk.to_vec(),
            sample_rate,
        };
        envelopes.extend(pipeline.process_chunk(tagged).await);
    }

    // Persist produced feedback to the append-only log.
    for envelope in &envelopes {
        if let Envelope::CoachingResult(result) = envelope {
            for item in &result.coaching_feedback.items {
                let _ = state.store.append_feedback(session.id, item).await;
            }
        }
    }

    let blob_path = if session.config.store_audio {
        Some(state.store.store_audio(session.id, &data).await?)
    } else {
        None
    };

    Ok(Json(serde_json::json!({
        "session_id": session.id,
        "file_name": file_name,
        "validation": validation,
        "audio_analysis": audio_analysis,
        "results": envelopes,
        "summary": pipeline.summary(),
        "audio_blob": blob_path,
    })))
}

#[derive(Debug, Deserialize)]
struct AnalyzeRequest {
    #[serde(default)]
    audio_base64: Option<String>,
    #[serde(default)]
    audio_array: Option<Vec<f32>>,
    #[serde(default)]
    sample_rate: Option<u32>,
}

/// Synchronous chunk analysis from JSON audio.
async fn analyze_audio(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = load_session(&state, id).await?;
    let canonical_rate = state.get_config().audio.sample_rate;

    let samples = if let Some(array) = request.audio_array {
        let source_rate = request.sample_rate.unwrap_or(canonical_rate);
        if source_rate != canonical_rate {
            coach_core::resample(&array, source_rate, canonical_rate)
        } else {
            array
        }
    } else if let Some(encoded) = request.audio_base64 {
        use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
        let bytes = BASE64.decode(encoded.as_bytes()).map_err(|e| {
            CoachError::new(ErrorKind::AudioFormat, format!("invalid base64 audio: {e}"))
        })?;
        decode_audio(&bytes, request.sample_rate, canonical_rate)?.samples
    } else {
        return Err(CoachError::new(
            ErrorKind::Validation,
            "one of audio_array or audio_base64 is required",
        )
        .into());
    };

    let mut analyzer = VoiceAnalyzer::new(session.config.language, canonical_rate);
    let metrics = analyzer.analyze(&samples)?;

    Ok(Json(serde_json::json!({
        "session_id": session.id,
        "analysis": metrics,
        "timestamp": Utc::now(),
    })))
}

#[derive(Debug, Deserialize)]
struct FeedbackListQuery {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

async fn list_feedback(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<FeedbackListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    load_session(&state, id).await?;

    let kind = match query.kind.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(
            serde_json::from_value(serde_json::Value::String(raw.to_string())).map_err(|_| {
                CoachError::new(ErrorKind::Validation, format!("unknown feedback type: {raw}"))
            })?,
        ),
    };

    let feedback = state
        .store
        .list_feedback(
            id,
            &FeedbackQuery {
                kind,
                limit: query.limit,
                offset: query.offset,
            },
        )
        .await?;

    let count = feedback.len();
    Ok(Json(serde_json::json!({
        "session_id": id,
        "feedback": feedback,
        "count": count,
    })))
}

/// Generate session-level coaching feedback on demand.
///
/// Uses the coaching model when configured, otherwise the deterministic
/// fallback reply.
async fn generate_feedback(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = load_session(&state, id).await?;
    let language = session.config.language;
    let profile = coach_config::language_profile(language);

    let stored = state
        .store
        .list_feedback(
            id,
            &FeedbackQuery {
                kind: None,
                limit: 100,
                offset: 0,
            },
        )
        .await?;

    let themes: Vec<String> = {
        use std::collections::BTreeMap;
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for entry in &stored {
            *counts.entry(entry.item.kind.as_str()).or_insert(0) += 1;
        }
        counts.into_iter().map(|(k, n)| format!("{k} ({n})")).collect()
    };

    let reply = if let Some(model) = &state.llm {
        let prompt = match language {
            coach_core::Language::French => format!(
                "Tu es un coach de présentation. Résume la session et donne un feedback \
                 global en français. Thèmes observés: {}. Style: {}. Réponds UNIQUEMENT en \
                 JSON avec les clés feedback_summary, strengths, improvements (area, \
                 current_issue, actionable_tip, why_important), encouragement, next_focus.",
                themes.join(", "),
                profile.coaching_style
            ),
            coach_core::Language::English => format!(
                "You are a presentation coach. Summarize the session and give overall \
                 feedback in English. Observed themes: {}. Style: {}. Reply with ONLY \
                 JSON with keys feedback_summary, strengths, improvements (area, \
                 current_issue, actionable_tip, why_important), encouragement, next_focus.",
                themes.join(", "),
                profile.coaching_style
            ),
        };

        let deadline = Duration::from_secs(state.get_config().llm.timeout_secs);
        match tokio::time::timeout(deadline, model.generate(&prompt)).await {
            Ok(Ok(raw)) => parse_coaching_reply(&raw, language),
            Ok(Err(e)) => {
                tracing::warn!(session_id = %id, error = %e, "Session feedback generation failed");
                None
            }
            Err(_) => None,
        }
    } else {
        None
    };

    let (reply, source) = match reply {
        Some(reply) => (reply, "llm"),
        None => (
            coach_core::CoachingReply {
                feedback_summary: coach_config::ui_message(
                    "fallback_summary",
                    language,
                    "Keep practicing.",
                )
                .to_string(),
                strengths: vec![coach_config::ui_message(
                    "fallback_strength",
                    language,
                    "Good rhythm",
                )
                .to_string()],
                improvements: Vec::new(),
                encouragement: coach_config::ui_message(
                    "fallback_encouragement",
                    language,
                    "Keep going!",
                )
                .to_string(),
                next_focus: coach_config::ui_message(
                    "fallback_next_focus",
                    language,
                    "Consistency",
                )
                .to_string(),
            },
            "fallback",
        ),
    };

    Ok(Json(serde_json::json!({
        "session_id": id,
        "feedback": reply,
        "source": source,
        "themes": themes,
        "timestamp": Utc::now(),
    })))
}

#[derive(Debug, Deserialize)]
struct AnalyticsQuery {
    #[serde(default)]
    include_trends: bool,
    #[serde(default)]
    include_benchmarks: bool,
}

async fn session_analytics(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = load_session(&state, id).await?;

    let feedback = state
        .store
        .list_feedback(
            id,
            &FeedbackQuery {
                kind: None,
                limit: 100,
                offset: 0,
            },
        )
        .await?;

    let mut body = serde_json::json!({
        "session_id": id,
        "status": session.status().as_str(),
        "chunks_processed": session.state.chunks_processed,
        "processing_errors": session.state.processing_errors,
        "feedback_count": feedback.len(),
        "duration_seconds": session.duration_seconds,
    });

    if query.include_trends {
        use std::collections::BTreeMap;
        let mut by_kind: BTreeMap<&str, usize> = BTreeMap::new();
        for entry in &feedback {
            *by_kind.entry(entry.item.kind.as_str()).or_insert(0) += 1;
        }
        body["feedback_by_kind"] = serde_json::to_value(by_kind).unwrap_or_default();
    }

    if query.include_benchmarks {
        let profile = coach_config::language_profile(session.config.language);
        body["benchmarks"] = serde_json::to_value(&profile.benchmarks).unwrap_or_default();
    }

    Ok(Json(body))
}

async fn list_languages() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "languages": coach_config::supported_languages(),
    }))
}

/// Synchronous TTS.
async fn synthesize_tts(
    State(state): State<AppState>,
    Json(request): Json<TtsRequest>,
) -> Result<Response, ApiError> {
    crate::metrics::record_request("tts");
    let Some(tts) = &state.tts else {
        return Err(CoachError::new(ErrorKind::ServiceUnavailable, "TTS is not configured").into());
    };

    let audio = tts
        .synthesize(&request)
        .await
        .map_err(UpstreamError::into_service_error)?;

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, audio.content_type.clone())
        .header("X-Voice-Id", audio.voice_id.clone())
        .body(Body::from(audio.audio))
        .map_err(|e| CoachError::new(ErrorKind::ServiceUnavailable, e.to_string()))?;
    Ok(response)
}

/// Streaming TTS proxy.
///
/// Always answers `audio/mpeg`; on upstream failure the body is a single
/// JSON error frame (leading `{`) and the stream ends.
async fn tts_stream(
    State(state): State<AppState>,
    Json(request): Json<TtsRequest>,
) -> Response {
    crate::metrics::record_request("tts_stream");

    let error_frame = |status: u16, message: String| -> Response {
        let frame = serde_json::json!({
            "error": true,
            "upstream_status": status,
            "message": message,
        });
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "audio/mpeg")
            .body(Body::from(frame.to_string()))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    };

    let Some(tts) = &state.tts else {
        return error_frame(503, "TTS is not configured".to_string());
    };

    match tts.open_stream(&request).await {
        Ok((upstream, voice_id)) => {
            let stream = upstream.bytes_stream().map(|chunk| match chunk {
                Ok(bytes) => {
                    crate::metrics::record_tts_bytes_forwarded(bytes.len() as u64);
                    Ok::<_, std::io::Error>(bytes)
                }
                Err(e) => Err(std::io::Error::other(e)),
            });

            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "audio/mpeg")
                .header("X-Voice-Id", voice_id)
                .body(Body::from_stream(stream))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        Err(err) => {
            let status = match &err {
                UpstreamError::NotFound(_) => 404,
                UpstreamError::InvalidRequest(_) => 400,
                UpstreamError::QuotaExceeded(_) => 429,
                UpstreamError::Timeout(_) => 504,
                // Upstream auth failures surface as unavailability.
                _ => 503,
            };
            tracing::warn!(upstream_status = status, "TTS stream failed before first byte");
            error_frame(status, err.to_string())
        }
    }
}

/// Minimal liveness probe.
async fn health_minimal() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now(),
    }))
}

/// Detailed health with per-service status; 200 healthy, 503 degraded.
async fn health_detailed(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let mut services = serde_json::Map::new();
    let mut healthy = true;

    // Storage: a probe read must succeed.
    let storage_ok = state.store.get(Uuid::new_v4()).await.is_ok();
    services.insert(
        "storage".to_string(),
        serde_json::json!({ "status": if storage_ok { "ok" } else { "error" } }),
    );
    healthy &= storage_ok;

    services.insert(
        "llm".to_string(),
        serde_json::json!({
            "status": if state.llm.is_some() { "ok" } else { "not_configured" }
        }),
    );
    services.insert(
        "tts".to_string(),
        serde_json::json!({
            "status": if state.tts.is_some() { "ok" } else { "not_configured" }
        }),
    );
    services.insert(
        "avatar".to_string(),
        serde_json::json!({
            "status": if state.avatar.is_some() { "ok" } else { "not_configured" }
        }),
    );
    services.insert(
        "sessions".to_string(),
        serde_json::json!({
            "status": "ok",
            "active": state.connections.count(),
        }),
    );

    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status_code,
        Json(serde_json::json!({
            "status": if healthy { "healthy" } else { "degraded" },
            "version": env!("CARGO_PKG_VERSION"),
            "services": services,
            "timestamp": Utc::now(),
        })),
    )
}

async fn load_session(state: &AppState, id: Uuid) -> Result<Session, CoachError> {
    state
        .store
        .get(id)
        .await?
        .ok_or_else(|| CoachError::new(ErrorKind::SessionNotFound, format!("session {id} not found")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use coach_config::Settings;

    #[test]
    fn test_router_creation() {
        let state = AppState::new(Settings::default());
        let _ = create_router(state);
    }

    #[test]
    fn test_error_frame_shape() {
        // The error frame the stream proxy sends must parse as JSON with
        // error=true so clients can distinguish it from audio bytes.
        let frame = serde_json::json!({
            "error": true,
            "upstream_status": 404,
            "message": "voice not found",
        });
        let text = frame.to_string();
        assert!(text.starts_with('{'));
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["error"], true);
        assert_eq!(parsed["upstream_status"], 404);
    }
}
