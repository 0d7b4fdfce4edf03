//! Avatar realtime tunnel
//!
//! Two-direction WebSocket bridge between a client channel and the avatar
//! upstream. Exactly one `avatar.meta {stage: accepted}` is sent before any
//! other frame; `upstream_connected` follows iff the upstream handshake
//! succeeds. Binary media frames pass through verbatim in both directions.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use uuid::Uuid;

use coach_upstream::avatar::AvatarClientFrame;
use coach_upstream::{AvatarErrorCode, AvatarServerFrame, UpstreamStage};

use crate::state::AppState;

/// How long to wait for the client's `avatar.start`.
const START_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn avatar_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Response {
    ws.on_upgrade(move |socket| handle_avatar_socket(socket, session_id, state))
}

async fn send_frame(socket: &mut WebSocket, frame: &AvatarServerFrame) -> bool {
    match serde_json::to_string(frame) {
        Ok(json) => socket.send(Message::Text(json)).await.is_ok(),
        Err(_) => false,
    }
}

async fn handle_avatar_socket(mut socket: WebSocket, session_id: Uuid, state: AppState) {
    // The accepted stage always goes out first.
    if !send_frame(
        &mut socket,
        &AvatarServerFrame::Meta {
            stage: UpstreamStage::Accepted,
        },
    )
    .await
    {
        return;
    }

    let Some(bridge) = state.avatar.clone() else {
        let _ = send_frame(
            &mut socket,
            &AvatarServerFrame::Error {
                code: AvatarErrorCode::ServiceInitFailed,
                message: "avatar upstream is not configured".to_string(),
            },
        )
        .await;
        return;
    };

    // Wait for the client to ask for a stream.
    let agent_id = loop {
        let received = tokio::time::timeout(START_TIMEOUT, socket.recv()).await;
        let message = match received {
            Err(_) | Ok(None) => return,
            Ok(Some(Err(_))) => return,
            Ok(Some(Ok(message))) => message,
        };
        match message {
            Message::Text(text) => match serde_json::from_str::<AvatarClientFrame>(&text) {
                Ok(AvatarClientFrame::Start { agent_id }) => match agent_id {
                    Some(agent_id) => break agent_id,
                    None => {
                        let _ = send_frame(
                            &mut socket,
                            &AvatarServerFrame::Error {
                                code: AvatarErrorCode::ServiceInitFailed,
                                message: "avatar.start requires agent_id".to_string(),
                            },
                        )
                        .await;
                        return;
                    }
                },
                Ok(AvatarClientFrame::End) => return,
                _ => continue,
            },
            Message::Close(_) => return,
            _ => continue,
        }
    };

    let upstream = match bridge.connect(&agent_id).await {
        Ok(upstream) => upstream,
        Err(err) => {
            tracing::warn!(session_id = %session_id, error = %err, "Avatar upstream connect failed");
            let _ = send_frame(
                &mut socket,
                &AvatarServerFrame::Error {
                    code: AvatarErrorCode::ConnectFailed,
                    message: err.to_string(),
                },
            )
            .await;
            return;
        }
    };

    if !send_frame(
        &mut socket,
        &AvatarServerFrame::Meta {
            stage: UpstreamStage::UpstreamConnected,
        },
    )
    .await
    {
        return;
    }
    let _ = send_frame(&mut socket, &AvatarServerFrame::Started).await;

    let (mut upstream_tx, mut upstream_rx) = upstream.split();
    let (mut client_tx, mut client_rx) = socket.split();

    let mut client_result: Result<(), ()> = Ok(());

    loop {
        tokio::select! {
            client_msg = client_rx.next() => {
                match client_msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<AvatarClientFrame>(&text) {
                            Ok(AvatarClientFrame::Forward { data }) => {
                                if upstream_tx
                                    .send(UpstreamMessage::Text(data.to_string()))
                                    .await
                                    .is_err()
                                {
                                    client_result = Err(());
                                    break;
                                }
                            }
                            Ok(AvatarClientFrame::End) => break,
                            Ok(AvatarClientFrame::Start { .. }) => {
                                // Already started; ignore duplicate starts.
                            }
                            Err(e) => {
                                tracing::debug!(session_id = %session_id, "Unparseable avatar frame: {e}");
                            }
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        // Opaque media audio, forwarded verbatim.
                        if upstream_tx
                            .send(UpstreamMessage::Binary(data))
                            .await
                            .is_err()
                        {
                            client_result = Err(());
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
            upstream_msg = upstream_rx.next() => {
                match upstream_msg {
                    Some(Ok(UpstreamMessage::Text(text))) => {
                        let frame = match serde_json::from_str::<serde_json::Value>(&text) {
                            Ok(json) => AvatarServerFrame::Upstream { json },
                            Err(_) => AvatarServerFrame::UpstreamText { text },
                        };
                        let Ok(json) = serde_json::to_string(&frame) else { continue };
                        if client_tx.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(UpstreamMessage::Binary(data))) => {
                        if client_tx.send(Message::Binary(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(UpstreamMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(session_id = %session_id, error = %e, "Avatar upstream stream error");
                        client_result = Err(());
                        let frame = AvatarServerFrame::Error {
                            code: AvatarErrorCode::StreamException,
                            message: e.to_string(),
                        };
                        if let Ok(json) = serde_json::to_string(&frame) {
                            let _ = client_tx.send(Message::Text(json)).await;
                        }
                        break;
                    }
                }
            }
        }
    }

    let _ = upstream_tx.send(UpstreamMessage::Close(None)).await;
    if client_result.is_ok() {
        if let Ok(json) = serde_json::to_string(&AvatarServerFrame::End) {
            let _ = client_tx.send(Message::Text(json)).await;
        }
    }
    tracing::info!(session_id = %session_id, "Avatar tunnel closed");
}
