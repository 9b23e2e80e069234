use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

use crate::auth::Identity;
use crate::engine::chat_engine::ChatEngine;
use crate::engine::events::{ClientCommand, ConnectionId};

use super::app_state::AppState;
use super::auth_middleware::AuthUser;

/// Commands a connection may queue behind one that is still running.
const MAX_PENDING_COMMANDS: usize = 32;

/// GET /ws. Authentication runs in the extractor, so a bad token is answered
/// with 401 before any upgrade or registration happens.
pub async fn ws_upgrade(
    AuthUser(identity): AuthUser,
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> Response {
    let engine = state.engine.clone();
    let heartbeat_interval = state.heartbeat_interval;
    ws.on_upgrade(move |socket| handle_socket(socket, engine, identity, heartbeat_interval))
}

async fn handle_socket(
    socket: WebSocket,
    engine: Arc<ChatEngine>,
    identity: Identity,
    heartbeat_interval: Duration,
) {
    let (connection_id, mut outbound) =
        match engine.connect(identity.user_id, identity.username.clone()) {
            Ok(registered) => registered,
            Err(e) => {
                error!(user_id = %identity.user_id, error = %e, "failed to register connection");
                return;
            }
        };
    info!(%connection_id, user_id = %identity.user_id, username = %identity.username, "websocket connected");

    let (mut sender, receiver) = socket.split();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received;

    // Outbound: drain the connection queue, ping on every heartbeat tick.
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(heartbeat_interval);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = outbound.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            error!(%connection_id, error = %e, "failed to encode event");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!(%connection_id, missed_heartbeats, "heartbeat timeout, dropping connection");
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Commands run one at a time, in arrival order, off the read loop so a
    // slow send never delays heartbeat replies.
    let (command_tx, mut command_rx) = mpsc::channel::<ClientCommand>(MAX_PENDING_COMMANDS);
    let command_engine = engine.clone();
    let mut command_task = tokio::spawn(async move {
        while let Some(command) = command_rx.recv().await {
            command_engine.dispatch(connection_id, command).await;
        }
    });

    let recv_engine = engine.clone();
    let mut recv_task = tokio::spawn(async move {
        read_frames(
            receiver,
            connection_id,
            &recv_engine,
            &command_tx,
            &pong_flag_recv,
        )
        .await;
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
            command_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
            command_task.abort();
        }
        _ = &mut command_task => {
            send_task.abort();
            recv_task.abort();
        }
    }

    engine.disconnect(connection_id);
}

/// Read inbound frames until the peer closes. Any frame marks the peer alive.
/// Decoded commands are queued for the dispatch task; a full queue rejects
/// the command with an `error` event instead of blocking the read.
pub(crate) async fn read_frames<S>(
    mut frames: S,
    connection_id: ConnectionId,
    engine: &ChatEngine,
    commands: &mpsc::Sender<ClientCommand>,
    alive: &AtomicBool,
) where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    while let Some(Ok(msg)) = frames.next().await {
        alive.store(true, Ordering::Release);
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                Ok(command) => match commands.try_send(command) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!(%connection_id, "command queue full, rejecting command");
                        engine.report_error(connection_id, "Too many pending commands");
                    }
                    Err(TrySendError::Closed(_)) => break,
                },
                Err(e) => {
                    debug!(%connection_id, error = %e, "malformed command");
                    engine.report_error(connection_id, "Invalid command");
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }
}
