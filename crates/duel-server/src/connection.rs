//! Per-connection WebSocket lifecycle: accept, register, dispatch frames to
//! the registry, fan responses back out, and guarantee cleanup on close.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use duel_core::protocol::{ClientMessage, DecodedFrame, ErrorCode, ServerMessage, decode_frame};

use crate::room::{ConnectionId, Registry};
use crate::store::Store;

enum Outcome {
    Continue,
    /// `leave_room` was processed; the disconnect path already ran.
    Left,
    /// Rate-limit kick threshold exceeded; force-close after notifying.
    Kicked,
}

/// Drive a single accepted WebSocket connection end to end.
pub async fn handle_socket(socket: WebSocket, registry: Arc<Registry>, store: Arc<Store>) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let conn_id = registry.register_connection(tx.clone()).await;

    let write_handle = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sink.send(Message::Text(msg.to_frame().into())).await.is_err() {
                break;
            }
        }
    });

    let mut outcome = Outcome::Continue;
    loop {
        match ws_stream.next().await {
            Some(Ok(Message::Text(text))) => {
                match handle_frame(&registry, &store, conn_id, &text, &tx).await {
                    Outcome::Continue => continue,
                    done => {
                        outcome = done;
                        break;
                    }
                }
            }
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
            _ => continue,
        }
    }

    match outcome {
        Outcome::Kicked => {
            // Queue the KICKED reply, then drop every sender this task holds
            // and unregister the live-map clone, so the writer drains the
            // queued frame and observes channel closure instead of being
            // aborted out from under an in-flight send.
            let _ = tx.send(ServerMessage::error(ErrorCode::Kicked, "kicked for repeated rate-limit violations"));
            drop(tx);
            registry.handle_disconnect(conn_id).await;
            let _ = write_handle.await;
        }
        Outcome::Left => {
            write_handle.abort();
        }
        Outcome::Continue => {
            write_handle.abort();
            registry.handle_disconnect(conn_id).await;
        }
    }

    tracing::info!(conn = ?conn_id, "connection closed");
}

/// Decode and dispatch one inbound frame.
async fn handle_frame(
    registry: &Arc<Registry>,
    store: &Arc<Store>,
    conn_id: ConnectionId,
    text: &str,
    tx: &mpsc::UnboundedSender<ServerMessage>,
) -> Outcome {
    let decoded = match decode_frame(text) {
        Ok(d) => d,
        Err(e) => {
            let _ = tx.send(ServerMessage::error(ErrorCode::ParseError, e));
            return Outcome::Continue;
        }
    };

    let msg = match decoded {
        DecodedFrame::Message(m) => m,
        DecodedFrame::Unknown(tag) => {
            tracing::debug!(tag, "dropping unrecognised frame tag");
            return Outcome::Continue;
        }
    };

    match msg {
        ClientMessage::CreateRoom { player_name, deck_id } => {
            registry.create_room(conn_id, player_name, deck_id, tx.clone()).await;
        }
        ClientMessage::JoinRoom { room_code, player_name, deck_id } => {
            if let Err(e) = registry.join_room(conn_id, &room_code, player_name, deck_id, tx.clone()).await {
                let _ = tx.send(ServerMessage::error(e.code(), e.to_string()));
            }
        }
        ClientMessage::FindMatch { player_name, deck_id } => {
            registry.find_match(conn_id, player_name, deck_id, tx.clone()).await;
        }
        ClientMessage::LeaveRoom => {
            registry.handle_disconnect(conn_id).await;
            return Outcome::Left;
        }
        ClientMessage::Reconnect { room_code, player_id } => {
            match registry.reconnect(conn_id, &room_code, player_id, tx.clone()).await {
                Ok(outcome) => {
                    let _ = tx.send(ServerMessage::Reconnected { game_state: outcome.game_state });
                }
                Err(e) => {
                    let _ = tx.send(ServerMessage::error(e.code(), e.to_string()));
                }
            }
        }
        ClientMessage::GameAction { action, game_state } => {
            match registry.game_action(conn_id, action, game_state).await {
                Ok(true) => return Outcome::Kicked,
                Ok(false) => {}
                Err(e) => {
                    let _ = tx.send(ServerMessage::error(e.code(), e.to_string()));
                }
            }
        }
        ClientMessage::Chat { message } => {
            if let Err(e) = registry.chat(conn_id, message).await {
                let _ = tx.send(ServerMessage::error(e.code(), e.to_string()));
            }
        }
        ClientMessage::Emote { emote_id } => {
            if let Err(e) = registry.emote(conn_id, emote_id).await {
                let _ = tx.send(ServerMessage::error(e.code(), e.to_string()));
            }
        }
        ClientMessage::GameEnd { winner_id, turn_count } => {
            if let Err(e) = registry.game_end(conn_id, winner_id, turn_count, store).await {
                let _ = tx.send(ServerMessage::error(e.code(), e.to_string()));
            }
        }
        ClientMessage::Pong => {}
    }

    Outcome::Continue
}
