use std::collections::HashSet;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::gateway::Connection;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::room::RoomCommand;
use crate::AppState;

pub async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (connection, mut outbound) = Connection::open();
    info!(conn = %connection.id(), "client connected");

    let send_task = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut rooms = HashSet::new();
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => dispatch(&state, &connection, &mut rooms, &text).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                warn!(conn = %connection.id(), %err, "websocket error");
                break;
            }
        }
    }

    info!(conn = %connection.id(), rooms = rooms.len(), "client disconnected");
    for room_id in rooms {
        if let Some(handle) = state.registry.get(&room_id).await {
            handle.send(RoomCommand::Disconnect {
                connection_id: connection.id(),
            });
        }
    }
    send_task.abort();
}

/// Decodes one inbound frame and routes it. `rooms` accumulates every room this
/// connection created or addressed so the disconnect can be delivered to each.
pub async fn dispatch(
    state: &AppState,
    connection: &Connection,
    rooms: &mut HashSet<String>,
    text: &str,
) {
    debug!(conn = %connection.id(), %text, "message received");
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(err) => {
            warn!(conn = %connection.id(), %err, "undecodable message");
            connection.send(&ServerMessage::error("failed to process message"));
            return;
        }
    };

    let (room_id, command) = match message {
        ClientMessage::CreateRoom { host_id } => {
            let room_id = state
                .registry
                .create_room(connection.clone(), host_id, state.config.max_players)
                .await;
            rooms.insert(room_id.clone());
            connection.send(&ServerMessage::RoomCreated { room_id });
            return;
        }
        ClientMessage::Heartbeat {
            player_id,
            room_id,
            timestamp,
        } => {
            debug!(conn = %connection.id(), ?player_id, ?room_id, "heartbeat");
            connection.send(&ServerMessage::HeartbeatAck {
                timestamp: chrono::Utc::now().timestamp_millis(),
                original_timestamp: timestamp,
            });
            return;
        }
        ClientMessage::JoinRoom { room_id, player_id } => (
            room_id,
            RoomCommand::Join {
                connection: connection.clone(),
                player_id,
            },
        ),
        ClientMessage::StartVoting {
            room_id,
            host_id,
            missions,
        } => (
            room_id,
            RoomCommand::StartVoting {
                connection: connection.clone(),
                host_id,
                missions,
            },
        ),
        ClientMessage::SubmitVote {
            room_id,
            player_id,
            mission_index,
        } => (
            room_id,
            RoomCommand::SubmitVote {
                connection: connection.clone(),
                player_id,
                mission_index,
            },
        ),
        ClientMessage::ManualSettleVoting { room_id } => (
            room_id,
            RoomCommand::ManualSettle {
                connection: connection.clone(),
            },
        ),
        ClientMessage::UpdateState {
            room_id,
            state: game_state,
            history,
        } => (
            room_id,
            RoomCommand::UpdateState {
                connection: connection.clone(),
                state: game_state,
                history: history.unwrap_or_default(),
            },
        ),
        ClientMessage::SyncVote {
            room_id,
            vote_data,
            sender_id,
        } => (
            room_id,
            RoomCommand::SyncVote {
                vote_data,
                sender_id,
            },
        ),
        ClientMessage::SyncVotingResult {
            room_id,
            result_data,
        } => (room_id, RoomCommand::SyncVotingResult { result_data }),
    };

    let delivered = match state.registry.get(&room_id).await {
        Some(handle) => handle.send(command),
        None => false,
    };
    if delivered {
        rooms.insert(room_id);
    } else {
        warn!(conn = %connection.id(), room = %room_id, "unknown room");
        connection.send(&ServerMessage::error("room not found"));
    }
}
