use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::{ClientMessage, LoadContentMessage, ServerMessage, TextChangeMessage};
use crate::rooms::{ConnectionId, MemberSender, Room, RoomRegistry};
use crate::AppState;

/// Per-connection session state.
///
/// A connection is in at most one room at a time; joining another room leaves
/// the previous one. Edits are only accepted for the room the connection is
/// currently joined to.
pub struct Session {
    conn_id: ConnectionId,
    registry: Arc<RoomRegistry>,
    outbound: MemberSender,
    joined: Option<Arc<Room>>,
}

impl Session {
    pub fn new(conn_id: ConnectionId, registry: Arc<RoomRegistry>, outbound: MemberSender) -> Self {
        Self {
            conn_id,
            registry,
            outbound,
            joined: None,
        }
    }

    /// Join a room, leaving any previous one, and send the room's current
    /// content back to this connection only.
    pub async fn handle_join(&mut self, room_id: &str) {
        if let Some(previous) = self.joined.take() {
            self.registry.leave(&previous, self.conn_id).await;
        }

        let (room, content) = self
            .registry
            .join_room(room_id, self.conn_id, self.outbound.clone())
            .await;
        self.joined = Some(room);
        info!("Connection {} joined room {}", self.conn_id, room_id);

        if self
            .outbound
            .send(ServerMessage::LoadContent(LoadContentMessage { content }))
            .is_err()
        {
            debug!("Connection {} closed before load_content could be sent", self.conn_id);
        }
    }

    /// Apply an edit if it targets the room this connection is joined to;
    /// anything else is dropped without touching any room.
    pub async fn handle_text_change(&mut self, change: TextChangeMessage) {
        match &self.joined {
            Some(room) if room.id == change.room_id => {
                self.registry
                    .submit_edit(room, self.conn_id, change.content)
                    .await;
            }
            Some(room) => {
                warn!(
                    "Connection {} sent edit for room {} while joined to {} - ignored",
                    self.conn_id, change.room_id, room.id
                );
            }
            None => {
                warn!(
                    "Connection {} sent edit for room {} while not joined to any room - ignored",
                    self.conn_id, change.room_id
                );
            }
        }
    }

    /// Remove this connection from its room. Pending saves are untouched so
    /// the last edit still reaches storage.
    pub async fn disconnect(&mut self) {
        if let Some(room) = self.joined.take() {
            self.registry.leave(&room, self.conn_id).await;
        }
    }
}

/// WebSocket handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
) -> Response {
    info!("New WebSocket connection attempt");
    ws.on_upgrade(move |socket| handle_socket(socket, app_state))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>) {
    // Generate unique connection ID to identify this client
    let conn_id = Uuid::new_v4();
    info!("WebSocket connection established with connection_id: {}", conn_id);

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Outbound queue: room fan-out and point-to-point replies both land here
    // and are drained into the socket by this loop.
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let mut session = Session::new(conn_id, app_state.registry.clone(), outbound_tx);

    loop {
        tokio::select! {
            incoming = ws_receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        // Parse the incoming message as JSON
                        let client_msg: ClientMessage = match serde_json::from_str(&text) {
                            Ok(client_msg) => client_msg,
                            Err(e) => {
                                error!("Failed to parse message from connection {}: {}", conn_id, e);
                                continue;
                            }
                        };

                        match client_msg {
                            ClientMessage::JoinRoom(join) => {
                                session.handle_join(&join.room_id).await;
                            }
                            ClientMessage::TextChange(change) => {
                                session.handle_text_change(change).await;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // ignore binary/ping/pong frames
                    Some(Err(e)) => {
                        debug!("WebSocket error on connection {}: {}", conn_id, e);
                        break;
                    }
                }
            }
            outgoing = outbound_rx.recv() => {
                // The sending half lives in the session, so this never yields None
                // while the loop runs.
                let Some(server_msg) = outgoing else { break };
                let text = match serde_json::to_string(&server_msg) {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Failed to serialize message for connection {}: {}", conn_id, e);
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        }
    }

    session.disconnect().await;
    info!("WebSocket connection {} terminated", conn_id);
}
