use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomMessage {
    pub room_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TextChangeMessage {
    pub room_id: String,
    pub content: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LoadContentMessage {
    pub content: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TextUpdateMessage {
    pub content: String,
}

/// Messages a client may send over the WebSocket.
///
/// The `type` tags mirror the socket.io event names of the original backend
/// so existing clients keep working against the same vocabulary.
#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "join_room")]
    JoinRoom(JoinRoomMessage),
    #[serde(rename = "text_change")]
    TextChange(TextChangeMessage),
}

/// Messages the server sends back to clients.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "load_content")]
    LoadContent(LoadContentMessage),
    #[serde(rename = "text_update")]
    TextUpdate(TextUpdateMessage),
}
