use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Latest known content for a room
#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoomLatestResponse {
    pub room_id: String,
    pub content: String,
    /// Where the content was read from: "memory" (live room, may be ahead of
    /// storage by up to the debounce window) or "storage".
    pub source: String,
    pub last_modified_at: Option<DateTime<Utc>>,
}
