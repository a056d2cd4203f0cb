use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

use super::{RoomStore, StoreError};

/// In-memory room store.
///
/// Used when no database URL is configured (content then does not survive a
/// restart) and by the test suite. Every accepted save is appended to a log so
/// tests can assert how often and with what content a room was persisted.
#[derive(Default)]
pub struct MemoryRoomStore {
    rooms: Mutex<HashMap<String, String>>,
    saves: Mutex<Vec<(String, String)>>,
}

impl MemoryRoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All (room_id, content) pairs passed to `save`, in call order.
    pub async fn save_log(&self) -> Vec<(String, String)> {
        self.saves.lock().await.clone()
    }
}

#[async_trait]
impl RoomStore for MemoryRoomStore {
    async fn load(&self, room_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.rooms.lock().await.get(room_id).cloned())
    }

    async fn save(&self, room_id: &str, content: &str) -> Result<(), StoreError> {
        debug!("Saving room {} in memory ({} bytes)", room_id, content.len());
        self.rooms
            .lock()
            .await
            .insert(room_id.to_string(), content.to_string());
        self.saves
            .lock()
            .await
            .push((room_id.to_string(), content.to_string()));
        Ok(())
    }
}
