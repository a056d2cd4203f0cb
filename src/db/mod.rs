pub mod pg;
pub mod memory;

use async_trait::async_trait;

/// Persistence gateway for room content.
///
/// The sync core only ever needs two operations: fetch the last stored
/// content for a room, and overwrite it. Save is idempotent and carries no
/// versioning; the debounced writer guarantees the value handed in is the
/// latest one known for the room at fire time.
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Load the stored content for a room, or None if the room was never saved.
    async fn load(&self, room_id: &str) -> Result<Option<String>, StoreError>;

    /// Overwrite the stored content for a room, creating it if absent.
    async fn save(&self, room_id: &str, content: &str) -> Result<(), StoreError>;
}

#[derive(Debug)]
pub enum StoreError {
    Database(sqlx::Error),
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "Database error: {}", e),
            StoreError::Unavailable(msg) => write!(f, "Store unavailable: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e)
    }
}
