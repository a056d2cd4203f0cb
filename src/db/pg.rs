use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::Duration;
use tracing::info;

use super::{RoomStore, StoreError};

/// PostgreSQL-backed room store
pub struct PgRoomStore {
    pool: PgPool,
}

impl PgRoomStore {
    /// Create a new database connection pool and ensure the rooms table exists
    ///
    /// # Arguments
    /// * `database_url` - PostgreSQL connection string
    ///
    /// # Returns
    /// * `Result<Self, StoreError>` - Connected store or error
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(20) // Increased from 5 to support more concurrent operations
            .min_connections(2) // Keep some connections alive
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600)) // Close idle connections after 10 minutes
            .max_lifetime(Duration::from_secs(1800)) // Recycle connections after 30 minutes
            .connect(database_url)
            .await?;

        info!("Database connection pool created successfully");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rooms (
                slug TEXT PRIMARY KEY,
                content TEXT NOT NULL DEFAULT '',
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl RoomStore for PgRoomStore {
    async fn load(&self, room_id: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT content FROM rooms WHERE slug = $1")
            .bind(room_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>("content")))
    }

    async fn save(&self, room_id: &str, content: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO rooms (slug, content, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (slug) DO UPDATE
            SET content = EXCLUDED.content, updated_at = now()
            "#,
        )
        .bind(room_id)
        .bind(content)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
