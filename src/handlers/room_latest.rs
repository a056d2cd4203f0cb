use crate::models::{ErrorResponse, RoomLatestResponse};
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tracing::error;

/// Latest content for a room.
///
/// A resident room answers from memory, which may be ahead of storage by up
/// to the debounce window; otherwise the stored content is returned.
pub async fn room_latest(
    State(app_state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Result<(StatusCode, Json<RoomLatestResponse>), (StatusCode, Json<ErrorResponse>)> {
    // Try to get the live room from memory first
    if let Some(room) = app_state.registry.get(&room_id).await {
        let (content, last_modified_at) = room.snapshot().await;
        return Ok((
            StatusCode::OK,
            Json(RoomLatestResponse {
                room_id,
                content,
                source: "memory".to_string(),
                last_modified_at: Some(last_modified_at),
            }),
        ));
    }

    // If not resident, fall back to storage
    match app_state.store.load(&room_id).await {
        Ok(Some(content)) => Ok((
            StatusCode::OK,
            Json(RoomLatestResponse {
                room_id,
                content,
                source: "storage".to_string(),
                last_modified_at: None,
            }),
        )),
        Ok(None) => {
            let status = StatusCode::NOT_FOUND;
            Err((
                status,
                Json(ErrorResponse {
                    code: status.as_u16(),
                    status: status.to_string(),
                    error: format!("Room '{}' not found", room_id),
                }),
            ))
        }
        Err(e) => {
            error!("Error loading room '{}' from storage: {}", room_id, e);
            let status = StatusCode::INTERNAL_SERVER_ERROR;
            Err((
                status,
                Json(ErrorResponse {
                    code: status.as_u16(),
                    status: status.to_string(),
                    error: format!("Error loading room '{}' from storage", room_id),
                }),
            ))
        }
    }
}
