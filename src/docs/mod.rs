use utoipa::OpenApi;
use crate::models::*;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn health_check_doc() {}

/// Readiness check endpoint
#[utoipa::path(
    get,
    path = "/api/ready",
    responses(
        (status = 200, description = "Service is ready", body = ReadyResponse)
    )
)]
#[allow(dead_code)]
pub async fn ready_check_doc() {}

/// Room and process diagnostics
#[utoipa::path(
    get,
    path = "/api/v1/diagnostics",
    responses(
        (status = 200, description = "Diagnostics information", body = DiagnosticsResponse)
    )
)]
#[allow(dead_code)]
pub async fn diagnostics_doc() {}

/// Latest content for a room
#[utoipa::path(
    get,
    path = "/api/v1/rooms/{room_id}/latest",
    params(
        ("room_id" = String, Path, description = "Room slug")
    ),
    responses(
        (status = 200, description = "Latest room content", body = RoomLatestResponse),
        (status = 404, description = "Room not found", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn room_latest_doc() {}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check_doc,
        ready_check_doc,
        diagnostics_doc,
        room_latest_doc,
    ),
    components(
        schemas(HealthResponse, ReadyResponse, DiagnosticsResponse, RoomLatestResponse, ErrorResponse)
    ),
    tags(
        (name = "api", description = "API endpoints")
    )
)]
pub struct ApiDoc;
