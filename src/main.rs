mod models;
mod handlers;
mod routes;
mod docs;
mod config;
mod db;
mod rooms;
mod ws;

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use routes::create_api_routes;
use docs::ApiDoc;
use config::Config;
use db::{memory::MemoryRoomStore, pg::PgRoomStore, RoomStore};
use rooms::RoomRegistry;
use tracing::{info, error, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use std::panic;
use std::sync::Arc;
use std::time::Duration;

/// Shared application state, created once at startup and handed to every
/// handler through axum state.
pub struct AppState {
    pub registry: Arc<RoomRegistry>,
    pub store: Arc<dyn RoomStore>,
}

#[tokio::main]
async fn main() {

    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            // Default to info level, but allow debug for our app
            "mastertexto_doc=debug,tower_http=debug,axum::rejection=trace,info".into()
        }))
        .init();

    info!("Starting server...");

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });

    // Initialize the room store: Postgres if a URL is provided, otherwise an
    // in-memory fallback (content then does not survive restarts)
    let store: Arc<dyn RoomStore> = if let Some(db_url) = &config.db_url {
        match PgRoomStore::new(db_url).await {
            Ok(store) => {
                info!("Database initialized successfully");
                Arc::new(store)
            }
            Err(e) => {
                error!("Failed to initialize database: {}", e);
                warn!("Falling back to in-memory storage - room content will not survive restarts");
                Arc::new(MemoryRoomStore::new())
            }
        }
    } else {
        warn!("No database URL configured - room content will not survive restarts");
        Arc::new(MemoryRoomStore::new())
    };

    let registry = Arc::new(RoomRegistry::new(
        store.clone(),
        Duration::from_millis(config.save_debounce_ms),
        Duration::from_secs(config.room_idle_secs),
    ));
    let app_state = Arc::new(AppState { registry, store });

    // Restrict CORS to the configured origins, or allow any when none are set
    let cors_layer = match config.cors_origin_values() {
        Some(origins) => CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any),
        None => CorsLayer::permissive(),
    };

    // Create API routes
    let api_routes = create_api_routes(app_state.clone());

    // Combine all routes
    let app_routes = Router::new()
        // Mount API routes
        .nest("/api", api_routes)
        // Mount the collaboration WebSocket
        .route("/ws", get(ws::websocket_handler).with_state(app_state))
        // Mount Swagger UI
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Add CORS and tracing layers
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http());

    // Start the HTTP server
    let listener = tokio::net::TcpListener::bind(config.server_address())
        .await
        .unwrap_or_else(|_| panic!("Failed to bind to {}", config.server_address()));

    info!("🚀 Server running on http://{}", config.server_address());
    info!("📡 WebSocket available at ws://{}/ws", config.server_address());
    info!("📚 Swagger UI available at http://{}/swagger", config.server_address());

    axum::serve(listener, app_routes)
        .await
        .expect("Server failed to start");
}
