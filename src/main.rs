use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flashroom::room::{start_sweep_task, CleanupConfig, CleanupTimers, RoomRegistry, RoomService};
use flashroom::shared::AppState;
use flashroom::stats;
use flashroom::websockets::{websocket_handler, InMemoryTransport, Transport};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flashroom=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting flashroom relay server");

    let registry = Arc::new(RoomRegistry::new());
    let transport: Arc<dyn Transport> = Arc::new(InMemoryTransport::new());
    let timers = Arc::new(CleanupTimers::new());
    let config = CleanupConfig::default();

    let service = Arc::new(RoomService::new(
        registry.clone(),
        transport.clone(),
        timers.clone(),
        config.clone(),
    ));

    // Background reclamation of expired, empty rooms
    tokio::spawn(start_sweep_task(registry.clone(), timers.clone(), config));

    let app_state = AppState::new(registry, service, transport);

    let app = Router::new()
        .route("/ws", get(websocket_handler))
        .route("/stats", get(stats::stats_summary))
        .route("/api/stats", get(stats::stats_detail))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .unwrap();
    info!("Server running on http://localhost:{port}");
    axum::serve(listener, app).await.unwrap();
}
