use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use tokio::net::TcpListener;

use crate::{app, error::AppError, realtime, telemetry};

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_WS_PATH: &str = "/ws";

pub async fn run() -> Result<(), AppError> {
    let _ = dotenvy::dotenv();
    telemetry::init_tracing();

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|err| AppError::Internal(format!("DATABASE_URL missing: {}", err)))?;
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .map_err(AppError::Database)?;

    let port = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT);
    let ws_path = std::env::var("WS_PATH").unwrap_or_else(|_| DEFAULT_WS_PATH.to_string());

    let state = app::state::AppState::new(pool);
    realtime::heartbeat::spawn_heartbeat(state.rooms.clone());

    let app = app::router::build_router(state, &ws_path);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, ws_path = %ws_path, "Server listening");
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|err| AppError::Internal(format!("bind failed: {}", err)))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {}", err)))?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
}
