use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};

use crate::{
    api::{http::canvases as canvases_http, ws::canvases as canvases_ws},
    app::state::AppState,
};

pub fn build_router(state: AppState, ws_path: &str) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(canvases_http::health_handle))
        .route("/api/canvas", post(canvases_http::create_canvas_handle))
        .route(
            "/api/canvas/{canvas_id}",
            get(canvases_http::get_canvas_handle),
        )
        .route(
            "/api/canvas/{canvas_id}/state",
            get(canvases_http::get_canvas_state_handle),
        )
        .route(
            "/api/canvas/{canvas_id}/events",
            get(canvases_http::get_canvas_events_handle),
        )
        .route(
            "/api/canvas/{canvas_id}/users",
            get(canvases_http::get_canvas_users_handle),
        )
        .route(
            "/api/canvas/{canvas_id}/sync",
            post(canvases_http::sync_canvas_handle),
        )
        .route(ws_path, get(canvases_ws::ws_handler))
        .layer(cors)
        .with_state(state)
}
