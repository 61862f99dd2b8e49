use axum::{
    Json,
    extract::{Path, Query, State},
};
use uuid::Uuid;

use crate::{
    app::state::AppState,
    dto::{
        canvases::{
            CanvasResponse, CreateCanvasRequest, EventsResponse, EventsSinceQuery, SyncRequest,
            SyncResponse,
        },
        events::{CanvasStateWire, UserWire},
    },
    error::AppError,
    realtime::protocol::ServerMessage,
    usecases::{canvases::CanvasService, events::EventService},
};

pub async fn health_handle() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

pub async fn create_canvas_handle(
    State(state): State<AppState>,
    Json(req): Json<CreateCanvasRequest>,
) -> Result<Json<CanvasResponse>, AppError> {
    let canvas =
        CanvasService::get_or_create(&state.db, req.canvas_id, req.name.as_deref()).await?;
    Ok(Json(CanvasResponse {
        id: canvas.id,
        name: canvas.name,
        created_at: canvas.created_at,
        updated_at: canvas.updated_at,
    }))
}

pub async fn get_canvas_handle(
    State(state): State<AppState>,
    Path(canvas_id): Path<Uuid>,
) -> Result<Json<CanvasResponse>, AppError> {
    let canvas = CanvasService::get_metadata(&state.db, canvas_id).await?;
    Ok(Json(canvas))
}

pub async fn get_canvas_state_handle(
    State(state): State<AppState>,
    Path(canvas_id): Path<Uuid>,
) -> Result<Json<CanvasStateWire>, AppError> {
    CanvasService::get_metadata(&state.db, canvas_id).await?;
    let snapshot = EventService::get_canvas_state(&state.db, canvas_id).await?;
    Ok(Json(snapshot))
}

pub async fn get_canvas_events_handle(
    State(state): State<AppState>,
    Path(canvas_id): Path<Uuid>,
    Query(query): Query<EventsSinceQuery>,
) -> Result<Json<EventsResponse>, AppError> {
    CanvasService::get_metadata(&state.db, canvas_id).await?;
    let events = EventService::events_since(&state.db, canvas_id, query.since).await?;
    Ok(Json(EventsResponse { events }))
}

pub async fn get_canvas_users_handle(
    State(state): State<AppState>,
    Path(canvas_id): Path<Uuid>,
) -> Result<Json<Vec<UserWire>>, AppError> {
    Ok(Json(state.rooms.users_of(canvas_id)))
}

/// HTTP twin of the socket `BATCH_SYNC`: same store semantics, same fan-out
/// to any live room.
pub async fn sync_canvas_handle(
    State(state): State<AppState>,
    Path(canvas_id): Path<Uuid>,
    Json(req): Json<SyncRequest>,
) -> Result<Json<SyncResponse>, AppError> {
    CanvasService::get_or_create(&state.db, canvas_id, None).await?;

    let room = state.rooms.room(canvas_id);
    let _guard = match room.as_ref() {
        Some(room) => Some(room.write_lock.lock().await),
        None => None,
    };

    let missed = EventService::events_since(&state.db, canvas_id, req.last_known_version).await?;
    let batch = EventService::store_batch(&state.db, canvas_id, req.user_id, &req.events).await?;
    let current_state = EventService::get_canvas_state(&state.db, canvas_id).await?;

    for event in &batch.stored {
        state.rooms.broadcast(
            canvas_id,
            &ServerMessage::ShapeEvent {
                event_id: Some(event.id),
                user_id: event.user_id,
                event_type: event.event_type,
                shape_id: event.shape_id,
                payload: event.payload.clone(),
                version: Some(event.version),
            },
            None,
        );
    }

    Ok(Json(SyncResponse {
        success: true,
        stored_events: batch.stored,
        missed_events: missed,
        current_state,
        conflicts: batch.conflicts,
        rejected_events: batch.rejected,
    }))
}
