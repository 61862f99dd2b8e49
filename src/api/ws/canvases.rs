use std::sync::Arc;

use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    app::state::AppState,
    models::events::EventKind,
    realtime::{
        protocol::{ClientMessage, ServerMessage},
        room::{Outbound, SessionHandle},
    },
    usecases::{canvases::CanvasService, events::EventService},
};

const SESSION_BUFFER: usize = 256;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Stable identity across reconnects. Minted fresh when absent.
    #[serde(rename = "userId")]
    pub user_id: Option<Uuid>,
}

pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let user_id = query.user_id.unwrap_or_else(Uuid::new_v4);
    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

pub async fn handle_socket(socket: WebSocket, state: AppState, user_id: Uuid) {
    let connection_id = Uuid::new_v4();
    let (out_tx, mut out_rx) = mpsc::channel::<Outbound>(SESSION_BUFFER);
    let session = Arc::new(SessionHandle::new(connection_id, user_id, out_tx));
    state.rooms.register_session(session.clone());
    tracing::info!(%connection_id, %user_id, "Session connected");

    let (mut sender, mut receiver) = socket.split();

    let mut write_task = tokio::spawn(async move {
        while let Some(outbound) = out_rx.recv().await {
            match outbound {
                Outbound::Message(message) => {
                    let text = match serde_json::to_string(&message) {
                        Ok(text) => text,
                        Err(error) => {
                            tracing::warn!(error = %error, "Failed to serialize outbound message");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Shutdown => break,
            }
        }
    });

    let recv_state = state.clone();
    let recv_session = session.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            match message {
                Message::Text(text) => {
                    recv_session.mark_alive();
                    dispatch(&recv_state, &recv_session, &text).await;
                }
                Message::Pong(_) => recv_session.mark_alive(),
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut write_task) => {},
        _ = (&mut recv_task) => {},
    }

    if let Some(canvas_id) = state.rooms.detach(&session) {
        state.rooms.broadcast(
            canvas_id,
            &ServerMessage::UserLeft {
                user_id,
                username: session.username(),
            },
            None,
        );
    }
    state.rooms.unregister_session(connection_id);
    tracing::info!(%connection_id, %user_id, "Session disconnected");
}

/// Parse one inbound frame and run it. Every path answers with a success
/// message, an `ERROR`, or is silently ignored; nothing propagates out.
async fn dispatch(state: &AppState, session: &Arc<SessionHandle>, text: &str) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(error) => {
            tracing::warn!(connection_id = %session.connection_id, error = %error, "Invalid inbound frame");
            send(session, ServerMessage::Error {
                error: format!("invalid message: {error}"),
            })
            .await;
            return;
        }
    };

    match message {
        ClientMessage::JoinCanvas { canvas_id, username } => {
            handle_join(state, session, canvas_id, username).await;
        }
        ClientMessage::LeaveCanvas => {
            if let Some(canvas_id) = state.rooms.detach(session) {
                state.rooms.broadcast(
                    canvas_id,
                    &ServerMessage::UserLeft {
                        user_id: session.user_id,
                        username: session.username(),
                    },
                    None,
                );
            }
        }
        ClientMessage::ShapeEvent {
            local_event_id,
            event_type,
            shape_id,
            payload,
            timestamp,
        } => {
            handle_shape_event(
                state,
                session,
                local_event_id,
                event_type,
                shape_id,
                payload,
                timestamp,
            )
            .await;
        }
        ClientMessage::BatchSync {
            events,
            last_known_version,
        } => {
            handle_batch_sync(state, session, events, last_known_version).await;
        }
        ClientMessage::GetState { since_version } => {
            handle_get_state(state, session, since_version).await;
        }
        ClientMessage::CursorMove { x, y } => {
            if let Some(canvas_id) = joined_canvas(session) {
                state.rooms.broadcast(
                    canvas_id,
                    &ServerMessage::CursorMove {
                        user_id: session.user_id,
                        username: session.username(),
                        x,
                        y,
                    },
                    Some(session.connection_id),
                );
            }
            // Cursor moves before joining are silently ignored.
        }
        ClientMessage::Pong => session.mark_alive(),
    }
}

async fn handle_join(
    state: &AppState,
    session: &Arc<SessionHandle>,
    canvas_id: Uuid,
    username: Option<String>,
) {
    if let Ok(mut name) = session.username.write() {
        *name = username.clone();
    }

    if let Err(error) = CanvasService::get_or_create(&state.db, canvas_id, None).await {
        tracing::error!(%canvas_id, error = %error, "Join failed");
        send(session, ServerMessage::JoinError {
            canvas_id,
            error: error.to_string(),
        })
        .await;
        return;
    }

    let (_room, left) = state.rooms.attach(session, canvas_id);
    if let Some(previous) = left {
        state.rooms.broadcast(
            previous,
            &ServerMessage::UserLeft {
                user_id: session.user_id,
                username: session.username(),
            },
            None,
        );
    }

    send(session, ServerMessage::JoinSuccess {
        canvas_id,
        user_id: session.user_id,
        username: username.clone(),
    })
    .await;

    match EventService::get_canvas_state(&state.db, canvas_id).await {
        Ok(snapshot) => {
            send(session, ServerMessage::CanvasState {
                shapes: snapshot.shapes,
                version: snapshot.version,
                users: state.rooms.users_of(canvas_id),
            })
            .await;
        }
        Err(error) => {
            send(session, ServerMessage::Error {
                error: error.to_string(),
            })
            .await;
        }
    }

    state.rooms.broadcast(
        canvas_id,
        &ServerMessage::UserJoined {
            user_id: session.user_id,
            username,
        },
        Some(session.connection_id),
    );
}

async fn handle_shape_event(
    state: &AppState,
    session: &Arc<SessionHandle>,
    local_event_id: String,
    event_type: EventKind,
    shape_id: Option<Uuid>,
    payload: serde_json::Value,
    timestamp: Option<i64>,
) {
    let Some(canvas_id) = joined_canvas(session) else {
        send(session, ServerMessage::Error {
            error: "Join a canvas before sending shape events".to_string(),
        })
        .await;
        return;
    };
    if event_type.is_ephemeral() {
        send(session, ServerMessage::Error {
            error: format!("{} is not a shape event", event_type.as_str()),
        })
        .await;
        return;
    }

    // Commit and fan out under the room's write lock so receivers observe
    // versions in order.
    let room = state.rooms.room(canvas_id);
    let _guard = match room.as_ref() {
        Some(room) => Some(room.write_lock.lock().await),
        None => None,
    };

    match EventService::store_event(
        &state.db,
        canvas_id,
        session.user_id,
        event_type,
        shape_id,
        &payload,
        Some(&local_event_id),
        timestamp,
    )
    .await
    {
        Ok(outcome) => {
            send(session, ServerMessage::EventAck {
                local_event_id,
                event_id: outcome.event_id,
                version: outcome.version,
                stored: outcome.stored,
                had_conflict: outcome.had_conflict,
            })
            .await;
            if outcome.stored {
                state.rooms.broadcast(
                    canvas_id,
                    &ServerMessage::ShapeEvent {
                        event_id: outcome.event_id,
                        user_id: session.user_id,
                        event_type,
                        shape_id,
                        payload: outcome.payload,
                        version: Some(outcome.version),
                    },
                    Some(session.connection_id),
                );
            }
        }
        Err(error) => {
            send(session, ServerMessage::Error {
                error: error.to_string(),
            })
            .await;
        }
    }
}

async fn handle_batch_sync(
    state: &AppState,
    session: &Arc<SessionHandle>,
    events: Vec<crate::dto::events::PendingEventWire>,
    last_known_version: i64,
) {
    let Some(canvas_id) = joined_canvas(session) else {
        send(session, ServerMessage::Error {
            error: "Join a canvas before syncing".to_string(),
        })
        .await;
        return;
    };

    let room = state.rooms.room(canvas_id);
    let _guard = match room.as_ref() {
        Some(room) => Some(room.write_lock.lock().await),
        None => None,
    };

    let result = async {
        let missed =
            EventService::events_since(&state.db, canvas_id, last_known_version).await?;
        let batch =
            EventService::store_batch(&state.db, canvas_id, session.user_id, &events).await?;
        let current_state = EventService::get_canvas_state(&state.db, canvas_id).await?;
        Ok::<_, crate::error::AppError>((missed, batch, current_state))
    }
    .await;

    match result {
        Ok((missed, batch, current_state)) => {
            send(session, ServerMessage::BatchSyncResult {
                success: true,
                stored_events: batch.stored.clone(),
                missed_events: missed,
                current_state: Some(current_state),
                conflicts: batch.conflicts,
                rejected_events: batch.rejected,
                error: None,
            })
            .await;
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
                    Some(session.connection_id),
                );
            }
        }
        Err(error) => {
            tracing::error!(%canvas_id, error = %error, "Batch sync failed");
            send(session, ServerMessage::BatchSyncResult {
                success: false,
                stored_events: Vec::new(),
                missed_events: Vec::new(),
                current_state: None,
                conflicts: Vec::new(),
                rejected_events: Vec::new(),
                error: Some(error.to_string()),
            })
            .await;
        }
    }
}

async fn handle_get_state(
    state: &AppState,
    session: &Arc<SessionHandle>,
    since_version: Option<i64>,
) {
    let Some(canvas_id) = joined_canvas(session) else {
        send(session, ServerMessage::Error {
            error: "Join a canvas before requesting state".to_string(),
        })
        .await;
        return;
    };

    let reply = match since_version {
        Some(since) => EventService::events_since(&state.db, canvas_id, since)
            .await
            .map(|events| ServerMessage::IncrementalUpdate { events }),
        None => EventService::get_canvas_state(&state.db, canvas_id)
            .await
            .map(|snapshot| ServerMessage::CanvasState {
                shapes: snapshot.shapes,
                version: snapshot.version,
                users: state.rooms.users_of(canvas_id),
            }),
    };

    match reply {
        Ok(message) => send(session, message).await,
        Err(error) => {
            send(session, ServerMessage::Error {
                error: error.to_string(),
            })
            .await;
        }
    }
}

fn joined_canvas(session: &SessionHandle) -> Option<Uuid> {
    session.joined_canvas.read().ok().and_then(|joined| *joined)
}

async fn send(session: &SessionHandle, message: ServerMessage) {
    if session.tx.send(Outbound::Message(message)).await.is_err() {
        tracing::debug!(
            connection_id = %session.connection_id,
            "Dropped reply to closed session"
        );
    }
}
