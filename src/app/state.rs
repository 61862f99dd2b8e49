use std::sync::Arc;

use sqlx::PgPool;

use crate::realtime::room::{RoomManager, Rooms};

/// Injected into every handler; all long-lived collaborators live here
/// rather than in module globals.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub rooms: Rooms,
}

impl AppState {
    pub fn new(db: PgPool) -> Self {
        Self {
            db,
            rooms: Arc::new(RoomManager::new()),
        }
    }
}
