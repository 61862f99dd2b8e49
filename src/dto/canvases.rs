use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dto::events::{EventWire, PendingEventWire};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCanvasRequest {
    pub canvas_id: Uuid,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasResponse {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct EventsSinceQuery {
    #[serde(default)]
    pub since: i64,
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub events: Vec<EventWire>,
}

/// HTTP twin of the socket `BATCH_SYNC` message.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub events: Vec<PendingEventWire>,
    #[serde(default)]
    pub last_known_version: i64,
    pub user_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub success: bool,
    pub stored_events: Vec<EventWire>,
    pub missed_events: Vec<EventWire>,
    pub current_state: crate::dto::events::CanvasStateWire,
    pub conflicts: Vec<crate::dto::events::ConflictWire>,
    pub rejected_events: Vec<crate::dto::events::RejectedEventWire>,
}
