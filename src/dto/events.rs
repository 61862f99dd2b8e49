use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::events::{CanvasEvent, EventKind};

/// A client-side pending event as it travels in `BATCH_SYNC` and the HTTP
/// sync endpoint. `kind` is accepted as an alias for `eventType` because the
/// durable client journal uses the short name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingEventWire {
    pub local_event_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canvas_id: Option<Uuid>,
    #[serde(alias = "kind")]
    pub event_type: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape_id: Option<Uuid>,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    /// Client wall-clock milliseconds when the event was authored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// A committed event on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventWire {
    pub id: Uuid,
    pub canvas_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape_id: Option<Uuid>,
    pub user_id: Uuid,
    pub event_type: EventKind,
    pub payload: serde_json::Value,
    pub version: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_event_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<CanvasEvent> for EventWire {
    fn from(event: CanvasEvent) -> Self {
        EventWire {
            id: event.id,
            canvas_id: event.canvas_id,
            shape_id: event.shape_id,
            user_id: event.user_id,
            event_type: event.event_type,
            payload: event.payload,
            version: event.version,
            local_event_id: event.local_event_id,
            created_at: event.created_at,
        }
    }
}

/// A batched event the store refused to write, with the reason. The client
/// drops it from its queue and surfaces the error instead of retrying.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedEventWire {
    pub local_event_id: String,
    pub error: String,
}

/// Conflict metadata returned from a store so clients can reconcile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape_id: Option<Uuid>,
    pub event_type: EventKind,
    /// The payload as resolved and stored by the server.
    pub resolved_payload: serde_json::Value,
    pub version: i64,
}

/// `{shapes, version}` snapshot. Shapes are in wire form: properties inlined
/// plus `id`, `type`, `zIndex`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasStateWire {
    pub shapes: Vec<serde_json::Value>,
    pub version: i64,
}

/// One participant of a canvas.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserWire {
    pub user_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}
