use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use uuid::Uuid;

/// The closed set of event kinds the engine understands. Unknown kinds fail
/// deserialization at the boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "event_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    UserConnected,
    UserDisconnected,
    PointerDown,
    DragStart,
    DragEnd,
    ShapeCreated,
    ShapeEdited,
    ShapeMoved,
    ShapeDeleted,
    CursorMove,
    // Legacy kinds: replayed from old logs, rejected for new writes.
    ShapeUpdated,
    ShapeResized,
    ShapeRotated,
    ShapeRestored,
    ZIndexChanged,
}

impl EventKind {
    /// Whether the kind is appended to the log and contributes to the
    /// projection. Total and pure; legacy kinds are not writable.
    pub fn is_storable(self) -> bool {
        matches!(
            self,
            EventKind::UserConnected
                | EventKind::UserDisconnected
                | EventKind::PointerDown
                | EventKind::DragStart
                | EventKind::DragEnd
                | EventKind::ShapeCreated
                | EventKind::ShapeEdited
                | EventKind::ShapeMoved
                | EventKind::ShapeDeleted
        )
    }

    /// Kinds that still appear in logs written before the taxonomy was
    /// narrowed. The projector folds them; the write path rejects them.
    pub fn is_legacy(self) -> bool {
        matches!(
            self,
            EventKind::ShapeUpdated
                | EventKind::ShapeResized
                | EventKind::ShapeRotated
                | EventKind::ShapeRestored
                | EventKind::ZIndexChanged
        )
    }

    /// Broadcast-only kinds, never persisted.
    pub fn is_ephemeral(self) -> bool {
        !self.is_storable() && !self.is_legacy()
    }

    /// Kinds with a projection side-effect; the rest are audit-only.
    pub fn affects_projection(self) -> bool {
        matches!(
            self,
            EventKind::ShapeCreated
                | EventKind::ShapeEdited
                | EventKind::ShapeMoved
                | EventKind::DragEnd
                | EventKind::ShapeDeleted
                | EventKind::ShapeUpdated
                | EventKind::ShapeResized
                | EventKind::ShapeRotated
                | EventKind::ShapeRestored
                | EventKind::ZIndexChanged
        )
    }

    /// Kinds that must reference a shape.
    pub fn requires_shape(self) -> bool {
        matches!(
            self,
            EventKind::ShapeCreated
                | EventKind::ShapeEdited
                | EventKind::ShapeMoved
                | EventKind::ShapeDeleted
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::UserConnected => "USER_CONNECTED",
            EventKind::UserDisconnected => "USER_DISCONNECTED",
            EventKind::PointerDown => "POINTER_DOWN",
            EventKind::DragStart => "DRAG_START",
            EventKind::DragEnd => "DRAG_END",
            EventKind::ShapeCreated => "SHAPE_CREATED",
            EventKind::ShapeEdited => "SHAPE_EDITED",
            EventKind::ShapeMoved => "SHAPE_MOVED",
            EventKind::ShapeDeleted => "SHAPE_DELETED",
            EventKind::CursorMove => "CURSOR_MOVE",
            EventKind::ShapeUpdated => "SHAPE_UPDATED",
            EventKind::ShapeResized => "SHAPE_RESIZED",
            EventKind::ShapeRotated => "SHAPE_ROTATED",
            EventKind::ShapeRestored => "SHAPE_RESTORED",
            EventKind::ZIndexChanged => "Z_INDEX_CHANGED",
        }
    }
}

/// One row of the append-only per-canvas log.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CanvasEvent {
    pub id: Uuid,
    pub canvas_id: Uuid,
    pub shape_id: Option<Uuid>,
    pub user_id: Uuid,
    pub event_type: EventKind,
    #[sqlx(json)]
    pub payload: serde_json::Value,
    pub version: i64,
    pub local_event_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::EventKind;

    #[test]
    fn storable_set_matches_taxonomy() {
        assert!(EventKind::ShapeCreated.is_storable());
        assert!(EventKind::ShapeEdited.is_storable());
        assert!(EventKind::DragEnd.is_storable());
        assert!(EventKind::UserConnected.is_storable());
        assert!(!EventKind::CursorMove.is_storable());
        assert!(!EventKind::ShapeUpdated.is_storable());
    }

    #[test]
    fn legacy_kinds_are_not_ephemeral() {
        assert!(EventKind::ShapeRotated.is_legacy());
        assert!(!EventKind::ShapeRotated.is_ephemeral());
        assert!(EventKind::CursorMove.is_ephemeral());
    }

    #[test]
    fn wire_names_are_screaming_snake() {
        let json = serde_json::to_string(&EventKind::ShapeCreated).unwrap();
        assert_eq!(json, "\"SHAPE_CREATED\"");
        let kind: EventKind = serde_json::from_str("\"Z_INDEX_CHANGED\"").unwrap();
        assert_eq!(kind, EventKind::ZIndexChanged);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(serde_json::from_str::<EventKind>("\"SHAPE_EXPLODED\"").is_err());
    }
}
