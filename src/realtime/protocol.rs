use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    dto::events::{
        CanvasStateWire, ConflictWire, EventWire, PendingEventWire, RejectedEventWire, UserWire,
    },
    models::events::EventKind,
};

/// Everything a client may send over the session channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    JoinCanvas {
        canvas_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },
    LeaveCanvas,
    #[serde(rename_all = "camelCase")]
    ShapeEvent {
        local_event_id: String,
        event_type: EventKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        shape_id: Option<Uuid>,
        #[serde(default)]
        payload: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },
    #[serde(rename_all = "camelCase")]
    BatchSync {
        events: Vec<PendingEventWire>,
        #[serde(default)]
        last_known_version: i64,
    },
    #[serde(rename_all = "camelCase")]
    GetState {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        since_version: Option<i64>,
    },
    CursorMove {
        x: f64,
        y: f64,
    },
    Pong,
}

/// Everything the server may send back.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    JoinSuccess {
        canvas_id: Uuid,
        user_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    JoinError { canvas_id: Uuid, error: String },
    #[serde(rename_all = "camelCase")]
    CanvasState {
        shapes: Vec<serde_json::Value>,
        version: i64,
        users: Vec<UserWire>,
    },
    #[serde(rename_all = "camelCase")]
    EventAck {
        local_event_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<Uuid>,
        version: i64,
        stored: bool,
        had_conflict: bool,
    },
    #[serde(rename_all = "camelCase")]
    ShapeEvent {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<Uuid>,
        user_id: Uuid,
        event_type: EventKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        shape_id: Option<Uuid>,
        payload: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<i64>,
    },
    #[serde(rename_all = "camelCase")]
    BatchSyncResult {
        success: bool,
        stored_events: Vec<EventWire>,
        missed_events: Vec<EventWire>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current_state: Option<CanvasStateWire>,
        conflicts: Vec<ConflictWire>,
        #[serde(default)]
        rejected_events: Vec<RejectedEventWire>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    IncrementalUpdate { events: Vec<EventWire> },
    #[serde(rename_all = "camelCase")]
    CursorMove {
        user_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        x: f64,
        y: f64,
    },
    #[serde(rename_all = "camelCase")]
    UserJoined {
        user_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    UserLeft {
        user_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },
    Error { error: String },
    Ping,
}

impl ServerMessage {
    /// Unordered, loss-tolerant traffic. Dropped silently under backpressure;
    /// everything else logs the miss so the receiver knows to reconcile.
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, ServerMessage::CursorMove { .. } | ServerMessage::Ping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn join_canvas_round_trips_with_screaming_tag() {
        let canvas_id = Uuid::new_v4();
        let text = format!(
            r#"{{"type":"JOIN_CANVAS","canvasId":"{canvas_id}","username":"ada"}}"#
        );
        let message: ClientMessage = serde_json::from_str(&text).unwrap();
        match message {
            ClientMessage::JoinCanvas { canvas_id: id, username } => {
                assert_eq!(id, canvas_id);
                assert_eq!(username.as_deref(), Some("ada"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn shape_event_accepts_missing_optionals() {
        let text = r#"{"type":"SHAPE_EVENT","localEventId":"e-1","eventType":"DRAG_START"}"#;
        let message: ClientMessage = serde_json::from_str(text).unwrap();
        match message {
            ClientMessage::ShapeEvent { local_event_id, event_type, shape_id, payload, .. } => {
                assert_eq!(local_event_id, "e-1");
                assert_eq!(event_type, crate::models::events::EventKind::DragStart);
                assert!(shape_id.is_none());
                assert_eq!(payload, serde_json::Value::Null);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let result = serde_json::from_str::<ClientMessage>(r#"{"type":"SELF_DESTRUCT"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn event_ack_serialises_camel_case_fields() {
        let ack = ServerMessage::EventAck {
            local_event_id: "e-9".into(),
            event_id: None,
            version: 4,
            stored: true,
            had_conflict: false,
        };
        let value = serde_json::to_value(&ack).unwrap();
        assert_eq!(value["type"], json!("EVENT_ACK"));
        assert_eq!(value["localEventId"], json!("e-9"));
        assert_eq!(value["hadConflict"], json!(false));
        assert!(value.get("eventId").is_none());
    }

    #[test]
    fn batch_sync_result_defaults_rejected_events() {
        // Results from peers that predate the field still parse.
        let text = r#"{
            "type": "BATCH_SYNC_RESULT",
            "success": true,
            "storedEvents": [],
            "missedEvents": [],
            "conflicts": []
        }"#;
        let message: ServerMessage = serde_json::from_str(text).unwrap();
        match message {
            ServerMessage::BatchSyncResult { rejected_events, .. } => {
                assert!(rejected_events.is_empty());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn ephemeral_classification() {
        let cursor = ServerMessage::CursorMove {
            user_id: Uuid::new_v4(),
            username: None,
            x: 1.0,
            y: 2.0,
        };
        assert!(cursor.is_ephemeral());
        let error = ServerMessage::Error { error: "nope".into() };
        assert!(!error.is_ephemeral());
    }
}
