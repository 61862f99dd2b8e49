use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{
    models::{
        events::EventKind,
        shapes::{Shape, ShapeType},
    },
    sync::vector_clock::VectorClock,
};

/// Payload keys that are resolver/envelope metadata, not shape properties.
const RESERVED_KEYS: [&str; 8] = [
    "vectorClock",
    "propertyTimestamps",
    "position",
    "startPosition",
    "endPosition",
    "type",
    "zIndex",
    "timestamp",
];

/// In-memory materialisation of one shape, shared by the server store (which
/// folds one event onto the loaded row before upserting) and the client cache
/// (which folds pending events onto the last snapshot).
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeState {
    pub id: Uuid,
    pub shape_type: ShapeType,
    pub properties: Map<String, Value>,
    pub z_index: i32,
    pub vector_clock: VectorClock,
    pub property_timestamps: HashMap<String, i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ShapeState {
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }

    pub fn from_row(row: &Shape) -> ShapeState {
        ShapeState {
            id: row.id,
            shape_type: row.shape_type,
            properties: as_object(&row.properties),
            z_index: row.z_index,
            vector_clock: VectorClock::from_json(&row.vector_clock).unwrap_or_default(),
            property_timestamps: serde_json::from_value(row.property_timestamps.clone())
                .unwrap_or_default(),
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        }
    }

    /// Wire form for `CANVAS_STATE`: properties inlined at the top level plus
    /// `id`, `type`, `zIndex`. Resolver metadata stays server/client private.
    pub fn to_wire(&self) -> Value {
        let mut map = self.properties.clone();
        map.insert("id".into(), Value::String(self.id.to_string()));
        map.insert(
            "type".into(),
            serde_json::to_value(self.shape_type).unwrap_or(Value::Null),
        );
        map.insert("zIndex".into(), Value::from(self.z_index));
        Value::Object(map)
    }
}

/// Shape properties carried by a payload, accepting both the canonical
/// nested form (`payload.properties.x`) and the legacy flat form
/// (`payload.x`).
pub fn payload_properties(payload: &Value) -> Map<String, Value> {
    if let Some(props) = payload.get("properties").and_then(Value::as_object) {
        return props.clone();
    }
    let mut out = Map::new();
    if let Some(object) = payload.as_object() {
        for (key, value) in object {
            if !RESERVED_KEYS.contains(&key.as_str()) {
                out.insert(key.clone(), value.clone());
            }
        }
    }
    out
}

/// Position carried by a payload, nested (`position: {x, y}`) or flat.
pub fn payload_position(payload: &Value) -> Option<(f64, f64)> {
    let source = payload.get("position").unwrap_or(payload);
    let x = source.get("x").and_then(Value::as_f64)?;
    let y = source.get("y").and_then(Value::as_f64)?;
    Some((x, y))
}

pub fn payload_vector_clock(payload: &Value) -> Option<VectorClock> {
    payload.get("vectorClock").and_then(VectorClock::from_json)
}

pub fn payload_property_timestamps(payload: &Value) -> HashMap<String, i64> {
    payload
        .get("propertyTimestamps")
        .cloned()
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or_default()
}

/// Rewrite an inbound payload into the canonical stored form: properties
/// nested under `properties`, positions under `position`, resolver metadata
/// carried through untouched.
pub fn normalize_payload(kind: EventKind, payload: &Value) -> Value {
    match kind {
        EventKind::ShapeCreated => {
            let mut out = Map::new();
            if let Some(shape_type) = payload.get("type") {
                out.insert("type".into(), shape_type.clone());
            }
            out.insert(
                "properties".into(),
                Value::Object(payload_properties(payload)),
            );
            out.insert(
                "zIndex".into(),
                payload.get("zIndex").cloned().unwrap_or(Value::from(0)),
            );
            carry_resolver_metadata(payload, &mut out);
            Value::Object(out)
        }
        EventKind::ShapeEdited => {
            let mut out = Map::new();
            out.insert(
                "properties".into(),
                Value::Object(payload_properties(payload)),
            );
            carry_resolver_metadata(payload, &mut out);
            Value::Object(out)
        }
        EventKind::ShapeMoved => match payload_position(payload) {
            Some((x, y)) => serde_json::json!({"position": {"x": x, "y": y}}),
            None => payload.clone(),
        },
        _ => payload.clone(),
    }
}

fn carry_resolver_metadata(payload: &Value, out: &mut Map<String, Value>) {
    for key in ["vectorClock", "propertyTimestamps"] {
        if let Some(value) = payload.get(key) {
            out.insert(key.into(), value.clone());
        }
    }
}

/// Fold one event onto the shape map. This is the single definition of the
/// projection rules; `getCanvasState` must always equal a left-fold of the
/// stored log through this function.
pub fn apply_event(
    shapes: &mut BTreeMap<Uuid, ShapeState>,
    kind: EventKind,
    shape_id: Option<Uuid>,
    payload: &Value,
    at: DateTime<Utc>,
) {
    let Some(shape_id) = shape_id else {
        return;
    };
    match kind {
        EventKind::ShapeCreated => {
            let Some(shape_type) = payload
                .get("type")
                .and_then(|value| serde_json::from_value::<ShapeType>(value.clone()).ok())
            else {
                return;
            };
            let created_at = shapes.get(&shape_id).map_or(at, |prior| prior.created_at);
            shapes.insert(
                shape_id,
                ShapeState {
                    id: shape_id,
                    shape_type,
                    properties: payload_properties(payload),
                    z_index: payload
                        .get("zIndex")
                        .and_then(Value::as_i64)
                        .unwrap_or(0) as i32,
                    vector_clock: payload_vector_clock(payload).unwrap_or_default(),
                    property_timestamps: payload_property_timestamps(payload),
                    created_at,
                    updated_at: at,
                    deleted_at: None,
                },
            );
        }
        EventKind::ShapeEdited | EventKind::ShapeUpdated | EventKind::ShapeResized
        | EventKind::ShapeRotated => {
            let Some(shape) = shapes.get_mut(&shape_id) else {
                return;
            };
            for (key, value) in payload_properties(payload) {
                shape.properties.insert(key, value);
            }
            if let Some(remote_vc) = payload_vector_clock(payload) {
                shape.vector_clock.merge(&remote_vc);
            }
            for (key, stamp) in payload_property_timestamps(payload) {
                let entry = shape.property_timestamps.entry(key).or_insert(0);
                if stamp > *entry {
                    *entry = stamp;
                }
            }
            shape.updated_at = at;
        }
        EventKind::ShapeMoved => {
            if let (Some(shape), Some((x, y))) =
                (shapes.get_mut(&shape_id), payload_position(payload))
            {
                shape.properties.insert("x".into(), Value::from(x));
                shape.properties.insert("y".into(), Value::from(y));
                shape.updated_at = at;
            }
        }
        EventKind::DragEnd => {
            let end = payload.get("endPosition").cloned().unwrap_or(Value::Null);
            if let (Some(shape), Some((x, y))) =
                (shapes.get_mut(&shape_id), payload_position(&end))
            {
                shape.properties.insert("x".into(), Value::from(x));
                shape.properties.insert("y".into(), Value::from(y));
                shape.updated_at = at;
            }
        }
        EventKind::ShapeDeleted => {
            if let Some(shape) = shapes.get_mut(&shape_id) {
                shape.deleted_at = Some(at);
                shape.updated_at = at;
            }
        }
        EventKind::ShapeRestored => {
            if let Some(shape) = shapes.get_mut(&shape_id) {
                shape.deleted_at = None;
                shape.updated_at = at;
            }
        }
        EventKind::ZIndexChanged => {
            if let (Some(shape), Some(z_index)) = (
                shapes.get_mut(&shape_id),
                payload.get("zIndex").and_then(Value::as_i64),
            ) {
                shape.z_index = z_index as i32;
                shape.updated_at = at;
            }
        }
        // Audit-only kinds: no projection side-effect.
        EventKind::UserConnected
        | EventKind::UserDisconnected
        | EventKind::PointerDown
        | EventKind::DragStart
        | EventKind::CursorMove => {}
    }
}

/// Live shapes ordered by z-index ascending (ties by id for determinism).
pub fn live_shapes(shapes: &BTreeMap<Uuid, ShapeState>) -> Vec<&ShapeState> {
    let mut live: Vec<&ShapeState> = shapes.values().filter(|shape| shape.is_live()).collect();
    live.sort_by(|a, b| a.z_index.cmp(&b.z_index).then(a.id.cmp(&b.id)));
    live
}

fn as_object(value: &Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
