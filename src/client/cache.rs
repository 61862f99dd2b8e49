use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{
    client::journal::PendingEvent,
    dto::events::CanvasStateWire,
    models::{events::EventKind, shapes::ShapeType},
    sync::{
        conflict::{self, RemoteEdit},
        projection::{self, ShapeState},
    },
};

/// Materialised canvas state on the client: the last server snapshot plus a
/// pending-events overlay, so the UI observes its own unacknowledged edits
/// while offline. The overlay folds with the same projection rules the
/// server uses.
pub struct CanvasCache {
    canvas_id: Uuid,
    snapshot: BTreeMap<Uuid, ShapeState>,
    version: i64,
    pending: Vec<PendingEvent>,
}

impl CanvasCache {
    pub fn new(canvas_id: Uuid) -> Self {
        Self {
            canvas_id,
            snapshot: BTreeMap::new(),
            version: 0,
            pending: Vec::new(),
        }
    }

    pub fn canvas_id(&self) -> Uuid {
        self.canvas_id
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    /// Record a server-confirmed version; versions only move forward.
    pub fn note_version(&mut self, version: i64) {
        if version > self.version {
            self.version = version;
        }
    }

    pub fn pending(&self) -> &[PendingEvent] {
        &self.pending
    }

    /// Replace the snapshot with fresh server truth. Pending events are kept;
    /// they clear separately once a batch sync acknowledges them.
    pub fn replace_snapshot(&mut self, state: &CanvasStateWire) {
        self.snapshot.clear();
        for wire in &state.shapes {
            if let Some(shape) = shape_from_wire(wire) {
                self.snapshot.insert(shape.id, shape);
            }
        }
        self.version = state.version;
    }

    /// Record (or update in place) a locally-authored event awaiting sync.
    pub fn upsert_pending(&mut self, event: PendingEvent) {
        match self
            .pending
            .iter_mut()
            .find(|existing| existing.local_event_id == event.local_event_id)
        {
            Some(existing) => *existing = event,
            None => self.pending.push(event),
        }
    }

    pub fn remove_pending(&mut self, local_event_id: &str) {
        self.pending
            .retain(|event| event.local_event_id != local_event_id);
    }

    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }

    /// Snapshot ⊕ pending, folded in timestamp order: live shapes in z-order
    /// plus the last server version.
    pub fn effective_state(&self) -> (Vec<ShapeState>, i64) {
        let shapes = self.effective_shapes();
        let live = projection::live_shapes(&shapes)
            .into_iter()
            .cloned()
            .collect();
        (live, self.version)
    }

    /// One shape through the overlay, deleted or not.
    pub fn effective_shape(&self, shape_id: Uuid) -> Option<ShapeState> {
        self.effective_shapes().remove(&shape_id)
    }

    /// Fold a committed remote event into the snapshot. Property edits run
    /// through the resolver against the local (overlaid) state first; the
    /// returned flag says whether that produced a conflict resolution.
    pub fn apply_remote_event(
        &mut self,
        kind: EventKind,
        shape_id: Option<Uuid>,
        payload: &Value,
        version: Option<i64>,
        at: DateTime<Utc>,
    ) -> bool {
        let mut conflicted = false;

        let resolved_edit = match (kind, shape_id) {
            (EventKind::ShapeEdited, Some(id)) => self.effective_shape(id).map(|local| {
                let properties = projection::payload_properties(payload);
                let vector_clock = projection::payload_vector_clock(payload);
                let timestamps = projection::payload_property_timestamps(payload);
                let remote = RemoteEdit {
                    properties: &properties,
                    vector_clock: vector_clock.as_ref(),
                    property_timestamps: &timestamps,
                };
                let resolution = conflict::resolve(&local, &remote);
                conflicted = resolution.had_conflict();
                resolution.applied_properties(&properties)
            }),
            _ => None,
        };

        match resolved_edit {
            Some(winners) => {
                if let Some(shape) = shape_id.and_then(|id| self.snapshot.get_mut(&id)) {
                    let properties = projection::payload_properties(payload);
                    let vector_clock = projection::payload_vector_clock(payload);
                    let timestamps = projection::payload_property_timestamps(payload);
                    conflict::apply_resolution(
                        shape,
                        &RemoteEdit {
                            properties: &properties,
                            vector_clock: vector_clock.as_ref(),
                            property_timestamps: &timestamps,
                        },
                        conflict::Resolution::Merge(winners),
                    );
                    shape.updated_at = at;
                } else {
                    // Shape unknown to the snapshot; fold the event as-is.
                    projection::apply_event(&mut self.snapshot, kind, shape_id, payload, at);
                }
            }
            None => {
                projection::apply_event(&mut self.snapshot, kind, shape_id, payload, at);
            }
        }

        if let Some(version) = version {
            if version > self.version {
                self.version = version;
            }
        }
        conflicted
    }

    fn effective_shapes(&self) -> BTreeMap<Uuid, ShapeState> {
        let mut shapes = self.snapshot.clone();
        let mut overlay: Vec<&PendingEvent> = self.pending.iter().collect();
        overlay.sort_by_key(|event| event.timestamp);
        for event in overlay {
            let at = DateTime::from_timestamp_millis(event.timestamp).unwrap_or_else(Utc::now);
            projection::apply_event(&mut shapes, event.kind, event.shape_id, &event.payload, at);
        }
        shapes
    }
}

/// Parse one `CANVAS_STATE` wire shape (`{id, type, zIndex, ...properties}`)
/// back into a state record.
fn shape_from_wire(wire: &Value) -> Option<ShapeState> {
    let object = wire.as_object()?;
    let id = object
        .get("id")
        .and_then(Value::as_str)
        .and_then(|raw| Uuid::parse_str(raw).ok())?;
    let shape_type: ShapeType =
        serde_json::from_value(object.get("type").cloned()?).ok()?;
    let z_index = object.get("zIndex").and_then(Value::as_i64).unwrap_or(0) as i32;

    let mut properties = Map::new();
    for (key, value) in object {
        if !matches!(key.as_str(), "id" | "type" | "zIndex") {
            properties.insert(key.clone(), value.clone());
        }
    }

    let now = Utc::now();
    Some(ShapeState {
        id,
        shape_type,
        properties,
        z_index,
        vector_clock: Default::default(),
        property_timestamps: Default::default(),
        created_at: now,
        updated_at: now,
        deleted_at: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot_with_rect(canvas: &mut CanvasCache, shape_id: Uuid) {
        canvas.replace_snapshot(&CanvasStateWire {
            shapes: vec![json!({
                "id": shape_id.to_string(),
                "type": "rectangle",
                "zIndex": 0,
                "x": 10.0,
                "y": 20.0,
                "strokeColor": "#000"
            })],
            version: 5,
        });
    }

    fn pending_edit(canvas_id: Uuid, shape_id: Uuid, id: &str, ts: i64, props: Value) -> PendingEvent {
        PendingEvent {
            local_event_id: id.to_string(),
            canvas_id,
            kind: EventKind::ShapeEdited,
            shape_id: Some(shape_id),
            payload: json!({"properties": props}),
            user_id: Uuid::new_v4(),
            timestamp: ts,
        }
    }

    #[test]
    fn effective_state_overlays_pending_edits() {
        let canvas_id = Uuid::new_v4();
        let shape_id = Uuid::new_v4();
        let mut cache = CanvasCache::new(canvas_id);
        snapshot_with_rect(&mut cache, shape_id);

        cache.upsert_pending(pending_edit(
            canvas_id,
            shape_id,
            "e-1",
            100,
            json!({"strokeColor": "#f00"}),
        ));

        let (shapes, version) = cache.effective_state();
        assert_eq!(version, 5);
        assert_eq!(shapes.len(), 1);
        assert_eq!(shapes[0].properties["strokeColor"], json!("#f00"));
        // The snapshot itself is untouched.
        assert_eq!(
            cache.effective_shape(shape_id).unwrap().properties["x"],
            json!(10.0)
        );
    }

    #[test]
    fn pending_overlay_folds_in_timestamp_order() {
        let canvas_id = Uuid::new_v4();
        let shape_id = Uuid::new_v4();
        let mut cache = CanvasCache::new(canvas_id);
        snapshot_with_rect(&mut cache, shape_id);

        cache.upsert_pending(pending_edit(
            canvas_id,
            shape_id,
            "late",
            200,
            json!({"strokeColor": "#00f"}),
        ));
        cache.upsert_pending(pending_edit(
            canvas_id,
            shape_id,
            "early",
            100,
            json!({"strokeColor": "#f00"}),
        ));

        let (shapes, _) = cache.effective_state();
        assert_eq!(shapes[0].properties["strokeColor"], json!("#00f"));
    }

    #[test]
    fn upsert_pending_replaces_same_local_event() {
        let canvas_id = Uuid::new_v4();
        let shape_id = Uuid::new_v4();
        let mut cache = CanvasCache::new(canvas_id);
        snapshot_with_rect(&mut cache, shape_id);

        cache.upsert_pending(pending_edit(canvas_id, shape_id, "e-1", 100, json!({"x": 1.0})));
        cache.upsert_pending(pending_edit(canvas_id, shape_id, "e-1", 150, json!({"x": 2.0})));
        assert_eq!(cache.pending().len(), 1);
        let (shapes, _) = cache.effective_state();
        assert_eq!(shapes[0].properties["x"], json!(2.0));
    }

    #[test]
    fn remote_move_folds_and_advances_version() {
        let canvas_id = Uuid::new_v4();
        let shape_id = Uuid::new_v4();
        let mut cache = CanvasCache::new(canvas_id);
        snapshot_with_rect(&mut cache, shape_id);

        let conflicted = cache.apply_remote_event(
            EventKind::ShapeMoved,
            Some(shape_id),
            &json!({"position": {"x": 100.0, "y": 200.0}}),
            Some(6),
            Utc::now(),
        );
        assert!(!conflicted);
        assert_eq!(cache.version(), 6);
        let shape = cache.effective_shape(shape_id).unwrap();
        assert_eq!(shape.properties["x"], json!(100.0));
    }

    #[test]
    fn stale_remote_edit_keeps_local_values() {
        let canvas_id = Uuid::new_v4();
        let shape_id = Uuid::new_v4();
        let mut cache = CanvasCache::new(canvas_id);
        snapshot_with_rect(&mut cache, shape_id);

        // Our own acked edit advanced the local clock past the remote's.
        cache.apply_remote_event(
            EventKind::ShapeEdited,
            Some(shape_id),
            &json!({"properties": {"strokeColor": "#0f0"}, "vectorClock": {"me": 2}}),
            Some(6),
            Utc::now(),
        );

        let conflicted = cache.apply_remote_event(
            EventKind::ShapeEdited,
            Some(shape_id),
            &json!({"properties": {"strokeColor": "#bad"}, "vectorClock": {"me": 1}}),
            Some(7),
            Utc::now(),
        );
        assert!(conflicted);
        let shape = cache.effective_shape(shape_id).unwrap();
        assert_eq!(shape.properties["strokeColor"], json!("#0f0"));
        assert_eq!(cache.version(), 7);
    }

    #[test]
    fn concurrent_remote_edit_merges_by_property_timestamp() {
        let canvas_id = Uuid::new_v4();
        let shape_id = Uuid::new_v4();
        let mut cache = CanvasCache::new(canvas_id);
        snapshot_with_rect(&mut cache, shape_id);

        cache.apply_remote_event(
            EventKind::ShapeEdited,
            Some(shape_id),
            &json!({
                "properties": {"strokeColor": "#f00"},
                "vectorClock": {"a": 1},
                "propertyTimestamps": {"strokeColor": 1000}
            }),
            Some(6),
            Utc::now(),
        );
        let conflicted = cache.apply_remote_event(
            EventKind::ShapeEdited,
            Some(shape_id),
            &json!({
                "properties": {"strokeWidth": 5},
                "vectorClock": {"b": 1},
                "propertyTimestamps": {"strokeWidth": 1001}
            }),
            Some(7),
            Utc::now(),
        );
        assert!(conflicted);
        let shape = cache.effective_shape(shape_id).unwrap();
        assert_eq!(shape.properties["strokeColor"], json!("#f00"));
        assert_eq!(shape.properties["strokeWidth"], json!(5));
    }

    #[test]
    fn replace_snapshot_resets_shapes_but_not_pending() {
        let canvas_id = Uuid::new_v4();
        let shape_id = Uuid::new_v4();
        let mut cache = CanvasCache::new(canvas_id);
        snapshot_with_rect(&mut cache, shape_id);
        cache.upsert_pending(pending_edit(
            canvas_id,
            shape_id,
            "e-1",
            100,
            json!({"strokeColor": "#f00"}),
        ));

        cache.replace_snapshot(&CanvasStateWire {
            shapes: vec![],
            version: 9,
        });
        assert_eq!(cache.version(), 9);
        assert_eq!(cache.pending().len(), 1);
        let (shapes, _) = cache.effective_state();
        // Pending edit targets a shape the new snapshot no longer has.
        assert!(shapes.is_empty());
    }
}
