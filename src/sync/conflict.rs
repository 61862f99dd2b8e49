use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::sync::{projection::ShapeState, vector_clock::VectorClock};

/// What to do with a remote edit against known local state.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Remote is causally stale; local state stands.
    KeepLocal,
    /// Local is causally stale; remote's properties overwrite.
    ApplyRemote,
    /// Concurrent: per-property winners for the remote-touched keys.
    Merge(Map<String, Value>),
}

impl Resolution {
    /// Whether the outcome should be surfaced as a conflict to clients.
    pub fn had_conflict(&self) -> bool {
        !matches!(self, Resolution::ApplyRemote)
    }

    /// The properties that end up applied on top of local state.
    pub fn applied_properties(self, remote: &Map<String, Value>) -> Map<String, Value> {
        match self {
            Resolution::KeepLocal => Map::new(),
            Resolution::ApplyRemote => remote.clone(),
            Resolution::Merge(winners) => winners,
        }
    }
}

/// A remote property edit as seen by the resolver.
#[derive(Debug, Clone)]
pub struct RemoteEdit<'a> {
    pub properties: &'a Map<String, Value>,
    pub vector_clock: Option<&'a VectorClock>,
    pub property_timestamps: &'a HashMap<String, i64>,
}

/// Vector-clock comparison first; concurrent edits fall through to the
/// per-property timestamp merge. A remote edit without a clock cannot be
/// ordered causally and is applied as-is (callers wanting the time-window
/// safety net use [`merge_properties`] directly).
pub fn resolve(local: &ShapeState, remote: &RemoteEdit<'_>) -> Resolution {
    let Some(remote_vc) = remote.vector_clock else {
        return Resolution::ApplyRemote;
    };
    if remote_vc.happens_before(&local.vector_clock) {
        return Resolution::KeepLocal;
    }
    if local.vector_clock.happens_before(remote_vc) {
        return Resolution::ApplyRemote;
    }
    Resolution::Merge(merge_properties(
        &local.properties,
        &local.property_timestamps,
        remote.properties,
        remote.property_timestamps,
    ))
}

/// Per-property merge over the remote-touched keys: the greater property
/// timestamp wins, remote wins ties, absent stamps read as 0. Keys only the
/// local side touched are not in the result and therefore keep their local
/// value.
pub fn merge_properties(
    local_properties: &Map<String, Value>,
    local_timestamps: &HashMap<String, i64>,
    remote_properties: &Map<String, Value>,
    remote_timestamps: &HashMap<String, i64>,
) -> Map<String, Value> {
    let mut winners = Map::new();
    for (key, remote_value) in remote_properties {
        let remote_stamp = remote_timestamps.get(key).copied().unwrap_or(0);
        let local_stamp = local_timestamps.get(key).copied().unwrap_or(0);
        if remote_stamp >= local_stamp {
            winners.insert(key.clone(), remote_value.clone());
        } else if let Some(local_value) = local_properties.get(key) {
            winners.insert(key.clone(), local_value.clone());
        } else {
            winners.insert(key.clone(), remote_value.clone());
        }
    }
    winners
}

/// Fold a resolution into local state: apply the winning properties, absorb
/// the remote clock, and keep the per-key maximum of both timestamp maps.
pub fn apply_resolution(
    local: &mut ShapeState,
    remote: &RemoteEdit<'_>,
    resolution: Resolution,
) {
    for (key, value) in resolution.applied_properties(remote.properties) {
        local.properties.insert(key, value);
    }
    if let Some(remote_vc) = remote.vector_clock {
        local.vector_clock.merge(remote_vc);
    }
    for (key, stamp) in remote.property_timestamps {
        let entry = local.property_timestamps.entry(key.clone()).or_insert(0);
        if *stamp > *entry {
            *entry = *stamp;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::shapes::ShapeType;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn base_shape(properties: Value, vc: VectorClock, pt: &[(&str, i64)]) -> ShapeState {
        ShapeState {
            id: Uuid::new_v4(),
            shape_type: ShapeType::Rectangle,
            properties: properties.as_object().cloned().unwrap_or_default(),
            z_index: 0,
            vector_clock: vc,
            property_timestamps: pt.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    fn vc(entries: &[(&str, u64)]) -> VectorClock {
        let mut clock = VectorClock::new();
        for (node, count) in entries {
            for _ in 0..*count {
                clock.increment(node);
            }
        }
        clock
    }

    fn timestamps(entries: &[(&str, i64)]) -> HashMap<String, i64> {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn stale_remote_keeps_local() {
        let local = base_shape(json!({"x": 5.0}), vc(&[("a", 2)]), &[]);
        let props = json!({"x": 1.0}).as_object().cloned().unwrap();
        let remote_vc = vc(&[("a", 1)]);
        let remote = RemoteEdit {
            properties: &props,
            vector_clock: Some(&remote_vc),
            property_timestamps: &HashMap::new(),
        };
        assert_eq!(resolve(&local, &remote), Resolution::KeepLocal);
    }

    #[test]
    fn causality_soundness_never_keeps_local_against_successor() {
        // If local happened-before remote, the resolver must apply remote.
        let local = base_shape(json!({"x": 5.0}), vc(&[("a", 1)]), &[]);
        let props = json!({"x": 9.0}).as_object().cloned().unwrap();
        let remote_vc = vc(&[("a", 1), ("b", 1)]);
        let remote = RemoteEdit {
            properties: &props,
            vector_clock: Some(&remote_vc),
            property_timestamps: &HashMap::new(),
        };
        assert_eq!(resolve(&local, &remote), Resolution::ApplyRemote);
    }

    #[test]
    fn concurrent_disjoint_edits_merge_to_union_either_order() {
        // Base {strokeColor: #000, strokeWidth: 2}; A sets strokeColor=#f00
        // @1000 with {A:1}; B sets strokeWidth=5 @1001 with {B:1}. Final
        // state is the union regardless of arrival order.
        let base_props = json!({"strokeColor": "#000", "strokeWidth": 2});
        let a_props = json!({"strokeColor": "#f00"}).as_object().cloned().unwrap();
        let b_props = json!({"strokeWidth": 5}).as_object().cloned().unwrap();
        let a_vc = vc(&[("A", 1)]);
        let b_vc = vc(&[("B", 1)]);
        let a_pt = timestamps(&[("strokeColor", 1000)]);
        let b_pt = timestamps(&[("strokeWidth", 1001)]);

        for (first, second) in [
            ((&a_props, &a_vc, &a_pt), (&b_props, &b_vc, &b_pt)),
            ((&b_props, &b_vc, &b_pt), (&a_props, &a_vc, &a_pt)),
        ] {
            let mut local = base_shape(base_props.clone(), VectorClock::new(), &[]);

            let remote = RemoteEdit {
                properties: first.0,
                vector_clock: Some(first.1),
                property_timestamps: first.2,
            };
            let resolution = resolve(&local, &remote);
            // First arrival against an empty clock is a plain apply.
            assert_eq!(resolution, Resolution::ApplyRemote);
            apply_resolution(&mut local, &remote, resolution);

            let remote = RemoteEdit {
                properties: second.0,
                vector_clock: Some(second.1),
                property_timestamps: second.2,
            };
            let resolution = resolve(&local, &remote);
            assert!(resolution.had_conflict());
            apply_resolution(&mut local, &remote, resolution);

            assert_eq!(local.properties["strokeColor"], json!("#f00"));
            assert_eq!(local.properties["strokeWidth"], json!(5));
            assert_eq!(local.vector_clock.get("A"), 1);
            assert_eq!(local.vector_clock.get("B"), 1);
        }
    }

    #[test]
    fn merge_tie_goes_to_remote() {
        let winners = merge_properties(
            &json!({"x": 1.0}).as_object().cloned().unwrap(),
            &timestamps(&[("x", 1000)]),
            &json!({"x": 2.0}).as_object().cloned().unwrap(),
            &timestamps(&[("x", 1000)]),
        );
        assert_eq!(winners["x"], json!(2.0));
    }

    #[test]
    fn merge_keeps_local_value_with_newer_stamp() {
        let winners = merge_properties(
            &json!({"x": 1.0, "y": 2.0}).as_object().cloned().unwrap(),
            &timestamps(&[("x", 2000)]),
            &json!({"x": 9.0, "y": 9.0}).as_object().cloned().unwrap(),
            &timestamps(&[("x", 1000), ("y", 1000)]),
        );
        assert_eq!(winners["x"], json!(1.0));
        assert_eq!(winners["y"], json!(9.0));
    }

    #[test]
    fn remote_without_clock_applies_as_is() {
        let local = base_shape(json!({"x": 5.0}), vc(&[("a", 3)]), &[]);
        let props = json!({"x": 1.0}).as_object().cloned().unwrap();
        let remote = RemoteEdit {
            properties: &props,
            vector_clock: None,
            property_timestamps: &HashMap::new(),
        };
        let resolution = resolve(&local, &remote);
        assert_eq!(resolution, Resolution::ApplyRemote);
        assert!(!resolution.had_conflict());
    }
}
