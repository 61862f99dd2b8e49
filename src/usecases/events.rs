use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::{
    dto::events::{CanvasStateWire, ConflictWire, EventWire, PendingEventWire, RejectedEventWire},
    error::AppError,
    models::events::{CanvasEvent, EventKind},
    repositories::{canvases as canvas_repo, events as event_repo, shapes as shape_repo},
    sync::{
        conflict::{self, RemoteEdit, Resolution},
        projection::{self, ShapeState},
    },
};

/// How close the projection row's `updated_at` must be to the client's
/// declared base timestamp before an unclocked edit is treated as a possible
/// conflict.
const CONFLICT_WINDOW_MS: i64 = 1_000;

pub struct EventService;

#[derive(Debug, Clone)]
pub struct StoreOutcome {
    pub event_id: Option<Uuid>,
    pub version: i64,
    /// The payload as resolved and stored; broadcast this, not the input.
    pub payload: serde_json::Value,
    pub stored: bool,
    pub had_conflict: bool,
}

#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub stored: Vec<EventWire>,
    pub conflicts: Vec<ConflictWire>,
    /// Events refused by the write-admission rules, with reasons. A batch
    /// never drops an event silently.
    pub rejected: Vec<RejectedEventWire>,
}

struct Committed {
    event: CanvasEvent,
    had_conflict: bool,
}

impl EventService {
    /// Atomic per-event commit: lock the canvas row, allocate the next dense
    /// version, append, fold the projection, bump `updated_at`.
    #[allow(clippy::too_many_arguments)]
    pub async fn store_event(
        pool: &PgPool,
        canvas_id: Uuid,
        user_id: Uuid,
        kind: EventKind,
        shape_id: Option<Uuid>,
        payload: &serde_json::Value,
        local_event_id: Option<&str>,
        client_timestamp: Option<i64>,
    ) -> Result<StoreOutcome, AppError> {
        if let Err(message) = admit_write(kind, shape_id) {
            return Err(AppError::ValidationError(message));
        }
        if !kind.is_storable() {
            // Ephemeral kinds short-circuit at the current version.
            let version = event_repo::current_version(pool, canvas_id).await?;
            return Ok(StoreOutcome {
                event_id: None,
                version,
                payload: payload.clone(),
                stored: false,
                had_conflict: false,
            });
        }

        let mut tx = pool.begin().await?;
        canvas_repo::lock_canvas(&mut tx, canvas_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Canvas not found".to_string()))?;
        let mut next_version = event_repo::max_version(&mut tx, canvas_id).await? + 1;

        let committed = commit_one(
            &mut tx,
            canvas_id,
            user_id,
            kind,
            shape_id,
            payload,
            local_event_id,
            client_timestamp,
            &mut next_version,
        )
        .await?;

        canvas_repo::touch(&mut tx, canvas_id).await?;
        tx.commit().await?;

        Ok(StoreOutcome {
            event_id: Some(committed.event.id),
            version: committed.event.version,
            payload: committed.event.payload.clone(),
            stored: true,
            had_conflict: committed.had_conflict,
        })
    }

    /// One transaction for a whole offline batch, in client timestamp order.
    /// Replayed `localEventId`s resolve to their original rows instead of
    /// storing twice.
    pub async fn store_batch(
        pool: &PgPool,
        canvas_id: Uuid,
        fallback_user_id: Uuid,
        events: &[PendingEventWire],
    ) -> Result<BatchOutcome, AppError> {
        let mut ordered: Vec<&PendingEventWire> = events.iter().collect();
        ordered.sort_by_key(|event| event.timestamp.unwrap_or(0));

        let mut tx = pool.begin().await?;
        canvas_repo::lock_canvas(&mut tx, canvas_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Canvas not found".to_string()))?;
        let mut next_version = event_repo::max_version(&mut tx, canvas_id).await? + 1;

        let mut stored = Vec::new();
        let mut conflicts = Vec::new();
        let mut rejected = Vec::new();
        for incoming in ordered {
            // Same admission rules as the live path; a refused event is
            // reported back instead of silently dropped.
            let admission = admit_write(incoming.event_type, incoming.shape_id).and_then(|_| {
                if incoming.event_type.is_storable() {
                    Ok(())
                } else {
                    Err(format!(
                        "{} is not a storable kind",
                        incoming.event_type.as_str()
                    ))
                }
            });
            if let Err(message) = admission {
                tracing::warn!(
                    kind = incoming.event_type.as_str(),
                    local_event_id = %incoming.local_event_id,
                    error = %message,
                    "Rejecting batched event"
                );
                rejected.push(RejectedEventWire {
                    local_event_id: incoming.local_event_id.clone(),
                    error: message,
                });
                continue;
            }

            let user_id = incoming.user_id.unwrap_or(fallback_user_id);
            let committed = commit_one(
                &mut tx,
                canvas_id,
                user_id,
                incoming.event_type,
                incoming.shape_id,
                &incoming.payload,
                Some(incoming.local_event_id.as_str()),
                incoming.timestamp,
                &mut next_version,
            )
            .await?;

            if committed.had_conflict {
                conflicts.push(ConflictWire {
                    local_event_id: Some(incoming.local_event_id.clone()),
                    shape_id: incoming.shape_id,
                    event_type: incoming.event_type,
                    resolved_payload: committed.event.payload.clone(),
                    version: committed.event.version,
                });
            }
            stored.push(EventWire::from(committed.event));
        }

        canvas_repo::touch(&mut tx, canvas_id).await?;
        tx.commit().await?;

        Ok(BatchOutcome {
            stored,
            conflicts,
            rejected,
        })
    }

    /// Live shapes z-order ascending, with the current max version.
    pub async fn get_canvas_state(
        pool: &PgPool,
        canvas_id: Uuid,
    ) -> Result<CanvasStateWire, AppError> {
        let rows = shape_repo::list_live_shapes(pool, canvas_id).await?;
        let version = event_repo::current_version(pool, canvas_id).await?;
        Ok(CanvasStateWire {
            shapes: rows
                .iter()
                .map(|row| ShapeState::from_row(row).to_wire())
                .collect(),
            version,
        })
    }

    pub async fn events_since(
        pool: &PgPool,
        canvas_id: Uuid,
        since: i64,
    ) -> Result<Vec<EventWire>, AppError> {
        let events = event_repo::events_since(pool, canvas_id, since).await?;
        Ok(events.into_iter().map(EventWire::from).collect())
    }
}

#[allow(clippy::too_many_arguments)]
async fn commit_one(
    tx: &mut Transaction<'_, Postgres>,
    canvas_id: Uuid,
    user_id: Uuid,
    kind: EventKind,
    shape_id: Option<Uuid>,
    payload: &serde_json::Value,
    local_event_id: Option<&str>,
    client_timestamp: Option<i64>,
    next_version: &mut i64,
) -> Result<Committed, AppError> {
    if let Some(local_id) = local_event_id {
        if let Some(existing) = event_repo::find_by_local_event_id(tx, canvas_id, local_id).await?
        {
            return Ok(Committed {
                event: existing,
                had_conflict: false,
            });
        }
    }

    let mut resolved = projection::normalize_payload(kind, payload);

    let existing_shape = match shape_id {
        Some(id) if kind.affects_projection() => shape_repo::find_by_id(tx, canvas_id, id).await?,
        _ => None,
    };

    let mut had_conflict = false;
    if kind == EventKind::ShapeEdited {
        if let Some(row) = existing_shape.as_ref() {
            let local = ShapeState::from_row(row);
            let remote_props = projection::payload_properties(&resolved);
            let remote_vc = projection::payload_vector_clock(&resolved);
            let remote_pt = projection::payload_property_timestamps(&resolved);

            let resolution = match remote_vc.as_ref() {
                Some(remote_vc) => conflict::resolve(
                    &local,
                    &RemoteEdit {
                        properties: &remote_props,
                        vector_clock: Some(remote_vc),
                        property_timestamps: &remote_pt,
                    },
                ),
                None if within_conflict_window(row.updated_at, client_timestamp, &remote_pt) => {
                    Resolution::Merge(conflict::merge_properties(
                        &local.properties,
                        &local.property_timestamps,
                        &remote_props,
                        &remote_pt,
                    ))
                }
                None => Resolution::ApplyRemote,
            };

            had_conflict = resolution.had_conflict();
            if had_conflict {
                let winners = resolution.applied_properties(&remote_props);
                if let Some(object) = resolved.as_object_mut() {
                    object.insert("properties".into(), serde_json::Value::Object(winners));
                }
            }
        }
    }

    let event = event_repo::insert_event(
        tx,
        event_repo::InsertEventParams {
            id: Uuid::now_v7(),
            canvas_id,
            shape_id,
            user_id,
            event_type: kind,
            payload: resolved,
            version: *next_version,
            local_event_id: local_event_id.map(str::to_string),
        },
    )
    .await?;
    *next_version += 1;

    project_event(tx, canvas_id, &event, existing_shape.map(|row| ShapeState::from_row(&row)))
        .await?;

    Ok(Committed {
        event,
        had_conflict,
    })
}

/// Fold the committed event onto the loaded shape state and write the result
/// back, keeping the row equal to the left-fold of the log.
async fn project_event(
    tx: &mut Transaction<'_, Postgres>,
    canvas_id: Uuid,
    event: &CanvasEvent,
    existing: Option<ShapeState>,
) -> Result<(), AppError> {
    if !event.event_type.affects_projection() {
        return Ok(());
    }
    let Some(shape_id) = event.shape_id else {
        return Ok(());
    };

    let mut shapes = BTreeMap::new();
    if let Some(state) = existing {
        shapes.insert(state.id, state);
    }
    projection::apply_event(
        &mut shapes,
        event.event_type,
        Some(shape_id),
        &event.payload,
        event.created_at,
    );
    let Some(state) = shapes.get(&shape_id) else {
        return Ok(());
    };

    shape_repo::upsert_shape(
        tx,
        shape_repo::ShapeUpsertParams {
            id: state.id,
            canvas_id,
            shape_type: state.shape_type,
            properties: serde_json::Value::Object(state.properties.clone()),
            z_index: state.z_index,
            vector_clock: serde_json::to_value(&state.vector_clock)
                .unwrap_or(serde_json::Value::Null),
            property_timestamps: serde_json::to_value(&state.property_timestamps)
                .unwrap_or(serde_json::Value::Null),
            created_at: state.created_at,
            updated_at: state.updated_at,
            deleted_at: state.deleted_at,
        },
    )
    .await
}

/// Write-admission rules shared by the live and batch paths: legacy kinds
/// are replay-only, and shape-scoped kinds must name their shape.
fn admit_write(kind: EventKind, shape_id: Option<Uuid>) -> Result<(), String> {
    if kind.is_legacy() {
        return Err(format!(
            "Event kind {} is accepted for reads only",
            kind.as_str()
        ));
    }
    if kind.requires_shape() && shape_id.is_none() {
        return Err(format!("{} requires a shapeId", kind.as_str()));
    }
    Ok(())
}

fn within_conflict_window(
    row_updated_at: DateTime<Utc>,
    client_timestamp: Option<i64>,
    remote_timestamps: &std::collections::HashMap<String, i64>,
) -> bool {
    let base_ms = client_timestamp
        .or_else(|| remote_timestamps.values().copied().max())
        .unwrap_or_else(|| Utc::now().timestamp_millis());
    (row_updated_at.timestamp_millis() - base_ms).abs() <= CONFLICT_WINDOW_MS
}

#[cfg(test)]
mod tests {
    use super::{admit_write, within_conflict_window};
    use crate::models::events::EventKind;
    use chrono::{DateTime, Utc};
    use std::collections::HashMap;
    use uuid::Uuid;

    #[test]
    fn admit_write_rejects_legacy_kinds() {
        for kind in [
            EventKind::ShapeUpdated,
            EventKind::ShapeResized,
            EventKind::ShapeRotated,
            EventKind::ShapeRestored,
            EventKind::ZIndexChanged,
        ] {
            let error = admit_write(kind, Some(Uuid::new_v4())).unwrap_err();
            assert!(error.contains("reads only"), "unexpected error: {error}");
        }
    }

    #[test]
    fn admit_write_requires_shape_for_shape_kinds() {
        assert!(admit_write(EventKind::ShapeEdited, None).is_err());
        assert!(admit_write(EventKind::ShapeEdited, Some(Uuid::new_v4())).is_ok());
    }

    #[test]
    fn admit_write_accepts_audit_and_ephemeral_kinds_without_shape() {
        // Ephemerals pass admission; the storable check decides what happens
        // to them next (short-circuit live, rejection marker in a batch).
        assert!(admit_write(EventKind::PointerDown, None).is_ok());
        assert!(admit_write(EventKind::UserConnected, None).is_ok());
        assert!(admit_write(EventKind::CursorMove, None).is_ok());
    }

    fn at_ms(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    #[test]
    fn window_uses_declared_base_timestamp() {
        assert!(within_conflict_window(at_ms(10_000), Some(10_500), &HashMap::new()));
        assert!(!within_conflict_window(at_ms(10_000), Some(12_000), &HashMap::new()));
    }

    #[test]
    fn window_falls_back_to_property_timestamps() {
        let stamps: HashMap<String, i64> = [("x".to_string(), 10_900)].into_iter().collect();
        assert!(within_conflict_window(at_ms(10_000), None, &stamps));
        let stale: HashMap<String, i64> = [("x".to_string(), 20_000)].into_iter().collect();
        assert!(!within_conflict_window(at_ms(10_000), None, &stale));
    }
}
