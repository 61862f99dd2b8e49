use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::events::{CanvasEvent, EventKind},
};

pub struct InsertEventParams {
    pub id: Uuid,
    pub canvas_id: Uuid,
    pub shape_id: Option<Uuid>,
    pub user_id: Uuid,
    pub event_type: EventKind,
    pub payload: serde_json::Value,
    pub version: i64,
    pub local_event_id: Option<String>,
}

/// Highest committed version for the canvas, 0 when the log is empty.
/// Callers allocating the next version must hold the canvas row lock.
pub async fn max_version(
    tx: &mut Transaction<'_, Postgres>,
    canvas_id: Uuid,
) -> Result<i64, AppError> {
    let version = crate::log_query_fetch_one!(
        "events.max_version",
        sqlx::query_scalar::<_, Option<i64>>(
            r#"
                SELECT MAX(version)
                FROM events
                WHERE canvas_id = $1
            "#,
        )
        .bind(canvas_id)
        .fetch_one(&mut **tx)
    )?;

    Ok(version.unwrap_or(0))
}

pub async fn current_version(pool: &PgPool, canvas_id: Uuid) -> Result<i64, AppError> {
    let version = crate::log_query_fetch_one!(
        "events.current_version",
        sqlx::query_scalar::<_, Option<i64>>(
            r#"
                SELECT MAX(version)
                FROM events
                WHERE canvas_id = $1
            "#,
        )
        .bind(canvas_id)
        .fetch_one(pool)
    )?;

    Ok(version.unwrap_or(0))
}

/// Replay guard: a client retrying an event re-sends its `local_event_id`.
pub async fn find_by_local_event_id(
    tx: &mut Transaction<'_, Postgres>,
    canvas_id: Uuid,
    local_event_id: &str,
) -> Result<Option<CanvasEvent>, AppError> {
    let event = crate::log_query_fetch_optional!(
        "events.find_by_local_event_id",
        sqlx::query_as::<_, CanvasEvent>(
            r#"
                SELECT *
                FROM events
                WHERE canvas_id = $1
                  AND local_event_id = $2
            "#,
        )
        .bind(canvas_id)
        .bind(local_event_id)
        .fetch_optional(&mut **tx)
    )?;

    Ok(event)
}

pub async fn insert_event(
    tx: &mut Transaction<'_, Postgres>,
    params: InsertEventParams,
) -> Result<CanvasEvent, AppError> {
    let payload = sqlx::types::Json(params.payload);

    let event = crate::log_query_fetch_one!(
        "events.insert",
        sqlx::query_as::<_, CanvasEvent>(
            r#"
                INSERT INTO events (
                    id,
                    canvas_id,
                    shape_id,
                    user_id,
                    event_type,
                    payload,
                    version,
                    local_event_id
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING *
            "#,
        )
        .bind(params.id)
        .bind(params.canvas_id)
        .bind(params.shape_id)
        .bind(params.user_id)
        .bind(params.event_type)
        .bind(payload)
        .bind(params.version)
        .bind(params.local_event_id)
        .fetch_one(&mut **tx)
    )?;

    Ok(event)
}

/// Events with version strictly greater than `since`, ascending.
pub async fn events_since(
    pool: &PgPool,
    canvas_id: Uuid,
    since: i64,
) -> Result<Vec<CanvasEvent>, AppError> {
    let events = crate::log_query_fetch_all!(
        "events.since",
        sqlx::query_as::<_, CanvasEvent>(
            r#"
                SELECT *
                FROM events
                WHERE canvas_id = $1
                  AND version > $2
                ORDER BY version ASC
            "#,
        )
        .bind(canvas_id)
        .bind(since)
        .fetch_all(pool)
    )?;

    Ok(events)
}
