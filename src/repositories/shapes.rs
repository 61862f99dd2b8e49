use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::{error::AppError, models::shapes::{Shape, ShapeType}};

pub struct ShapeUpsertParams {
    pub id: Uuid,
    pub canvas_id: Uuid,
    pub shape_type: ShapeType,
    pub properties: serde_json::Value,
    pub z_index: i32,
    pub vector_clock: serde_json::Value,
    pub property_timestamps: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

pub async fn find_by_id(
    tx: &mut Transaction<'_, Postgres>,
    canvas_id: Uuid,
    shape_id: Uuid,
) -> Result<Option<Shape>, AppError> {
    let shape = crate::log_query_fetch_optional!(
        "shapes.find_by_id",
        sqlx::query_as::<_, Shape>(
            r#"
                SELECT *
                FROM shapes
                WHERE id = $1
                  AND canvas_id = $2
            "#,
        )
        .bind(shape_id)
        .bind(canvas_id)
        .fetch_optional(&mut **tx)
    )?;

    Ok(shape)
}

/// Writes one folded shape state. The row always mirrors the event fold, so
/// the upsert overwrites every projected column.
pub async fn upsert_shape(
    tx: &mut Transaction<'_, Postgres>,
    params: ShapeUpsertParams,
) -> Result<(), AppError> {
    let properties = sqlx::types::Json(params.properties);
    let vector_clock = sqlx::types::Json(params.vector_clock);
    let property_timestamps = sqlx::types::Json(params.property_timestamps);

    crate::log_query_execute!(
        "shapes.upsert",
        sqlx::query(
            r#"
                INSERT INTO shapes (
                    id,
                    canvas_id,
                    shape_type,
                    properties,
                    z_index,
                    vector_clock,
                    property_timestamps,
                    created_at,
                    updated_at,
                    deleted_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (id) DO UPDATE
                SET
                    shape_type = EXCLUDED.shape_type,
                    properties = EXCLUDED.properties,
                    z_index = EXCLUDED.z_index,
                    vector_clock = EXCLUDED.vector_clock,
                    property_timestamps = EXCLUDED.property_timestamps,
                    updated_at = EXCLUDED.updated_at,
                    deleted_at = EXCLUDED.deleted_at
            "#,
        )
        .bind(params.id)
        .bind(params.canvas_id)
        .bind(params.shape_type)
        .bind(properties)
        .bind(params.z_index)
        .bind(vector_clock)
        .bind(property_timestamps)
        .bind(params.created_at)
        .bind(params.updated_at)
        .bind(params.deleted_at)
        .execute(&mut **tx)
    )?;

    Ok(())
}

/// Live shapes for the state snapshot, z-order ascending.
pub async fn list_live_shapes(pool: &PgPool, canvas_id: Uuid) -> Result<Vec<Shape>, AppError> {
    let shapes = crate::log_query_fetch_all!(
        "shapes.list_live",
        sqlx::query_as::<_, Shape>(
            r#"
                SELECT *
                FROM shapes
                WHERE canvas_id = $1
                  AND deleted_at IS NULL
                ORDER BY z_index ASC, created_at ASC
            "#,
        )
        .bind(canvas_id)
        .fetch_all(pool)
    )?;

    Ok(shapes)
}
