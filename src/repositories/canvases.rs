use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::{error::AppError, models::canvases::Canvas};

/// Idempotent create: first access creates the row, every later access
/// bumps `updated_at`. A name supplied on re-access renames the canvas.
pub async fn get_or_create(
    pool: &PgPool,
    canvas_id: Uuid,
    name: Option<&str>,
) -> Result<Canvas, AppError> {
    let canvas = crate::log_query_fetch_one!(
        "canvases.get_or_create",
        sqlx::query_as::<_, Canvas>(
            r#"
                INSERT INTO canvases (id, name)
                VALUES ($1, COALESCE($2, 'Untitled Canvas'))
                ON CONFLICT (id) DO UPDATE
                SET
                    name = COALESCE($2, canvases.name),
                    updated_at = NOW()
                RETURNING *
            "#,
        )
        .bind(canvas_id)
        .bind(name)
        .fetch_one(pool)
    )?;

    Ok(canvas)
}

pub async fn find_by_id(pool: &PgPool, canvas_id: Uuid) -> Result<Option<Canvas>, AppError> {
    let canvas = crate::log_query_fetch_optional!(
        "canvases.find_by_id",
        sqlx::query_as::<_, Canvas>(
            r#"
                SELECT *
                FROM canvases
                WHERE id = $1
            "#,
        )
        .bind(canvas_id)
        .fetch_optional(pool)
    )?;

    Ok(canvas)
}

/// Row lock scoping version allocation to one writer per canvas.
/// Cross-canvas writers never contend on it.
pub async fn lock_canvas(
    tx: &mut Transaction<'_, Postgres>,
    canvas_id: Uuid,
) -> Result<Option<Canvas>, AppError> {
    let canvas = crate::log_query_fetch_optional!(
        "canvases.lock",
        sqlx::query_as::<_, Canvas>(
            r#"
                SELECT *
                FROM canvases
                WHERE id = $1
                FOR UPDATE
            "#,
        )
        .bind(canvas_id)
        .fetch_optional(&mut **tx)
    )?;

    Ok(canvas)
}

pub async fn touch(
    tx: &mut Transaction<'_, Postgres>,
    canvas_id: Uuid,
) -> Result<(), AppError> {
    crate::log_query_execute!(
        "canvases.touch",
        sqlx::query(
            r#"
                UPDATE canvases
                SET updated_at = NOW()
                WHERE id = $1
            "#,
        )
        .bind(canvas_id)
        .execute(&mut **tx)
    )?;

    Ok(())
}
