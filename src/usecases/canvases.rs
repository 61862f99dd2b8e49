use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    dto::canvases::CanvasResponse,
    error::AppError,
    models::canvases::Canvas,
    repositories::canvases as canvas_repo,
};

pub struct CanvasService;

impl CanvasService {
    /// Canvases are created on first access and never deleted by the core.
    pub async fn get_or_create(
        pool: &PgPool,
        canvas_id: Uuid,
        name: Option<&str>,
    ) -> Result<Canvas, AppError> {
        canvas_repo::get_or_create(pool, canvas_id, name).await
    }

    pub async fn get_metadata(pool: &PgPool, canvas_id: Uuid) -> Result<CanvasResponse, AppError> {
        let canvas = canvas_repo::find_by_id(pool, canvas_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Canvas not found".to_string()))?;
        Ok(canvas_to_response(canvas))
    }
}

fn canvas_to_response(canvas: Canvas) -> CanvasResponse {
    CanvasResponse {
        id: canvas.id,
        name: canvas.name,
        created_at: canvas.created_at,
        updated_at: canvas.updated_at,
    }
}
