use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use uuid::Uuid;

/// The collaborative document. The per-canvas version counter is implicit:
/// the maximum version of any event stored against it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Canvas {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
