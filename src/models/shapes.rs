use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "shape_type", rename_all = "lowercase")]
pub enum ShapeType {
    Rectangle,
    Circle,
    Line,
    Arrow,
    Text,
}

/// Projection row: the materialised state of one shape. `properties` is the
/// canonical flat map of geometry, styling, and transform keys.
/// `vector_clock` and `property_timestamps` back the server-side conflict
/// resolver and never leave the server on the state snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Shape {
    pub id: Uuid,
    pub canvas_id: Uuid,
    pub shape_type: ShapeType,
    #[sqlx(json)]
    pub properties: serde_json::Value,
    pub z_index: i32,
    #[sqlx(json)]
    pub vector_clock: serde_json::Value,
    #[sqlx(json)]
    pub property_timestamps: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Shape {
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::ShapeType;

    #[test]
    fn shape_type_wire_names_are_lowercase() {
        assert_eq!(
            serde_json::to_string(&ShapeType::Rectangle).unwrap(),
            "\"rectangle\""
        );
        let parsed: ShapeType = serde_json::from_str("\"arrow\"").unwrap();
        assert_eq!(parsed, ShapeType::Arrow);
    }

    #[test]
    fn unknown_shape_type_is_rejected() {
        assert!(serde_json::from_str::<ShapeType>("\"blob\"").is_err());
    }
}
