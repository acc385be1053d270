//! Persistence gateway: validated load/replace/delete of a room's shapes.
//!
//! Shared by the realtime path and the REST handlers so both observe the same
//! replace-all semantics.
use std::sync::Arc;

use metrics::counter;
use serde_json::Value;
use tracing::instrument;
use whiteboard_common::Shape;

use crate::error::AppError;
use crate::metrics::SHAPE_FALLBACK;
use crate::storage::{ShapeRecord, ShapeStore};

#[derive(Clone)]
pub struct PersistenceGateway {
    store: Arc<dyn ShapeStore>,
}

impl PersistenceGateway {
    pub fn new(store: impl ShapeStore + 'static) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    pub fn from_store(store: Arc<dyn ShapeStore>) -> Self {
        Self { store }
    }

    /// Idempotent upsert of the room row
    #[instrument(skip(self), level = "debug")]
    pub async fn ensure_room(&self, room_id: &str) -> Result<(), AppError> {
        self.store.ensure_room(room_id).await
    }

    /// Read a room's shapes in stored order.
    ///
    /// A record whose payload is not a valid shape comes back as
    /// [`Shape::fallback`], so the count and order of shapes are preserved.
    #[instrument(skip(self))]
    pub async fn load_shapes(&self, room_id: &str) -> Result<Vec<Shape>, AppError> {
        self.ensure_room(room_id).await?;
        let records = self.store.read_records(room_id).await?;

        let shapes: Vec<Shape> = records
            .iter()
            .map(|record| match Shape::from_value(&record.data) {
                Ok(shape) => shape,
                Err(e) => {
                    tracing::warn!(
                        record_id = %record.id,
                        error = %e,
                        "invalid shape data in storage, using fallback"
                    );
                    counter!(SHAPE_FALLBACK).increment(1);
                    Shape::fallback()
                },
            })
            .collect();

        tracing::debug!(count = shapes.len(), "loaded shapes");
        Ok(shapes)
    }

    /// Replace a room's shapes with the valid members of `shapes`.
    ///
    /// Invalid payloads are dropped. Returns how many shapes were stored.
    #[instrument(skip(self, shapes), fields(submitted = shapes.len()))]
    pub async fn replace_shapes(&self, room_id: &str, shapes: &[Value]) -> Result<usize, AppError> {
        self.ensure_room(room_id).await?;

        let records: Vec<ShapeRecord> = shapes
            .iter()
            .filter(|value| Shape::from_value(value).is_ok())
            .map(|value| ShapeRecord::from_value(room_id, value.clone()))
            .collect();

        if records.len() != shapes.len() {
            tracing::warn!(
                filtered = shapes.len() - records.len(),
                "filtered out invalid shapes"
            );
        }

        let stored = records.len();
        self.store.replace_records(room_id, records).await?;
        Ok(stored)
    }

    /// Replace a room's shapes with an already validated sequence
    #[instrument(skip(self, shapes), fields(count = shapes.len()))]
    pub async fn replace_with(&self, room_id: &str, shapes: &[Shape]) -> Result<(), AppError> {
        self.ensure_room(room_id).await?;
        let records = shapes
            .iter()
            .map(|shape| ShapeRecord::new(room_id, shape))
            .collect();
        self.store.replace_records(room_id, records).await
    }

    /// Delete every persisted shape of a room. The room row stays.
    #[instrument(skip(self))]
    pub async fn delete_shapes(&self, room_id: &str) -> Result<(), AppError> {
        self.ensure_room(room_id).await?;
        self.store.delete_records(room_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use serde_json::json;

    fn shape_at(x: f64) -> Shape {
        let mut shape = Shape::fallback();
        shape.x = x;
        shape.color = "#00ff00".to_string();
        shape
    }

    #[tokio::test]
    async fn test_load_substitutes_fallback_in_place() {
        let storage = MemoryStorage::new();
        storage.insert_raw("r", shape_at(1.0).to_value());
        storage.insert_raw("r", json!({ "type": "rect", "x": "nope", "y": 0 }));
        storage.insert_raw("r", shape_at(3.0).to_value());

        let gateway = PersistenceGateway::new(storage);
        let shapes = gateway.load_shapes("r").await.unwrap();
        assert_eq!(shapes, vec![shape_at(1.0), Shape::fallback(), shape_at(3.0)]);
    }

    #[tokio::test]
    async fn test_load_ensures_room() {
        let storage = MemoryStorage::new();
        let gateway = PersistenceGateway::new(storage.clone());
        assert!(gateway.load_shapes("fresh").await.unwrap().is_empty());
        assert!(storage.has_room("fresh"));
    }

    #[tokio::test]
    async fn test_replace_drops_invalid_shapes() {
        let storage = MemoryStorage::new();
        let gateway = PersistenceGateway::new(storage.clone());

        let stored = gateway
            .replace_shapes("r", &[shape_at(5.0).to_value(), json!({ "type": "circle" })])
            .await
            .unwrap();
        assert_eq!(stored, 1);
        assert_eq!(storage.record_count("r"), 1);
        assert_eq!(gateway.load_shapes("r").await.unwrap(), vec![shape_at(5.0)]);
    }

    #[tokio::test]
    async fn test_delete_then_load_is_empty() {
        let storage = MemoryStorage::new();
        let gateway = PersistenceGateway::new(storage.clone());
        gateway
            .replace_with("r", &[shape_at(1.0), shape_at(2.0)])
            .await
            .unwrap();
        gateway.delete_shapes("r").await.unwrap();

        assert!(gateway.load_shapes("r").await.unwrap().is_empty());
        assert!(storage.has_room("r"));
    }

    #[tokio::test]
    async fn test_failures_are_raised_to_caller() {
        let storage = MemoryStorage::new();
        let gateway = PersistenceGateway::new(storage.clone());
        storage.set_failing(true);

        assert!(gateway.load_shapes("r").await.is_err());
        assert!(gateway.replace_with("r", &[shape_at(1.0)]).await.is_err());
        assert!(gateway.delete_shapes("r").await.is_err());
    }
}
