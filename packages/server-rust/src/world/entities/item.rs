//! Item: a world object with a multi-cell footprint.
//!
//! The footprint is the anchor position plus the cell offsets from the
//! `item_shapes` child table. A shaped item belongs to every subzone any
//! footprint cell touches, and subzone loading fetches it whole as soon as
//! one cell intersects the loaded rectangle.

use sqlx::postgres::PgRow;
use tilemud_core::{EntityKind, FieldValue, Vec2};

use crate::storage::{SqlParam, StorageError};
use crate::world::entities::{col, EntityRef, Location};
use crate::world::entity::{EntityMeta, Ref, Shared, Stored};
use crate::world::tracker::ChangeTracker;

#[derive(Debug, Default)]
pub struct Item {
    meta: EntityMeta,
    pub name: String,
    pub location: Ref<Location>,
    position: Vec2,
    /// Footprint cell offsets relative to `position`. Empty means a single
    /// cell at the anchor. Loaded from `item_shapes`, owned by seeding.
    pub shape: Vec<Vec2>,
}

impl Item {
    #[must_use]
    pub fn position(&self) -> Vec2 {
        self.position
    }

    pub fn set_position(&mut self, tracker: &ChangeTracker, position: Vec2) {
        if self.position == position {
            return;
        }
        tracker.update(
            Self::KIND,
            self.meta.id,
            "position",
            FieldValue::Vec2(self.position),
        );
        self.position = position;
    }

    pub fn set_position_untracked(&mut self, position: Vec2) {
        self.position = position;
    }

    /// Every cell the item occupies.
    #[must_use]
    pub fn positions(&self) -> Vec<Vec2> {
        if self.shape.is_empty() {
            vec![self.position]
        } else {
            self.shape.iter().map(|offset| self.position + *offset).collect()
        }
    }

    #[must_use]
    pub fn sync_field(&self, field: &str) -> Option<serde_json::Value> {
        match field {
            "id" => Some(serde_json::json!(self.meta.id)),
            "name" => Some(serde_json::json!(self.name)),
            "position" => Some(serde_json::json!({"x": self.position.x, "y": self.position.y})),
            _ => None,
        }
    }
}

impl Stored for Item {
    const KIND: EntityKind = EntityKind::Item;

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }

    fn stub(id: i64) -> Self {
        Self {
            meta: EntityMeta::stub(id),
            ..Self::default()
        }
    }

    fn hydrate(&mut self, row: &PgRow) -> Result<(), StorageError> {
        self.meta.id = col(row, "id")?;
        self.name = col(row, "name")?;
        self.location.adopt(col::<Option<i64>>(row, "location_id")?);
        self.position = Vec2::new(col(row, "x")?, col(row, "y")?);
        self.meta.initialized = true;
        Ok(())
    }

    fn insert_columns(&self) -> Vec<(String, SqlParam)> {
        let mut columns = vec![
            ("name".into(), self.name.as_str().into()),
            super::ref_column("location", self.location.key()),
        ];
        columns.extend(super::vec2_columns("position", self.position));
        columns
    }

    fn columns_for_field(&self, field: &str) -> Vec<(String, SqlParam)> {
        match field {
            "name" => vec![("name".into(), self.name.as_str().into())],
            "position" => super::vec2_columns("position", self.position).into(),
            _ => Vec::new(),
        }
    }

    fn wrap(handle: Shared<Self>) -> EntityRef {
        EntityRef::Item(handle)
    }
}
