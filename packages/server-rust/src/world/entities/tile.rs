//! Tile: one walkable cell of the map geometry. Loaded per subzone, never
//! synced.

use sqlx::postgres::PgRow;
use tilemud_core::{EntityKind, Vec2};

use crate::storage::{SqlParam, StorageError};
use crate::world::entities::{col, EntityRef, Location};
use crate::world::entity::{EntityMeta, Ref, Shared, Stored};

#[derive(Debug, Default)]
pub struct Tile {
    meta: EntityMeta,
    pub location: Ref<Location>,
    pub position: Vec2,
}

impl Stored for Tile {
    const KIND: EntityKind = EntityKind::Tile;

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
        self.location.adopt(col::<Option<i64>>(row, "location_id")?);
        self.position = Vec2::new(col(row, "x")?, col(row, "y")?);
        self.meta.initialized = true;
        Ok(())
    }

    fn insert_columns(&self) -> Vec<(String, SqlParam)> {
        let mut columns = vec![super::ref_column("location", self.location.key())];
        columns.extend(super::vec2_columns("position", self.position));
        columns
    }

    fn columns_for_field(&self, field: &str) -> Vec<(String, SqlParam)> {
        match field {
            "position" => super::vec2_columns("position", self.position).into(),
            _ => Vec::new(),
        }
    }

    fn wrap(handle: Shared<Self>) -> EntityRef {
        EntityRef::Tile(handle)
    }
}
