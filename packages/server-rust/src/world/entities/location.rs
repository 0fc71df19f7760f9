//! Location: a named map. Subzones are keyed by location id.

use sqlx::postgres::PgRow;
use tilemud_core::EntityKind;

use crate::storage::{SqlParam, StorageError};
use crate::world::entities::{col, EntityRef};
use crate::world::entity::{EntityMeta, Shared, Stored};

#[derive(Debug, Default, Clone)]
pub struct Location {
    meta: EntityMeta,
    pub name: String,
}

impl Stored for Location {
    const KIND: EntityKind = EntityKind::Location;

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
        self.meta.initialized = true;
        Ok(())
    }

    fn insert_columns(&self) -> Vec<(String, SqlParam)> {
        vec![("name".into(), self.name.as_str().into())]
    }

    fn columns_for_field(&self, field: &str) -> Vec<(String, SqlParam)> {
        match field {
            "name" => vec![("name".into(), self.name.as_str().into())],
            _ => Vec::new(),
        }
    }

    fn wrap(handle: Shared<Self>) -> EntityRef {
        EntityRef::Location(handle)
    }
}
