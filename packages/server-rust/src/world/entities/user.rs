//! User: a player avatar on the tile map.

use sqlx::postgres::PgRow;
use tilemud_core::{EntityKind, FieldValue, Vec2};

use crate::storage::{SqlParam, StorageError};
use crate::world::entities::{col, Account, EntityRef, Location};
use crate::world::entity::{EntityMeta, Ref, Shared, Stored};
use crate::world::tracker::ChangeTracker;

#[derive(Debug, Default)]
pub struct User {
    meta: EntityMeta,
    pub name: String,
    pub account: Ref<Account>,
    pub location: Ref<Location>,
    position: Vec2,
}

impl User {
    #[must_use]
    pub fn new(
        name: String,
        account: Shared<Account>,
        location: Shared<Location>,
        position: Vec2,
    ) -> Self {
        Self {
            meta: EntityMeta { id: 0, initialized: true },
            name,
            account: Ref::resolved(account),
            location: Ref::resolved(location),
            position,
        }
    }

    #[must_use]
    pub fn position(&self) -> Vec2 {
        self.position
    }

    /// Moves the user, recording the previous position for zone recovery.
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

    /// Position assignment without change tracking: hydration and tests.
    pub fn set_position_untracked(&mut self, position: Vec2) {
        self.position = position;
    }

    /// Moves the user to another location.
    pub fn set_location(&mut self, tracker: &ChangeTracker, location: Shared<Location>) {
        let new_key = location.read().id();
        if self.location.key() == Some(new_key) {
            return;
        }
        let original = self.location.key().map_or(FieldValue::Null, FieldValue::Int);
        tracker.update(Self::KIND, self.meta.id, "location", original);
        self.location = Ref::resolved(location);
    }

    #[must_use]
    pub fn sync_field(&self, field: &str) -> Option<serde_json::Value> {
        match field {
            "id" => Some(serde_json::json!(self.meta.id)),
            "name" => Some(serde_json::json!(self.name)),
            "position" => Some(serde_json::json!({"x": self.position.x, "y": self.position.y})),
            "location" => self.location.key().map(|id| serde_json::json!(id)),
            _ => None,
        }
    }
}

impl Stored for User {
    const KIND: EntityKind = EntityKind::User;

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
        self.account.adopt(col::<Option<i64>>(row, "account_id")?);
        self.location.adopt(col::<Option<i64>>(row, "location_id")?);
        self.position = Vec2::new(col(row, "x")?, col(row, "y")?);
        self.meta.initialized = true;
        Ok(())
    }

    fn insert_columns(&self) -> Vec<(String, SqlParam)> {
        let mut columns = vec![
            ("name".into(), self.name.as_str().into()),
            super::ref_column("account", self.account.key()),
            super::ref_column("location", self.location.key()),
        ];
        columns.extend(super::vec2_columns("position", self.position));
        columns
    }

    fn columns_for_field(&self, field: &str) -> Vec<(String, SqlParam)> {
        match field {
            "name" => vec![("name".into(), self.name.as_str().into())],
            "location" => vec![super::ref_column("location", self.location.key())],
            "position" => super::vec2_columns("position", self.position).into(),
            _ => Vec::new(),
        }
    }

    fn wrap(handle: Shared<Self>) -> EntityRef {
        EntityRef::User(handle)
    }
}
