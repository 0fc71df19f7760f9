//! The persistent entity classes and the tagged handle over them.
//!
//! Each class is a plain struct behind `Arc<RwLock<_>>`. Dynamic call
//! sites (the tracker, the synchronizer, the flush task) work through
//! [`EntityRef`], a tagged variant per class, instead of trait objects;
//! every operation the sync pipeline needs is a `match` here.

mod account;
mod item;
mod location;
mod message;
mod tile;
mod user;

use std::sync::Arc;

use sqlx::postgres::PgRow;
use sqlx::Row;
use tilemud_core::{EntityId, EntityKind, Vec2};

pub use account::Account;
pub use item::Item;
pub use location::Location;
pub use message::Message;
pub use tile::Tile;
pub use user::User;

use crate::storage::{SqlParam, StorageError};

use super::entity::{AreaParams, Shared, Stored};

/// Decodes one column, naming it in the error.
pub(crate) fn col<'r, T>(row: &'r PgRow, name: &'static str) -> Result<T, StorageError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get::<T, _>(name)
        .map_err(|source| StorageError::Decode { column: name, source })
}

/// Column pair of a `Vec2` property with its current value, following the
/// schema mapping (`position` flattens to `x, y`).
pub(crate) fn vec2_columns(property: &str, value: Vec2) -> [(String, SqlParam); 2] {
    let (x, y) = crate::storage::columns_for_vec2(property);
    [(x, SqlParam::I32(value.x)), (y, SqlParam::I32(value.y))]
}

/// Foreign-key column of a reference property with its current key.
pub(crate) fn ref_column(property: &str, key: Option<EntityId>) -> (String, SqlParam) {
    (
        crate::storage::column_for_ref(property),
        key.map_or(SqlParam::Null, SqlParam::I64),
    )
}

/// Shared handle to an entity of any class.
///
/// Cheap to clone; two refs to the same instance compare equal under
/// [`EntityRef::same_instance`].
#[derive(Debug, Clone)]
pub enum EntityRef {
    Account(Shared<Account>),
    User(Shared<User>),
    Location(Shared<Location>),
    Tile(Shared<Tile>),
    Item(Shared<Item>),
    Message(Shared<Message>),
}

impl EntityRef {
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Account(_) => EntityKind::Account,
            Self::User(_) => EntityKind::User,
            Self::Location(_) => EntityKind::Location,
            Self::Tile(_) => EntityKind::Tile,
            Self::Item(_) => EntityKind::Item,
            Self::Message(_) => EntityKind::Message,
        }
    }

    #[must_use]
    pub fn id(&self) -> EntityId {
        match self {
            Self::Account(e) => e.read().id(),
            Self::User(e) => e.read().id(),
            Self::Location(e) => e.read().id(),
            Self::Tile(e) => e.read().id(),
            Self::Item(e) => e.read().id(),
            Self::Message(e) => e.read().id(),
        }
    }

    /// Pointer identity: whether both refs are the same live instance.
    #[must_use]
    pub fn same_instance(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Account(a), Self::Account(b)) => Arc::ptr_eq(a, b),
            (Self::User(a), Self::User(b)) => Arc::ptr_eq(a, b),
            (Self::Location(a), Self::Location(b)) => Arc::ptr_eq(a, b),
            (Self::Tile(a), Self::Tile(b)) => Arc::ptr_eq(a, b),
            (Self::Item(a), Self::Item(b)) => Arc::ptr_eq(a, b),
            (Self::Message(a), Self::Message(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Current value of a sync-declared property, as JSON.
    #[must_use]
    pub fn sync_field(&self, field: &str) -> Option<serde_json::Value> {
        match self {
            Self::User(e) => e.read().sync_field(field),
            Self::Item(e) => e.read().sync_field(field),
            Self::Message(e) => e.read().sync_field(field),
            Self::Account(_) | Self::Location(_) | Self::Tile(_) => None,
        }
    }

    /// Location key plus footprint cells, for classes that occupy tiles.
    #[must_use]
    pub fn spatial(&self) -> Option<(EntityId, Vec<Vec2>)> {
        match self {
            Self::User(e) => {
                let user = e.read();
                Some((user.location.key()?, vec![user.position()]))
            }
            Self::Tile(e) => {
                let tile = e.read();
                Some((tile.location.key()?, vec![tile.position]))
            }
            Self::Item(e) => {
                let item = e.read();
                Some((item.location.key()?, item.positions()))
            }
            Self::Message(e) => {
                let message = e.read();
                Some((message.location.key()?, vec![message.position]))
            }
            Self::Account(_) | Self::Location(_) => None,
        }
    }

    /// Key held by a named reference field, for `UserByField`-style
    /// receivers and spatial field lookups.
    #[must_use]
    pub fn ref_key(&self, field: &str) -> Option<EntityId> {
        match (self, field) {
            (Self::User(e), "account") => e.read().account.key(),
            (Self::User(e), "location") => e.read().location.key(),
            (Self::Tile(e), "location") => e.read().location.key(),
            (Self::Item(e), "location") => e.read().location.key(),
            (Self::Message(e), "user") => e.read().user.key(),
            (Self::Message(e), "location") => e.read().location.key(),
            _ => None,
        }
    }

    /// Value of a named `Vec2` field, for explicit spatial receivers.
    #[must_use]
    pub fn vec2_field(&self, field: &str) -> Option<Vec2> {
        match (self, field) {
            (Self::User(e), "position") => Some(e.read().position()),
            (Self::Tile(e), "position") => Some(e.read().position),
            (Self::Item(e), "position") => Some(e.read().position()),
            (Self::Message(e), "position") => Some(e.read().position),
            _ => None,
        }
    }

    /// The entity's id when it is a user (the `Self` receiver target).
    #[must_use]
    pub fn as_user_id(&self) -> Option<EntityId> {
        match self {
            Self::User(e) => Some(e.read().id()),
            _ => None,
        }
    }

    /// Whether this class occupies tiles for movement blocking.
    #[must_use]
    pub fn blocks_tiles(&self) -> bool {
        matches!(self, Self::User(_) | Self::Item(_))
    }

    /// Area-constructor parameters, for classes declaring an Area receiver.
    #[must_use]
    pub fn area_params(&self) -> Option<AreaParams> {
        match self {
            Self::Message(e) => e.read().area_params(),
            _ => None,
        }
    }

    /// All persistent columns for insert.
    #[must_use]
    pub fn insert_columns(&self) -> Vec<(String, SqlParam)> {
        match self {
            Self::Account(e) => e.read().insert_columns(),
            Self::User(e) => e.read().insert_columns(),
            Self::Location(e) => e.read().insert_columns(),
            Self::Tile(e) => e.read().insert_columns(),
            Self::Item(e) => e.read().insert_columns(),
            Self::Message(e) => e.read().insert_columns(),
        }
    }

    /// Columns for the given dirty fields, deduplicated, in field order.
    #[must_use]
    pub fn columns_for_fields(&self, fields: &[&'static str]) -> Vec<(String, SqlParam)> {
        let mut columns: Vec<(String, SqlParam)> = Vec::new();
        for field in fields {
            let mapped = match self {
                Self::Account(e) => e.read().columns_for_field(field),
                Self::User(e) => e.read().columns_for_field(field),
                Self::Location(e) => e.read().columns_for_field(field),
                Self::Tile(e) => e.read().columns_for_field(field),
                Self::Item(e) => e.read().columns_for_field(field),
                Self::Message(e) => e.read().columns_for_field(field),
            };
            for (name, param) in mapped {
                if !columns.iter().any(|(existing, _)| *existing == name) {
                    columns.push((name, param));
                }
            }
        }
        columns
    }

    /// The inner handle as a type-erased cache value.
    #[must_use]
    pub fn cache_value(&self) -> crate::cache::CacheValue {
        match self {
            Self::Account(e) => Arc::clone(e) as crate::cache::CacheValue,
            Self::User(e) => Arc::clone(e) as crate::cache::CacheValue,
            Self::Location(e) => Arc::clone(e) as crate::cache::CacheValue,
            Self::Tile(e) => Arc::clone(e) as crate::cache::CacheValue,
            Self::Item(e) => Arc::clone(e) as crate::cache::CacheValue,
            Self::Message(e) => Arc::clone(e) as crate::cache::CacheValue,
        }
    }

    /// Adopts the key returned by `INSERT … RETURNING id`.
    pub fn adopt_id(&self, id: EntityId) {
        match self {
            Self::Account(e) => e.write().meta_mut().id = id,
            Self::User(e) => e.write().meta_mut().id = id,
            Self::Location(e) => e.write().meta_mut().id = id,
            Self::Tile(e) => e.write().meta_mut().id = id,
            Self::Item(e) => e.write().meta_mut().id = id,
            Self::Message(e) => e.write().meta_mut().id = id,
        }
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::RwLock;
    use tilemud_core::FieldValue;

    use super::*;
    use crate::world::entity::Ref;
    use crate::world::tracker::ChangeTracker;

    fn location_handle(id: EntityId) -> Shared<Location> {
        let mut location = Location::stub(id);
        location.meta_mut().initialized = true;
        location.name = "forest".into();
        Arc::new(RwLock::new(location))
    }

    fn user_at(id: EntityId, location: EntityId, position: Vec2) -> Shared<User> {
        let mut user = User::stub(id);
        user.meta_mut().initialized = true;
        user.name = "Luka".into();
        user.location = Ref::resolved(location_handle(location));
        user.set_position_untracked(position);
        Arc::new(RwLock::new(user))
    }

    #[test]
    fn same_instance_is_pointer_identity() {
        let a = user_at(1, 1, Vec2::ZERO);
        let r1 = User::wrap(Arc::clone(&a));
        let r2 = User::wrap(Arc::clone(&a));
        let r3 = User::wrap(user_at(1, 1, Vec2::ZERO));

        assert!(r1.same_instance(&r2));
        assert!(!r1.same_instance(&r3));
    }

    #[test]
    fn spatial_exposes_location_and_footprint() {
        let user = User::wrap(user_at(1, 7, Vec2::new(5, 5)));
        assert_eq!(user.spatial(), Some((7, vec![Vec2::new(5, 5)])));
    }

    #[test]
    fn sync_field_reads_current_state() {
        let user = User::wrap(user_at(1, 7, Vec2::new(5, 5)));
        assert_eq!(user.sync_field("id"), Some(serde_json::json!(1)));
        assert_eq!(
            user.sync_field("position"),
            Some(serde_json::json!({"x": 5, "y": 5}))
        );
        assert_eq!(user.sync_field("unknown"), None);
    }

    #[test]
    fn tracked_setter_records_original() {
        let tracker = ChangeTracker::new();
        let handle = user_at(1, 7, Vec2::new(5, 5));
        handle.write().set_position(&tracker, Vec2::new(6, 7));

        let batch = tracker.take_sync();
        assert_eq!(
            batch.updates[0].original["position"],
            FieldValue::Vec2(Vec2::new(5, 5))
        );
        assert_eq!(handle.read().position(), Vec2::new(6, 7));
    }

    #[test]
    fn setter_ignores_no_op_assignment() {
        let tracker = ChangeTracker::new();
        let handle = user_at(1, 7, Vec2::new(5, 5));
        handle.write().set_position(&tracker, Vec2::new(5, 5));
        assert!(tracker.take_sync().is_empty());
    }

    #[test]
    fn columns_for_fields_deduplicates() {
        let user = User::wrap(user_at(1, 7, Vec2::new(5, 5)));
        let columns = user.columns_for_fields(&["position", "position"]);
        let names: Vec<&str> = columns.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["x", "y"]);
    }
}
