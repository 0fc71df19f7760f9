//! Persistent-entity plumbing: the [`Stored`] contract, shared handles,
//! and lazy [`Ref`] pointers.

use std::sync::Arc;

use parking_lot::RwLock;
use sqlx::postgres::PgRow;
use tilemud_core::{EntityId, EntityKind, Vec2};

use crate::storage::{SqlParam, StorageError};

use super::entities::EntityRef;

/// The canonical shared handle to an entity instance.
pub type Shared<T> = Arc<RwLock<T>>;

/// Identity and lifecycle state carried by every entity.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntityMeta {
    /// Primary key; zero until the first flush adopts the inserted id.
    pub id: EntityId,
    /// False for bare-key stubs created by lazy references; the registry
    /// hydrates such instances in place on the next lookup.
    pub initialized: bool,
}

impl EntityMeta {
    #[must_use]
    pub fn stub(id: EntityId) -> Self {
        Self { id, initialized: false }
    }

    /// A saved entity has a non-zero key.
    #[must_use]
    pub fn is_saved(&self) -> bool {
        self.id != 0
    }
}

/// Contract between an entity class and the registry/gateway.
///
/// `hydrate` must be in-place and reference-preserving: applying a freshly
/// loaded row to an instance other code already holds may never swap the
/// instance, and may never replace a resolved [`Ref`] with an unresolved
/// one carrying the same key (the row only has the foreign key).
pub trait Stored: Sized + Send + Sync + 'static {
    const KIND: EntityKind;

    fn meta(&self) -> &EntityMeta;
    fn meta_mut(&mut self) -> &mut EntityMeta;

    /// A bare instance carrying only the key.
    fn stub(id: EntityId) -> Self;

    /// Applies a database row in place and marks the instance initialized.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Decode`] when a column is missing or has the
    /// wrong type.
    fn hydrate(&mut self, row: &PgRow) -> Result<(), StorageError>;

    /// All persistent columns for `INSERT`, excluding `id`.
    fn insert_columns(&self) -> Vec<(String, SqlParam)>;

    /// Columns for one dirty field on `UPDATE`. Empty when the field is not
    /// persisted (derived quantities that only sync).
    fn columns_for_field(&self, field: &str) -> Vec<(String, SqlParam)>;

    /// Wraps a shared handle into the tagged [`EntityRef`].
    fn wrap(handle: Shared<Self>) -> EntityRef;

    fn id(&self) -> EntityId {
        self.meta().id
    }
}

/// Lazy pointer to another entity by key.
///
/// Starts unresolved (key only); the registry resolves it to the canonical
/// instance on demand. Equality of keys is what hydration preserves.
#[derive(Debug, Clone, Default)]
pub enum Ref<T> {
    #[default]
    None,
    Unresolved(EntityId),
    Resolved(Shared<T>),
}

impl<T: Stored> Ref<T> {
    #[must_use]
    pub fn unresolved(id: EntityId) -> Self {
        if id == 0 { Self::None } else { Self::Unresolved(id) }
    }

    #[must_use]
    pub fn resolved(handle: Shared<T>) -> Self {
        Self::Resolved(handle)
    }

    /// The referenced key, if any.
    #[must_use]
    pub fn key(&self) -> Option<EntityId> {
        match self {
            Self::None => None,
            Self::Unresolved(id) => Some(*id),
            Self::Resolved(handle) => Some(handle.read().id()),
        }
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    /// The resolved handle, if resolution already happened.
    #[must_use]
    pub fn get(&self) -> Option<Shared<T>> {
        match self {
            Self::Resolved(handle) => Some(Arc::clone(handle)),
            _ => None,
        }
    }

    /// Adopts a key from a freshly loaded row.
    ///
    /// When the incoming key matches the current one, an existing
    /// resolution is kept; a reload must not downgrade a resolved
    /// reference to a bare key.
    pub fn adopt(&mut self, key: Option<EntityId>) {
        match key {
            None | Some(0) => *self = Self::None,
            Some(id) => {
                if self.key() != Some(id) {
                    *self = Self::Unresolved(id);
                }
            }
        }
    }
}

/// Parameters an entity supplies to an area constructor: the spatial
/// anchor plus shape-specific scalars (a disk's radius, say).
#[derive(Debug, Clone, PartialEq)]
pub struct AreaParams {
    pub location: EntityId,
    pub center: Vec2,
    pub extra: Vec<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::entities::User;

    #[test]
    fn meta_saved_iff_nonzero_id() {
        assert!(!EntityMeta::stub(0).is_saved());
        assert!(EntityMeta::stub(3).is_saved());
    }

    #[test]
    fn unresolved_zero_key_is_none() {
        assert!(matches!(Ref::<User>::unresolved(0), Ref::None));
        assert_eq!(Ref::<User>::unresolved(5).key(), Some(5));
    }

    #[test]
    fn adopt_keeps_resolution_for_same_key() {
        let user = User::stub(5);
        let handle: Shared<User> = Arc::new(RwLock::new(user));
        let mut r = Ref::resolved(Arc::clone(&handle));

        r.adopt(Some(5));
        assert!(r.is_resolved());

        r.adopt(Some(6));
        assert!(!r.is_resolved());
        assert_eq!(r.key(), Some(6));

        r.adopt(None);
        assert!(r.key().is_none());
    }

    #[test]
    fn adopt_zero_clears() {
        let mut r = Ref::<User>::unresolved(5);
        r.adopt(Some(0));
        assert!(matches!(r, Ref::None));
    }
}
