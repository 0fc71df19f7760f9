//! The entity registry: canonical instances and the flush path.
//!
//! All reads and writes of persistent objects go through [`World`]. It
//! guarantees at most one live instance per `{kind, id}` by storing every
//! handle in the identity cache under `"<model>/<id>"`, hydrates
//! partially initialized instances in place (so references held by callers
//! keep pointing at the up-to-date instance), and translates the change
//! tracker's flush layer into insert/update/delete batches.

use std::sync::Arc;

use parking_lot::RwLock;
use sqlx::postgres::PgRow;
use tilemud_core::{EntityId, EntityKind, Vec2};
use tracing::warn;

use crate::cache::{Cache, CacheValue, SetOptions};
use crate::storage::{Gateway, Query, SelectOptions, StorageError, WhereClause};

use super::entities::{col, Account, EntityRef, Item, Location, Message, Tile, User};
use super::entity::{Shared, Stored};
use super::tracker::ChangeTracker;

/// Registry-level failures.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("{kind:?} {id} not found")]
    NotFound { kind: EntityKind, id: EntityId },
}

/// Cache path of an entity, e.g. `"user/42"`.
#[must_use]
pub fn cache_path(kind: EntityKind, id: EntityId) -> String {
    format!("{}/{id}", kind.model_name())
}

/// The entity registry.
pub struct World {
    cache: Arc<Cache>,
    gateway: Gateway,
    tracker: Arc<ChangeTracker>,
}

impl World {
    #[must_use]
    pub fn new(cache: Arc<Cache>, gateway: Gateway, tracker: Arc<ChangeTracker>) -> Self {
        Self { cache, gateway, tracker }
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    #[must_use]
    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    #[must_use]
    pub fn tracker(&self) -> &Arc<ChangeTracker> {
        &self.tracker
    }

    /// Returns the canonical instance, loading from storage when it is not
    /// cached or only cached as a bare-key stub.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Storage`] on query or decode failure.
    pub async fn get<T: Stored>(&self, id: EntityId) -> Result<Option<Shared<T>>, RegistryError> {
        if id == 0 {
            return Ok(None);
        }
        let path = cache_path(T::KIND, id);
        if let Some(handle) = self.cache.get_typed::<RwLock<T>>(&path) {
            if handle.read().meta().initialized {
                return Ok(Some(handle));
            }
            // A bare key from a prior lazy reference: hydrate the existing
            // instance in place, never substitute a new one.
            return match self.fetch_by_id(T::KIND, id).await? {
                Some(row) => {
                    handle.write().hydrate(&row)?;
                    Ok(Some(handle))
                }
                None => Ok(None),
            };
        }
        match self.fetch_by_id(T::KIND, id).await? {
            Some(row) => Ok(Some(self.adopt_row(&row)?)),
            None => Ok(None),
        }
    }

    /// [`World::get`], failing when the entity does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for a missing row, or the
    /// storage error.
    pub async fn get_or_fail<T: Stored>(&self, id: EntityId) -> Result<Shared<T>, RegistryError> {
        self.get(id)
            .await?
            .ok_or(RegistryError::NotFound { kind: T::KIND, id })
    }

    /// Cache-only lookup; returns initialized instances without touching
    /// storage.
    #[must_use]
    pub fn get_if_cached<T: Stored>(&self, id: EntityId) -> Option<Shared<T>> {
        let handle = self.cache.get_typed::<RwLock<T>>(&cache_path(T::KIND, id))?;
        let initialized = handle.read().meta().initialized;
        initialized.then_some(Arc::clone(&handle))
    }

    /// Returns the cached handle for `{kind, id}` or creates and caches a
    /// bare-key stub. The next [`World::get`] hydrates the stub in place.
    #[must_use]
    pub fn stub_handle<T: Stored>(&self, id: EntityId) -> Shared<T> {
        let path = cache_path(T::KIND, id);
        if let Some(handle) = self.cache.get_typed::<RwLock<T>>(&path) {
            return handle;
        }
        let handle = Arc::new(RwLock::new(T::stub(id)));
        self.cache
            .set(&path, Arc::clone(&handle) as CacheValue, SetOptions::default());
        handle
    }

    /// Registers a freshly constructed entity for insert at the next flush.
    /// The key stays zero until the insert's `RETURNING id` is adopted.
    pub fn create<T: Stored>(&self, entity: T) -> Shared<T> {
        let handle = Arc::new(RwLock::new(entity));
        self.tracker.record_create(&T::wrap(Arc::clone(&handle)));
        handle
    }

    /// Marks an entity for delete at the next flush and uncaches it now.
    pub fn remove(&self, entity: &EntityRef) {
        let id = entity.id();
        if id != 0 {
            self.cache.delete(&cache_path(entity.kind(), id));
        }
        self.tracker.record_delete(entity);
    }

    /// Every cached instance of one class, for periodic sweeps.
    #[must_use]
    pub fn cached<T: Stored>(&self) -> Vec<Shared<T>> {
        self.cache
            .values_under(T::KIND.model_name())
            .into_iter()
            .filter_map(|value| value.downcast::<RwLock<T>>().ok())
            .collect()
    }

    /// The cached handle for a dynamic `{kind, id}` pair.
    #[must_use]
    pub fn entity_ref(&self, kind: EntityKind, id: EntityId) -> Option<EntityRef> {
        match kind {
            EntityKind::Account => self.get_if_cached::<Account>(id).map(Account::wrap),
            EntityKind::User => self.get_if_cached::<User>(id).map(User::wrap),
            EntityKind::Location => self.get_if_cached::<Location>(id).map(Location::wrap),
            EntityKind::Tile => self.get_if_cached::<Tile>(id).map(Tile::wrap),
            EntityKind::Item => self.get_if_cached::<Item>(id).map(Item::wrap),
            EntityKind::Message => self.get_if_cached::<Message>(id).map(Message::wrap),
        }
    }

    /// Canonicalizes a fetched row: reuses the cached instance when there
    /// is one (hydrating stubs in place), caches a new instance otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Storage`] on decode failure.
    pub fn adopt_row<T: Stored>(&self, row: &PgRow) -> Result<Shared<T>, RegistryError> {
        let id: EntityId = col(row, "id")?;
        let path = cache_path(T::KIND, id);
        if let Some(handle) = self.cache.get_typed::<RwLock<T>>(&path) {
            if !handle.read().meta().initialized {
                handle.write().hydrate(row)?;
            }
            return Ok(handle);
        }
        let mut entity = T::stub(id);
        entity.hydrate(row)?;
        let handle = Arc::new(RwLock::new(entity));
        self.cache
            .set(&path, Arc::clone(&handle) as CacheValue, SetOptions::default());
        Ok(handle)
    }

    /// Loads all rows matching the filters, canonicalized.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Storage`] on query or decode failure.
    pub async fn load_where<T: Stored>(
        &self,
        filters: &[WhereClause],
        options: &SelectOptions,
    ) -> Result<Vec<Shared<T>>, RegistryError> {
        let query = Query::select(T::KIND.table(), filters, options);
        let rows = self.gateway.fetch_all(&query).await?;
        rows.iter().map(|row| self.adopt_row(row)).collect()
    }

    /// Loads the first row matching the filters, canonicalized.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Storage`] on query or decode failure.
    pub async fn find_one<T: Stored>(
        &self,
        filters: &[WhereClause],
    ) -> Result<Option<Shared<T>>, RegistryError> {
        let query = Query::select(
            T::KIND.table(),
            filters,
            &SelectOptions { order_by: None, limit: Some(1) },
        );
        match self.gateway.fetch_optional(&query).await? {
            Some(row) => Ok(Some(self.adopt_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Fills the footprint offsets of shaped items from the child table.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Storage`] on query or decode failure.
    pub async fn load_item_shapes(&self, items: &[Shared<Item>]) -> Result<(), RegistryError> {
        for handle in items {
            let (id, loaded) = {
                let item = handle.read();
                (item.id(), !item.shape.is_empty())
            };
            if loaded || id == 0 {
                continue;
            }
            let query = Query::select(
                "item_shapes",
                &[WhereClause::eq("item_id", id)],
                &SelectOptions { order_by: Some("id".into()), limit: None },
            );
            let rows = self.gateway.fetch_all(&query).await?;
            let mut shape = Vec::with_capacity(rows.len());
            for row in &rows {
                shape.push(Vec2::new(col(row, "x")?, col(row, "y")?));
            }
            handle.write().shape = shape;
        }
        Ok(())
    }

    async fn fetch_by_id(
        &self,
        kind: EntityKind,
        id: EntityId,
    ) -> Result<Option<PgRow>, StorageError> {
        let query = Query::select(
            kind.table(),
            &[WhereClause::eq("id", id)],
            &SelectOptions::default(),
        );
        self.gateway.fetch_optional(&query).await
    }

    /// Flushes the tracker's flush layer inside one transaction scope:
    /// inserts with key adoption, dirty-column updates, deletes. Inserts
    /// run in submission order because later statements may reference the
    /// returned keys; keys are adopted (and creates cached, deletes
    /// uncached) only after commit, so a rolled-back flush leaves the
    /// in-memory state untouched. A repeat flush with no intervening
    /// mutation is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Storage`] on the first failing statement;
    /// the transaction rolls back and the enclosing task logs and
    /// continues.
    pub async fn flush(&self) -> Result<(), RegistryError> {
        let batch = self.tracker.take_flush();
        if batch.is_empty() {
            return Ok(());
        }

        let mut tx = self.gateway.begin().await?;
        let mut adopted: Vec<(&EntityRef, EntityId)> = Vec::with_capacity(batch.creates.len());

        for entity in &batch.creates {
            let query = Query::insert(entity.kind().table(), entity.insert_columns());
            let id = Gateway::insert_returning_id_in(&mut tx, &query).await?;
            adopted.push((entity, id));
        }

        for update in &batch.updates {
            let Some(entity) = self.entity_ref(update.kind, update.id) else {
                warn!(kind = ?update.kind, id = update.id, "dirty entity no longer cached");
                continue;
            };
            let columns = entity.columns_for_fields(&update.fields);
            if columns.is_empty() {
                continue;
            }
            let query = Query::update_by_id(update.kind.table(), update.id, columns);
            Gateway::execute_in(&mut tx, &query).await?;
        }

        for entity in &batch.deletes {
            let id = entity.id();
            if id != 0 {
                let query = Query::delete_by_id(entity.kind().table(), id);
                Gateway::execute_in(&mut tx, &query).await?;
            }
        }

        tx.commit().await.map_err(StorageError::Connect)?;

        for (entity, id) in adopted {
            entity.adopt_id(id);
            self.cache.set(
                &cache_path(entity.kind(), id),
                entity.cache_value(),
                SetOptions::default(),
            );
        }
        for entity in &batch.deletes {
            self.cache.delete(&cache_path(entity.kind(), entity.id()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn world() -> World {
        // A lazily connecting pool never touches the network until used;
        // these tests stay on the cache-only paths.
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/tilemud_test")
            .expect("lazy pool");
        World::new(
            Arc::new(Cache::new(Duration::from_secs(60))),
            Gateway::from_pool(pool),
            Arc::new(ChangeTracker::new()),
        )
    }

    #[test]
    fn cache_path_uses_model_name() {
        assert_eq!(cache_path(EntityKind::User, 42), "user/42");
        assert_eq!(cache_path(EntityKind::Message, 7), "message/7");
    }

    #[tokio::test]
    async fn stub_handle_is_canonical() {
        let world = world();
        let a = world.stub_handle::<User>(5);
        let b = world.stub_handle::<User>(5);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn get_if_cached_hides_uninitialized_stubs() {
        let world = world();
        let stub = world.stub_handle::<User>(5);
        assert!(world.get_if_cached::<User>(5).is_none());

        stub.write().meta_mut().initialized = true;
        assert!(world.get_if_cached::<User>(5).is_some());
    }

    #[tokio::test]
    async fn entity_ref_dispatches_by_kind() {
        let world = world();
        let stub = world.stub_handle::<Message>(9);
        stub.write().meta_mut().initialized = true;

        let entity = world.entity_ref(EntityKind::Message, 9).expect("cached");
        assert_eq!(entity.kind(), EntityKind::Message);
        assert_eq!(entity.id(), 9);
        assert!(world.entity_ref(EntityKind::User, 9).is_none());
    }

    #[tokio::test]
    async fn create_records_pending_insert() {
        let world = world();
        let mut user = User::stub(0);
        user.meta_mut().initialized = true;
        user.name = "Luka".into();
        let _handle = world.create(user);

        let batch = world.tracker().take_flush();
        assert_eq!(batch.creates.len(), 1);
        assert_eq!(batch.creates[0].id(), 0);
    }

    #[tokio::test]
    async fn remove_uncaches_and_records_delete() {
        let world = world();
        let stub = world.stub_handle::<User>(5);
        stub.write().meta_mut().initialized = true;

        let entity = world.entity_ref(EntityKind::User, 5).expect("cached");
        world.remove(&entity);

        assert!(world.get_if_cached::<User>(5).is_none());
        let batch = world.tracker().take_flush();
        assert_eq!(batch.deletes.len(), 1);
    }
}
