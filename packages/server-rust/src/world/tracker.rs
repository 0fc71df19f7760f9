//! Change tracking.
//!
//! Typed entity setters call [`ChangeTracker::update`] for every real
//! mutation. The tracker keeps two independent layers of the same shape:
//! a *sync* layer drained by the synchronizer each sync tick, and a *flush*
//! layer drained by the DB flush task. Each layer records creates, deletes,
//! and per-entity ordered dirty-field sets; the sync layer additionally
//! captures the pre-change value of each field the first time it changes
//! after a drain, which is what lets the synchronizer recover the previous
//! zone of an entity that moved.

use std::collections::HashMap;

use parking_lot::Mutex;
use tilemud_core::{EntityId, EntityKind, FieldValue};

use super::entities::EntityRef;

/// Dirty-field record for one entity within one layer.
#[derive(Debug, Clone)]
pub struct UpdateRecord {
    pub kind: EntityKind,
    pub id: EntityId,
    /// Changed fields in first-change order, deduplicated.
    pub fields: Vec<&'static str>,
    /// Pre-change values, first change wins. Fields added via
    /// [`ChangeTracker::track`] have no original.
    pub original: HashMap<&'static str, FieldValue>,
}

impl UpdateRecord {
    fn new(kind: EntityKind, id: EntityId) -> Self {
        Self {
            kind,
            id,
            fields: Vec::new(),
            original: HashMap::new(),
        }
    }

    fn add(&mut self, field: &'static str, original: Option<FieldValue>) {
        if !self.fields.contains(&field) {
            self.fields.push(field);
        }
        if let Some(value) = original {
            self.original.entry(field).or_insert(value);
        }
    }
}

/// Everything recorded in one layer since its previous drain, in recorded
/// order. Creates and deletes carry the entity handle itself because an
/// unsaved create has no key yet.
#[derive(Debug, Default)]
pub struct ChangeBatch {
    pub creates: Vec<EntityRef>,
    pub updates: Vec<UpdateRecord>,
    pub deletes: Vec<EntityRef>,
}

impl ChangeBatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

#[derive(Default)]
struct Layer {
    creates: Vec<EntityRef>,
    deletes: Vec<EntityRef>,
    updates: Vec<UpdateRecord>,
    index: HashMap<(EntityKind, EntityId), usize>,
}

impl Layer {
    fn update(
        &mut self,
        kind: EntityKind,
        id: EntityId,
        field: &'static str,
        original: Option<FieldValue>,
    ) {
        let key = (kind, id);
        let slot = if let Some(&slot) = self.index.get(&key) {
            slot
        } else {
            self.updates.push(UpdateRecord::new(kind, id));
            let slot = self.updates.len() - 1;
            self.index.insert(key, slot);
            slot
        };
        self.updates[slot].add(field, original);
    }

    fn create(&mut self, entity: EntityRef) {
        if !self.creates.iter().any(|e| e.same_instance(&entity)) {
            self.creates.push(entity);
        }
    }

    fn delete(&mut self, entity: EntityRef) {
        // A create that never reached a drain cancels out entirely.
        if let Some(slot) = self.creates.iter().position(|e| e.same_instance(&entity)) {
            self.creates.remove(slot);
            return;
        }
        if let Some(slot) = self.index.remove(&(entity.kind(), entity.id())) {
            self.updates[slot].fields.clear();
        }
        if !self.deletes.iter().any(|e| e.same_instance(&entity)) {
            self.deletes.push(entity);
        }
    }

    fn take(&mut self) -> ChangeBatch {
        self.index.clear();
        ChangeBatch {
            creates: std::mem::take(&mut self.creates),
            updates: std::mem::take(&mut self.updates)
                .into_iter()
                .filter(|u| !u.fields.is_empty())
                .collect(),
            deletes: std::mem::take(&mut self.deletes),
        }
    }
}

/// Records entity changes for the synchronizer and the flush task.
#[derive(Default)]
pub struct ChangeTracker {
    inner: Mutex<Layers>,
}

#[derive(Default)]
struct Layers {
    sync: Layer,
    flush: Layer,
}

impl ChangeTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a field mutation. Called by entity setters after comparing
    /// for a real change; `original` is the value being overwritten.
    ///
    /// Unsaved entities (id 0) are not recorded: their pending create
    /// already captures full state.
    pub fn update(
        &self,
        kind: EntityKind,
        id: EntityId,
        field: &'static str,
        original: FieldValue,
    ) {
        if id == 0 {
            return;
        }
        let mut layers = self.inner.lock();
        layers.sync.update(kind, id, field, Some(original.clone()));
        layers.flush.update(kind, id, field, Some(original));
    }

    /// Marks a field for sync emission without a storage write: derived
    /// quantities the synchronizer computes but no setter assigned.
    pub fn track(&self, kind: EntityKind, id: EntityId, field: &'static str) {
        if id == 0 {
            return;
        }
        self.inner.lock().sync.update(kind, id, field, None);
    }

    /// Records a newly created entity, pending insert and Create sync.
    pub fn record_create(&self, entity: &EntityRef) {
        let mut layers = self.inner.lock();
        layers.sync.create(entity.clone());
        layers.flush.create(entity.clone());
    }

    /// Records a removed entity, pending delete and Delete sync.
    pub fn record_delete(&self, entity: &EntityRef) {
        let mut layers = self.inner.lock();
        layers.sync.delete(entity.clone());
        layers.flush.delete(entity.clone());
    }

    /// Drains the sync layer: everything since the previous sync tick.
    #[must_use]
    pub fn take_sync(&self) -> ChangeBatch {
        self.inner.lock().sync.take()
    }

    /// Drains the flush layer: everything since the previous DB flush.
    #[must_use]
    pub fn take_flush(&self) -> ChangeBatch {
        self.inner.lock().flush.take()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::RwLock;
    use tilemud_core::Vec2;

    use super::*;
    use crate::world::entities::User;
    use crate::world::entity::Stored;

    fn user_ref(id: EntityId) -> EntityRef {
        let mut user = User::stub(id);
        user.meta_mut().initialized = true;
        User::wrap(Arc::new(RwLock::new(user)))
    }

    #[test]
    fn update_records_in_both_layers() {
        let tracker = ChangeTracker::new();
        tracker.update(EntityKind::User, 1, "position", FieldValue::Vec2(Vec2::new(5, 5)));

        let sync = tracker.take_sync();
        assert_eq!(sync.updates.len(), 1);
        assert_eq!(sync.updates[0].fields, vec!["position"]);
        assert_eq!(
            sync.updates[0].original["position"],
            FieldValue::Vec2(Vec2::new(5, 5))
        );

        let flush = tracker.take_flush();
        assert_eq!(flush.updates.len(), 1);
    }

    #[test]
    fn layers_drain_independently() {
        let tracker = ChangeTracker::new();
        tracker.update(EntityKind::User, 1, "position", FieldValue::Vec2(Vec2::ZERO));

        assert!(!tracker.take_sync().is_empty());
        // The flush layer still has the record.
        assert!(!tracker.take_flush().is_empty());
        // Both are now empty.
        assert!(tracker.take_sync().is_empty());
        assert!(tracker.take_flush().is_empty());
    }

    #[test]
    fn first_original_wins_within_a_drain() {
        let tracker = ChangeTracker::new();
        tracker.update(EntityKind::User, 1, "position", FieldValue::Vec2(Vec2::new(5, 5)));
        tracker.update(EntityKind::User, 1, "position", FieldValue::Vec2(Vec2::new(6, 5)));

        let sync = tracker.take_sync();
        assert_eq!(sync.updates[0].fields.len(), 1);
        assert_eq!(
            sync.updates[0].original["position"],
            FieldValue::Vec2(Vec2::new(5, 5))
        );
    }

    #[test]
    fn original_resets_after_drain() {
        let tracker = ChangeTracker::new();
        tracker.update(EntityKind::User, 1, "position", FieldValue::Vec2(Vec2::new(5, 5)));
        let _ = tracker.take_sync();

        tracker.update(EntityKind::User, 1, "position", FieldValue::Vec2(Vec2::new(6, 5)));
        let sync = tracker.take_sync();
        assert_eq!(
            sync.updates[0].original["position"],
            FieldValue::Vec2(Vec2::new(6, 5))
        );
    }

    #[test]
    fn unsaved_entities_are_not_recorded_as_updates() {
        let tracker = ChangeTracker::new();
        tracker.update(EntityKind::User, 0, "position", FieldValue::Vec2(Vec2::ZERO));
        assert!(tracker.take_sync().is_empty());
    }

    #[test]
    fn track_adds_field_without_original() {
        let tracker = ChangeTracker::new();
        tracker.track(EntityKind::User, 1, "online_count");

        let sync = tracker.take_sync();
        assert_eq!(sync.updates[0].fields, vec!["online_count"]);
        assert!(sync.updates[0].original.is_empty());
        // Explicit tracking never reaches the flush layer.
        assert!(tracker.take_flush().is_empty());
    }

    #[test]
    fn create_then_delete_cancels_out() {
        let tracker = ChangeTracker::new();
        let entity = user_ref(0);
        tracker.record_create(&entity);
        tracker.record_delete(&entity);

        let sync = tracker.take_sync();
        assert!(sync.creates.is_empty());
        assert!(sync.deletes.is_empty());
    }

    #[test]
    fn delete_clears_pending_updates_for_entity() {
        let tracker = ChangeTracker::new();
        let entity = user_ref(7);
        tracker.update(EntityKind::User, 7, "position", FieldValue::Vec2(Vec2::ZERO));
        tracker.record_delete(&entity);

        let sync = tracker.take_sync();
        assert!(sync.updates.is_empty());
        assert_eq!(sync.deletes.len(), 1);
    }

    #[test]
    fn recorded_order_is_preserved_across_entities() {
        let tracker = ChangeTracker::new();
        tracker.update(EntityKind::User, 2, "position", FieldValue::Vec2(Vec2::ZERO));
        tracker.update(EntityKind::User, 1, "position", FieldValue::Vec2(Vec2::ZERO));
        tracker.update(EntityKind::User, 2, "name", FieldValue::Str("a".into()));

        let sync = tracker.take_sync();
        let order: Vec<EntityId> = sync.updates.iter().map(|u| u.id).collect();
        assert_eq!(order, vec![2, 1]);
        assert_eq!(sync.updates[0].fields, vec!["position", "name"]);
    }
}
