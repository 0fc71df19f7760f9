//! Zone: the transient 3×3 subzone window, the unit of visibility.

use std::collections::HashSet;
use std::sync::Arc;

use tilemud_core::{EntityId, EntityKind, Vec2};

use super::subzone::Subzone;

/// Nine subzones centered on a zone position. Never cached; rebuilt on
/// demand as a view over the (cached) subzones.
#[derive(Debug, Clone)]
pub struct Zone {
    location: EntityId,
    center: Vec2,
    subzones: Vec<Arc<Subzone>>,
}

impl Zone {
    /// Assembled by [`Atlas::zone`](super::atlas::Atlas::zone); the nine
    /// subzones arrive loaded.
    #[must_use]
    pub(crate) fn new(location: EntityId, center: Vec2, subzones: Vec<Arc<Subzone>>) -> Self {
        debug_assert_eq!(subzones.len(), 9);
        Self { location, center, subzones }
    }

    /// The nine zone positions covered by a window centered on `center`.
    pub fn window(center: Vec2) -> impl Iterator<Item = Vec2> {
        (-1..=1).flat_map(move |dy| (-1..=1).map(move |dx| center + Vec2::new(dx, dy)))
    }

    #[must_use]
    pub fn location(&self) -> EntityId {
        self.location
    }

    #[must_use]
    pub fn center(&self) -> Vec2 {
        self.center
    }

    #[must_use]
    pub fn subzones(&self) -> &[Arc<Subzone>] {
        &self.subzones
    }

    /// Union of all entities over the nine subzones, preserving per-class
    /// sets. Deduplicated: a shaped entity spanning two member subzones
    /// appears once.
    #[must_use]
    pub fn entities(&self) -> Vec<(EntityKind, EntityId)> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for subzone in &self.subzones {
            for (kind, ids) in subzone.all_entities() {
                for id in ids {
                    if seen.insert((kind, id)) {
                        out.push((kind, id));
                    }
                }
            }
        }
        out
    }

    /// Ids of users anywhere in the window.
    #[must_use]
    pub fn user_ids(&self) -> Vec<EntityId> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for subzone in &self.subzones {
            for id in subzone.entities_of(EntityKind::User) {
                if seen.insert(id) {
                    out.push(id);
                }
            }
        }
        out
    }

    /// Whether the given subzone key is part of this window.
    #[must_use]
    pub fn covers(&self, key: (EntityId, Vec2)) -> bool {
        self.subzones.iter().any(|s| s.key() == key)
    }

    /// Partitions the union of both windows into (newly visible, no longer
    /// visible, remaining) subzones, comparing by subzone key.
    #[must_use]
    pub fn difference_of(
        new: &Zone,
        old: &Zone,
    ) -> (Vec<Arc<Subzone>>, Vec<Arc<Subzone>>, Vec<Arc<Subzone>>) {
        let old_keys: HashSet<_> = old.subzones.iter().map(|s| s.key()).collect();
        let new_keys: HashSet<_> = new.subzones.iter().map(|s| s.key()).collect();

        let entered = new
            .subzones
            .iter()
            .filter(|s| !old_keys.contains(&s.key()))
            .cloned()
            .collect();
        let left = old
            .subzones
            .iter()
            .filter(|s| !new_keys.contains(&s.key()))
            .cloned()
            .collect();
        let remaining = new
            .subzones
            .iter()
            .filter(|s| old_keys.contains(&s.key()))
            .cloned()
            .collect();
        (entered, left, remaining)
    }

    /// Adds an entity to every member subzone its footprint intersects.
    pub fn enter(&self, kind: EntityKind, id: EntityId, cells: &[Vec2], blocks: bool) {
        for subzone in &self.subzones {
            let touching: Vec<Vec2> = cells
                .iter()
                .copied()
                .filter(|cell| subzone.is_inside(*cell))
                .collect();
            if !touching.is_empty() {
                subzone.enter(kind, id, &touching, blocks);
            }
        }
    }

    /// Removes an entity from every member subzone its footprint
    /// intersects.
    pub fn leave(&self, kind: EntityKind, id: EntityId, cells: &[Vec2], blocks: bool) {
        for subzone in &self.subzones {
            let touching: Vec<Vec2> = cells
                .iter()
                .copied()
                .filter(|cell| subzone.is_inside(*cell))
                .collect();
            if !touching.is_empty() {
                subzone.leave(kind, id, &touching, blocks);
            }
        }
    }
}
