//! Subzone: a fixed-size tile rectangle, the unit of loading.
//!
//! A subzone owns every entity whose footprint intersects its rectangle,
//! one id set per entity class, plus the tile and occupancy sets that back
//! movement checks. Loading is single-flight: the first caller issues the
//! SQL, concurrent callers queue as waiters and are released in FIFO order
//! when the load completes.

use std::collections::{BTreeSet, HashMap, HashSet};

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tilemud_core::{EntityId, EntityKind, Vec2};
use tokio::sync::oneshot;

use crate::storage::Query;
use crate::world::{Item, Message, Tile, User, World};
use crate::world::registry::RegistryError;
use crate::world::entity::Stored;

enum LoadState {
    Unloaded,
    /// Load in flight; senders are released FIFO on completion.
    Loading(Vec<oneshot::Sender<()>>),
    Loaded,
}

/// One rectangle of one location's map.
pub struct Subzone {
    location: EntityId,
    zone_position: Vec2,
    size: Vec2,
    state: Mutex<LoadState>,
    entities: RwLock<HashMap<EntityKind, BTreeSet<EntityId>>>,
    tiles: RwLock<HashSet<Vec2>>,
    /// Blocking-occupant count per cell (users and item footprints).
    occupied: RwLock<HashMap<Vec2, u32>>,
}

impl Subzone {
    #[must_use]
    pub fn new(location: EntityId, zone_position: Vec2, size: Vec2) -> Self {
        Self {
            location,
            zone_position,
            size,
            state: Mutex::new(LoadState::Unloaded),
            entities: RwLock::new(HashMap::new()),
            tiles: RwLock::new(HashSet::new()),
            occupied: RwLock::new(HashMap::new()),
        }
    }

    /// Cache path for a subzone, e.g. `"subzone/1/2x3"`.
    #[must_use]
    pub fn cache_path(location: EntityId, zone_position: Vec2) -> String {
        format!("subzone/{location}/{zone_position}")
    }

    #[must_use]
    pub fn location(&self) -> EntityId {
        self.location
    }

    #[must_use]
    pub fn zone_position(&self) -> Vec2 {
        self.zone_position
    }

    /// Identity of this subzone among all subzones.
    #[must_use]
    pub fn key(&self) -> (EntityId, Vec2) {
        (self.location, self.zone_position)
    }

    /// First tile of the rectangle (inclusive).
    #[must_use]
    pub fn start(&self) -> Vec2 {
        self.zone_position.mul_vec(self.size)
    }

    /// One past the last tile of the rectangle (exclusive).
    #[must_use]
    pub fn end(&self) -> Vec2 {
        self.start() + self.size
    }

    /// Half-open rectangle membership.
    #[must_use]
    pub fn is_inside(&self, position: Vec2) -> bool {
        position.is_inside(self.start(), self.end())
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        matches!(*self.state.lock(), LoadState::Loaded)
    }

    /// Loads the subzone's entities from storage. Idempotent and
    /// serialized: concurrent callers of the same subzone trigger exactly
    /// one set of queries; the rest wait for the loader.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Storage`] when a load query fails; the
    /// subzone reverts to unloaded so a later caller retries.
    pub async fn load(&self, world: &World) -> Result<(), RegistryError> {
        loop {
            let waiter = {
                let mut state = self.state.lock();
                match &mut *state {
                    LoadState::Loaded => return Ok(()),
                    LoadState::Unloaded => {
                        *state = LoadState::Loading(Vec::new());
                        None
                    }
                    LoadState::Loading(waiters) => {
                        let (tx, rx) = oneshot::channel();
                        waiters.push(tx);
                        Some(rx)
                    }
                }
            };
            match waiter {
                None => break,
                Some(rx) => {
                    // A dropped sender means the loader died; loop retries.
                    let _ = rx.await;
                    if self.is_loaded() {
                        return Ok(());
                    }
                }
            }
        }

        let result = self.perform_load(world).await;
        let waiters = {
            let mut state = self.state.lock();
            let waiters = match std::mem::replace(&mut *state, LoadState::Unloaded) {
                LoadState::Loading(waiters) => waiters,
                LoadState::Unloaded | LoadState::Loaded => Vec::new(),
            };
            if result.is_ok() {
                *state = LoadState::Loaded;
            }
            waiters
        };
        for tx in waiters {
            let _ = tx.send(());
        }
        result
    }

    async fn perform_load(&self, world: &World) -> Result<(), RegistryError> {
        let (start, end) = (self.start(), self.end());

        let rows = world
            .gateway()
            .fetch_all(&Query::select_in_rect(EntityKind::Tile.table(), self.location, start, end))
            .await?;
        for row in &rows {
            let tile = world.adopt_row::<Tile>(row)?;
            let position = tile.read().position;
            self.tiles.write().insert(position);
            self.add_entity(EntityKind::Tile, tile.read().id());
        }

        let rows = world
            .gateway()
            .fetch_all(&Query::select_in_rect(EntityKind::User.table(), self.location, start, end))
            .await?;
        for row in &rows {
            let user = world.adopt_row::<User>(row)?;
            let (id, position) = {
                let user = user.read();
                (user.id(), user.position())
            };
            self.add_entity(EntityKind::User, id);
            self.occupy(&[position]);
        }

        let rows = world
            .gateway()
            .fetch_all(&Query::select_in_rect(EntityKind::Message.table(), self.location, start, end))
            .await?;
        for row in &rows {
            let message = world.adopt_row::<Message>(row)?;
            self.add_entity(EntityKind::Message, message.read().id());
        }

        // Shaped entities: one precomputed join; any footprint cell in the
        // rectangle fetches the whole entity.
        let rows = world
            .gateway()
            .fetch_all(&Query::select_shaped_in_rect(
                EntityKind::Item.table(),
                "item_shapes",
                "item_id",
                self.location,
                start,
                end,
            ))
            .await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            items.push(world.adopt_row::<Item>(row)?);
        }
        world.load_item_shapes(&items).await?;
        for item in &items {
            let (id, cells) = {
                let item = item.read();
                (item.id(), item.positions())
            };
            self.add_entity(EntityKind::Item, id);
            self.occupy(&cells);
        }

        Ok(())
    }

    /// Whether a tile exists at `position` (only meaningful inside the
    /// rectangle of a loaded subzone).
    #[must_use]
    pub fn has_tile(&self, position: Vec2) -> bool {
        self.tiles.read().contains(&position)
    }

    /// Whether `position` has a tile and no blocking occupant.
    #[must_use]
    pub fn is_tile_free(&self, position: Vec2) -> bool {
        self.has_tile(position) && !self.occupied.read().contains_key(&position)
    }

    /// Adds an entity to the subzone's sets. Must only be called once the
    /// subzone is loaded.
    pub fn enter(&self, kind: EntityKind, id: EntityId, cells: &[Vec2], blocks: bool) {
        debug_assert!(self.is_loaded(), "enter before load");
        self.add_entity(kind, id);
        if blocks {
            self.occupy(cells);
        }
    }

    /// Removes an entity from the subzone's sets.
    pub fn leave(&self, kind: EntityKind, id: EntityId, cells: &[Vec2], blocks: bool) {
        debug_assert!(self.is_loaded(), "leave before load");
        self.entities.write().entry(kind).or_default().remove(&id);
        if blocks {
            let mut occupied = self.occupied.write();
            for cell in cells {
                if !self.is_inside(*cell) {
                    continue;
                }
                if let Some(count) = occupied.get_mut(cell) {
                    *count -= 1;
                    if *count == 0 {
                        occupied.remove(cell);
                    }
                }
            }
        }
    }

    /// Ids of one entity class, in key order.
    #[must_use]
    pub fn entities_of(&self, kind: EntityKind) -> Vec<EntityId> {
        self.entities
            .read()
            .get(&kind)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// All per-class id sets.
    #[must_use]
    pub fn all_entities(&self) -> Vec<(EntityKind, Vec<EntityId>)> {
        self.entities
            .read()
            .iter()
            .map(|(kind, set)| (*kind, set.iter().copied().collect()))
            .collect()
    }

    /// Whether the id is in this subzone's set for its class.
    #[must_use]
    pub fn contains_entity(&self, kind: EntityKind, id: EntityId) -> bool {
        self.entities
            .read()
            .get(&kind)
            .is_some_and(|set| set.contains(&id))
    }

    /// A uniformly random position inside the rectangle. With `staggered`,
    /// odd-Y positions snap to the nearest even row, since odd rows are
    /// half tiles on a staggered map.
    #[must_use]
    pub fn random_position_inside(&self, staggered: bool) -> Vec2 {
        let (start, end) = (self.start(), self.end());
        let mut rng = rand::rng();
        let position = Vec2::new(
            rng.random_range(start.x..end.x),
            rng.random_range(start.y..end.y),
        );
        if staggered {
            let snapped = position.snap_to_even_y();
            if snapped.y < start.y {
                snapped + Vec2::new(0, 2)
            } else {
                snapped
            }
        } else {
            position
        }
    }

    fn add_entity(&self, kind: EntityKind, id: EntityId) {
        self.entities.write().entry(kind).or_default().insert(id);
    }

    fn occupy(&self, cells: &[Vec2]) {
        let mut occupied = self.occupied.write();
        for cell in cells {
            if self.is_inside(*cell) {
                *occupied.entry(*cell).or_insert(0) += 1;
            }
        }
    }

    /// Marks the subzone loaded without touching storage. Tests only.
    #[cfg(test)]
    pub(crate) fn mark_loaded(&self) {
        *self.state.lock() = LoadState::Loaded;
    }

    /// Inserts a tile position directly. Tests only.
    #[cfg(test)]
    pub(crate) fn insert_tile(&self, position: Vec2) {
        self.tiles.write().insert(position);
    }
}

impl std::fmt::Debug for Subzone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subzone")
            .field("location", &self.location)
            .field("zone_position", &self.zone_position)
            .field("loaded", &self.is_loaded())
            .finish_non_exhaustive()
    }
}
