//! Atlas: subzone lookup and zone assembly.
//!
//! Subzones are created on first access and held weakly in the identity
//! cache, so rectangles nobody looks at anymore are reclaimed by the cache
//! cleaner and recreated transparently on demand.

use std::sync::Arc;

use tilemud_core::{EntityId, Vec2};

use crate::cache::{CacheValue, SetOptions};
use crate::world::registry::RegistryError;
use crate::world::World;

use super::subzone::Subzone;
use super::zone::Zone;

/// Factory and cache facade for subzones and zones.
#[derive(Clone)]
pub struct Atlas {
    world: Arc<World>,
    subzone_size: Vec2,
}

impl Atlas {
    #[must_use]
    pub fn new(world: Arc<World>, subzone_size: Vec2) -> Self {
        Self { world, subzone_size }
    }

    #[must_use]
    pub fn world(&self) -> &Arc<World> {
        &self.world
    }

    #[must_use]
    pub fn subzone_size(&self) -> Vec2 {
        self.subzone_size
    }

    /// The zone position containing a tile position (floor division, so
    /// negative tiles land in the correct subzone).
    #[must_use]
    pub fn zone_position(&self, position: Vec2) -> Vec2 {
        position.int_div_vec(self.subzone_size)
    }

    /// The canonical subzone for `(location, zone_position)`, created on
    /// first access. Not yet loaded.
    #[must_use]
    pub fn subzone(&self, location: EntityId, zone_position: Vec2) -> Arc<Subzone> {
        let path = Subzone::cache_path(location, zone_position);
        let value = self.world.cache().get_or_set_with(
            &path,
            SetOptions { weak: true },
            || {
                Arc::new(Subzone::new(location, zone_position, self.subzone_size)) as CacheValue
            },
        );
        value
            .downcast::<Subzone>()
            .expect("subzone cache path holds a Subzone")
    }

    /// The loaded 3×3 zone window centered on `zone_position`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Storage`] when loading a member subzone
    /// fails.
    pub async fn zone(&self, location: EntityId, center: Vec2) -> Result<Zone, RegistryError> {
        let subzones: Vec<Arc<Subzone>> = Zone::window(center)
            .map(|zp| self.subzone(location, zp))
            .collect();
        for subzone in &subzones {
            subzone.load(&self.world).await?;
        }
        Ok(Zone::new(location, center, subzones))
    }

    /// The loaded zone window around a tile position.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Storage`] when loading a member subzone
    /// fails.
    pub async fn zone_at(&self, location: EntityId, position: Vec2) -> Result<Zone, RegistryError> {
        self.zone(location, self.zone_position(position)).await
    }

    /// Whether the tile at `position` exists and is free, consulting the
    /// already loaded subzone. An unloaded subzone reports the tile as not
    /// free; movement always happens inside the mover's loaded zone.
    #[must_use]
    pub fn is_tile_free(&self, location: EntityId, position: Vec2) -> bool {
        let subzone = self.subzone(location, self.zone_position(position));
        subzone.is_loaded() && subzone.is_tile_free(position)
    }

    /// Whether a tile exists at `position`, consulting the already loaded
    /// subzone.
    #[must_use]
    pub fn has_tile(&self, location: EntityId, position: Vec2) -> bool {
        let subzone = self.subzone(location, self.zone_position(position));
        subzone.is_loaded() && subzone.has_tile(position)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::cache::Cache;
    use crate::storage::Gateway;
    use crate::world::ChangeTracker;

    use super::*;

    fn atlas() -> Atlas {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/tilemud_test")
            .expect("lazy pool");
        let world = Arc::new(World::new(
            Arc::new(Cache::new(Duration::from_secs(60))),
            Gateway::from_pool(pool),
            Arc::new(ChangeTracker::new()),
        ));
        Atlas::new(world, Vec2::new(16, 32))
    }

    #[tokio::test]
    async fn zone_position_floors_negative_tiles() {
        let atlas = atlas();
        assert_eq!(atlas.zone_position(Vec2::new(5, 5)), Vec2::ZERO);
        assert_eq!(atlas.zone_position(Vec2::new(-1, -1)), Vec2::new(-1, -1));
        assert_eq!(atlas.zone_position(Vec2::new(16, 32)), Vec2::new(1, 1));
    }

    #[tokio::test]
    async fn subzone_is_canonical_per_key() {
        let atlas = atlas();
        let a = atlas.subzone(1, Vec2::new(2, 3));
        let b = atlas.subzone(1, Vec2::new(2, 3));
        let c = atlas.subzone(2, Vec2::new(2, 3));

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn reclaimed_subzone_is_recreated_transparently() {
        let atlas = atlas();
        let first = atlas.subzone(1, Vec2::ZERO);
        drop(first);

        // Unreferenced weak entry: the cleaner reclaims it after the idle
        // duration, and the next lookup builds a fresh instance.
        let dropped = atlas
            .world()
            .cache()
            .clean_at(std::time::Instant::now() + Duration::from_secs(61));
        assert_eq!(dropped, 1);
        let second = atlas.subzone(1, Vec2::ZERO);
        assert!(!second.is_loaded());
    }

    #[tokio::test]
    async fn unloaded_subzone_blocks_movement_checks() {
        let atlas = atlas();
        assert!(!atlas.is_tile_free(1, Vec2::new(3, 4)));
        assert!(!atlas.has_tile(1, Vec2::new(3, 4)));
    }
}
