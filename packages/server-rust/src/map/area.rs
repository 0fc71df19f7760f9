//! Areas: user-defined receiver shapes.
//!
//! A sync model may declare an area constructor as the receiver of a
//! property. At emit time the synchronizer instantiates the area from the
//! entity's parameters, loads it (which loads the covering subzones), and
//! uses it as a container of users.

use async_trait::async_trait;
use tilemud_core::{EntityId, Vec2};

use crate::world::entity::AreaParams;
use crate::world::User;

use super::atlas::Atlas;

/// Area construction and resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum AreaError {
    /// The entity's parameters do not fit the constructor. Configuration
    /// error: fatal at startup validation, logged at emit time.
    #[error("area constructor expects parameter {index}")]
    MissingParam { index: usize },
    #[error(transparent)]
    Registry(#[from] crate::world::RegistryError),
}

/// A loadable container of users.
#[async_trait]
pub trait Area: Send + Sync {
    /// Loads the covering subzones and captures the contained users.
    async fn load(&mut self, atlas: &Atlas) -> Result<(), AreaError>;

    /// Users inside the area. Meaningful after [`Area::load`].
    fn user_ids(&self) -> Vec<EntityId>;
}

/// Constructor registered in a sync model declaration.
pub type AreaFactory = fn(&AreaParams) -> Result<Box<dyn Area>, AreaError>;

/// A disk in the staggered metric: every user within `radius` tiles of the
/// center.
pub struct Disk {
    location: EntityId,
    center: Vec2,
    radius: f64,
    users: Vec<EntityId>,
}

impl Disk {
    #[must_use]
    pub fn new(location: EntityId, center: Vec2, radius: f64) -> Self {
        Self {
            location,
            center,
            radius,
            users: Vec::new(),
        }
    }

    /// The [`AreaFactory`] for disks; `extra[0]` is the radius.
    ///
    /// # Errors
    ///
    /// Returns [`AreaError::MissingParam`] when the radius is absent.
    pub fn from_params(params: &AreaParams) -> Result<Box<dyn Area>, AreaError> {
        let radius = *params
            .extra
            .first()
            .ok_or(AreaError::MissingParam { index: 0 })?;
        Ok(Box::new(Self::new(params.location, params.center, radius)))
    }

    #[must_use]
    pub fn contains(&self, position: Vec2) -> bool {
        self.center.distance(position) <= self.radius
    }
}

#[async_trait]
impl Area for Disk {
    async fn load(&mut self, atlas: &Atlas) -> Result<(), AreaError> {
        // The 3×3 window around the center covers any radius up to a full
        // subzone; candidates beyond it cannot hear the source anyway.
        let zone = atlas.zone_at(self.location, self.center).await?;
        let world = atlas.world();
        self.users = zone
            .user_ids()
            .into_iter()
            .filter(|&id| {
                world
                    .get_if_cached::<User>(id)
                    .is_some_and(|user| self.contains(user.read().position()))
            })
            .collect();
        Ok(())
    }

    fn user_ids(&self) -> Vec<EntityId> {
        self.users.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_contains_uses_staggered_metric() {
        let disk = Disk::new(1, Vec2::ZERO, 3.0);
        // Six Y units is three staggered tiles: exactly on the edge.
        assert!(disk.contains(Vec2::new(0, 6)));
        assert!(!disk.contains(Vec2::new(0, 8)));
        assert!(disk.contains(Vec2::new(3, 0)));
        assert!(!disk.contains(Vec2::new(4, 0)));
    }

    #[test]
    fn factory_requires_radius() {
        let params = AreaParams {
            location: 1,
            center: Vec2::ZERO,
            extra: Vec::new(),
        };
        assert!(matches!(
            Disk::from_params(&params),
            Err(AreaError::MissingParam { index: 0 })
        ));

        let params = AreaParams {
            location: 1,
            center: Vec2::ZERO,
            extra: vec![30.0],
        };
        assert!(Disk::from_params(&params).is_ok());
    }
}
