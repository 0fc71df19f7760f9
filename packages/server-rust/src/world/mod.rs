//! The entity layer: canonical instances, lazy references, change tracking.
//!
//! Every persistent object lives behind `Arc<RwLock<T>>` with exactly one
//! live instance per `{kind, id}`, guaranteed by the registry ([`World`])
//! backed by the identity cache. Mutations go through typed setters that
//! record dirty fields in the [`ChangeTracker`]; the synchronizer and the
//! flush task drain those records independently.

pub mod entities;
pub mod entity;
pub mod registry;
pub mod tracker;

pub use entities::{Account, EntityRef, Item, Location, Message, Tile, User};
pub use entity::{AreaParams, EntityMeta, Ref, Shared, Stored};
pub use registry::{RegistryError, World};
pub use tracker::{ChangeBatch, ChangeTracker, UpdateRecord};
