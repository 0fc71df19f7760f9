//! Tilemud Core -- tile-space math, shared ids, and wire message schemas.
//!
//! This crate provides the foundation layer for the tilemud server:
//!
//! - **Vec2** ([`vec2`]): integer tile vector with staggered-isometric distance
//! - **Types** ([`types`]): entity ids, `EntityKind`, `SyncOp`, `FieldValue`
//! - **Messages** ([`messages`]): the `{event, data}` envelope and per-event payloads

pub mod messages;
pub mod types;
pub mod vec2;

// Types
pub use types::{EntityId, EntityKind, FieldValue, SyncOp};

// Vec2
pub use vec2::Vec2;

// Messages
pub use messages::{codes, Envelope, Info, SyncBatch, SyncItem, WireError};
