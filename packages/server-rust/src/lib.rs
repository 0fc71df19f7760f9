//! Tilemud Server — the authoritative runtime of a real-time tile world.
//!
//! Clients connect over WebSockets, authenticate, and place avatars on a
//! staggered-isometric tile map; the server owns all state, persists it in
//! `PostgreSQL`, and streams delta syncs to every session that should see
//! them. The moving parts:
//!
//! - [`cache`]: hierarchical identity cache with strong/weak retention
//! - [`world`]: canonical entity instances, lazy refs, change tracking
//! - [`storage`]: schema mapping, query building, pool execution
//! - [`map`]: subzones (unit of loading), zones (unit of visibility), areas
//! - [`sync`]: per-class sync models and the tick-driven synchronizer
//! - [`session`]: socket ↔ account/user index
//! - [`scheduler`]: cooperative tick loop for all periodic work
//! - [`network`]: axum WebSocket transport, event routing, rate limits
//! - [`domain`]: auth, movement, and chat handlers
//! - [`engine`]: construction and wiring of the above

pub mod cache;
pub mod config;
pub mod domain;
pub mod engine;
pub mod map;
pub mod network;
pub mod scheduler;
pub mod session;
pub mod storage;
pub mod sync;
pub mod world;

pub use config::ServerConfig;
pub use engine::Engine;
pub use network::NetworkModule;
pub use scheduler::Scheduler;
