//! State synchronization: per-class sync models and the tick-driven
//! synchronizer that fans entity changes out to the sessions that should
//! see them.

pub mod model;
pub mod synchronizer;

pub use model::{MapFn, ModelError, Receiver, SyncEntry, SyncModel, SyncModels};
pub use synchronizer::{Outbox, Synchronizer};
