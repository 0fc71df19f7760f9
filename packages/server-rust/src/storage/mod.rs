//! Persistence gateway: schema mapping, query building, and execution.
//!
//! Layering follows the rest of the engine's pure-core/IO-shell split:
//! [`schema`] and [`query`] are pure (and unit-tested without a database),
//! [`gateway`] executes built queries on a `PostgreSQL` pool. The gateway is
//! oblivious to game semantics; orchestration lives in the entity registry
//! and the synchronizer.

pub mod gateway;
pub mod query;
pub mod schema;

pub use gateway::{Gateway, StorageError};
pub use query::{Query, SelectOptions, SqlParam, WhereClause};
pub use schema::{column_for_ref, columns_for_vec2};
