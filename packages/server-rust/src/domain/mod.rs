//! Domain event handlers: authentication, movement, chat.
//!
//! One module per concern; each exposes handler types the engine registers
//! into the event router, plus any periodic sweeps the scheduler runs.

pub mod auth;
pub mod chat;
pub mod movement;

use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock milliseconds since the Unix epoch, as persisted in
/// `created_at` columns.
#[must_use]
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
