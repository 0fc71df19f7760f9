//! Transport boundary: sockets, event routing, rate limits, HTTP plumbing.

pub mod config;
pub mod connection;
pub mod handlers;
pub mod limiter;
pub mod middleware;
pub mod module;
pub mod router;
pub mod shutdown;

pub use config::{ConnectionConfig, NetworkConfig};
pub use connection::{OutboundFrame, SocketHandle, SocketId, SocketRegistry};
pub use handlers::AppState;
pub use limiter::{Limit, RateLimiter};
pub use module::NetworkModule;
pub use router::{Access, EventContext, EventHandler, EventRouter, HandlerError, Outcome};
pub use shutdown::{HealthState, InFlightGuard, ShutdownController};
