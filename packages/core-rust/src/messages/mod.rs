//! Wire message schemas.
//!
//! Every transport frame is a JSON object `{event, data}` ([`Envelope`]).
//! Payload structs here define the `data` shape for each event, one module
//! per domain. All keys are snake_case on the wire, which matches the Rust
//! field names directly, so no rename attributes are needed.

pub mod auth;
pub mod base;
pub mod chat;
pub mod world;

pub use auth::{
    SignInAccount, SignInByToken, SignInError, SignInUser, SignUpAccount, SignUpUser, TokenData,
    UserList, UserListEntry,
};
pub use base::{codes, Envelope, Info, Pong, WireError};
pub use chat::SendMessage;
pub use world::{Move, SyncBatch, SyncItem};
