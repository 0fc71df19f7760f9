//! Event dispatch: access levels, rate limits, and handler routing.
//!
//! Every inbound envelope is routed by event name through an access check
//! and an optional rate limit before its handler runs. Failures at each
//! stage are reported to the client as `info` events with a semantic code;
//! handler errors never escape the dispatcher.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tilemud_core::{codes, Envelope};
use tracing::{debug, error};

use crate::engine::Engine;

use super::connection::SocketId;
use super::limiter::Limit;

/// Authentication state an event requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Always permitted.
    ForAll,
    /// Only before any sign-in.
    OnlyGuest,
    /// Account signed in, user not yet.
    OnlyLoggedAccount,
    /// Account signed in; user optional.
    OnlyLoggedAtLeastAccount,
    /// User signed in.
    OnlyLogged,
}

/// What a handler did with the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Consumed,
    /// The request had no effect (a blocked move, say); its rate-limit
    /// timestamp is refunded.
    NotConsumed,
}

/// Handler failures the dispatcher reports for the handler.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Client data did not match the event's schema.
    #[error("invalid input")]
    Validation,
    /// Anything else; reported as `UNKNOWN_ERROR` and logged.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<crate::world::RegistryError> for HandlerError {
    fn from(err: crate::world::RegistryError) -> Self {
        Self::Internal(err.into())
    }
}

/// What a handler receives: the engine's services, the socket, and the
/// raw payload to parse.
pub struct EventContext {
    pub engine: Arc<Engine>,
    pub socket: SocketId,
    pub raw: serde_json::Value,
}

impl EventContext {
    /// Parses the payload into the event's schema.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::Validation`] on any mismatch.
    pub fn parse<T: serde::de::DeserializeOwned>(&self) -> Result<T, HandlerError> {
        serde_json::from_value(self.raw.clone()).map_err(|_| HandlerError::Validation)
    }
}

/// One event handler.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, ctx: EventContext) -> Result<Outcome, HandlerError>;
}

struct EventRoute {
    access: Access,
    limit: Option<Limit>,
    handler: Arc<dyn EventHandler>,
}

/// Event-name → route table, populated once at engine construction.
#[derive(Default)]
pub struct EventRouter {
    routes: HashMap<&'static str, EventRoute>,
}

impl EventRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        event: &'static str,
        access: Access,
        limit: Option<Limit>,
        handler: Arc<dyn EventHandler>,
    ) {
        let previous = self.routes.insert(event, EventRoute { access, limit, handler });
        debug_assert!(previous.is_none(), "event {event} registered twice");
    }

    #[must_use]
    pub fn has_route(&self, event: &str) -> bool {
        self.routes.contains_key(event)
    }

    /// Full dispatch pipeline for one inbound envelope.
    pub async fn dispatch(&self, engine: &Arc<Engine>, socket: SocketId, envelope: Envelope) {
        let Some(route) = self.routes.get(envelope.event.as_str()) else {
            debug!(event = %envelope.event, "unknown event");
            engine.send_info(socket, codes::WRONG_DATA);
            return;
        };

        if let Some(denial) = Self::check_access(route.access, engine, socket) {
            engine.send_info(socket, denial);
            return;
        }

        if let Some(limit) = route.limit {
            if !engine.limiter.check(socket, &envelope.event, limit) {
                engine.send_info(socket, codes::LIMIT_REACHED);
                return;
            }
        }

        let ctx = EventContext {
            engine: Arc::clone(engine),
            socket,
            raw: envelope.data,
        };
        match route.handler.handle(ctx).await {
            Ok(Outcome::Consumed) => {}
            Ok(Outcome::NotConsumed) => {
                if route.limit.is_some() {
                    engine.limiter.pop_last(socket, &envelope.event);
                }
            }
            Err(HandlerError::Validation) => {
                engine.send_info(socket, codes::WRONG_DATA);
            }
            Err(HandlerError::Internal(err)) => {
                error!(event = %envelope.event, error = ?err, "handler failed");
                engine.send_info(socket, codes::UNKNOWN_ERROR);
            }
        }
    }

    /// The denial code for the socket's auth state, or `None` when the
    /// event is permitted.
    fn check_access(access: Access, engine: &Engine, socket: SocketId) -> Option<&'static str> {
        let account = engine.sessions.is_logged_into_account(socket);
        let user = engine.sessions.is_logged_as_user(socket);
        match access {
            Access::ForAll => None,
            Access::OnlyGuest => account.then_some(codes::ALREADY_LOGGED_IN),
            Access::OnlyLoggedAccount => {
                if !account {
                    Some(codes::PLEASE_LOGIN_ACCOUNT)
                } else if user {
                    Some(codes::ALREADY_LOGGED_IN)
                } else {
                    None
                }
            }
            Access::OnlyLoggedAtLeastAccount => (!account).then_some(codes::PLEASE_LOGIN_ACCOUNT),
            Access::OnlyLogged => (!user).then_some(codes::PLEASE_LOGIN_USER),
        }
    }
}
