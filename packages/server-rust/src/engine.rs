//! The engine: construction and wiring of every subsystem.
//!
//! One [`Engine`] value owns the world, the map, the sync pipeline, the
//! sessions, the sockets, and the event router, and registers the
//! periodic work on the scheduler. Components receive each other
//! explicitly; nothing here is a global.
//!
//! Scheduler priorities order the work inside one tick: the DB flush runs
//! before the synchronizer so freshly created entities carry their
//! adopted keys when their Create syncs go out.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tilemud_core::{Envelope, Info, SyncOp};
use tracing::info;

use crate::cache::Cache;
use crate::config::ServerConfig;
use crate::domain::{auth, chat, movement};
use crate::map::Atlas;
use crate::network::{
    Access, EventRouter, Limit, RateLimiter, SocketId, SocketRegistry,
};
use crate::scheduler::Scheduler;
use crate::session::SessionIndex;
use crate::storage::Gateway;
use crate::sync::{Outbox, SyncModels, Synchronizer};
use crate::world::entity::Stored;
use crate::world::{ChangeTracker, User, World};

/// Scheduler priorities, lowest first.
const PRIORITY_DB_FLUSH: i32 = 0;
const PRIORITY_SYNC: i32 = 10;
const PRIORITY_CACHE_CLEAN: i32 = 20;
const PRIORITY_MESSAGE_EXPIRY: i32 = 30;

/// Period of the chat-expiry sweep.
const MESSAGE_EXPIRY_PERIOD: Duration = Duration::from_secs(1);

/// Everything the server runs on.
pub struct Engine {
    pub config: ServerConfig,
    pub world: Arc<World>,
    pub atlas: Atlas,
    pub sessions: Arc<SessionIndex>,
    pub sockets: Arc<SocketRegistry>,
    pub limiter: Arc<RateLimiter>,
    pub synchronizer: Arc<Synchronizer>,
    pub scheduler: Arc<Scheduler>,
    router: EventRouter,
}

impl Engine {
    /// Builds the engine on an established gateway and registers all
    /// periodic tasks.
    ///
    /// # Errors
    ///
    /// Fails when the sync model declarations are inconsistent; the server
    /// must not start serving in that case.
    pub fn new(config: ServerConfig, gateway: Gateway) -> anyhow::Result<Arc<Self>> {
        let models = Arc::new(SyncModels::standard()?);
        let cache = Arc::new(Cache::new(config.cache_default_duration()));
        let tracker = Arc::new(ChangeTracker::new());
        let world = Arc::new(World::new(cache, gateway, tracker));
        let atlas = Atlas::new(Arc::clone(&world), config.subzone_size());
        let sessions = Arc::new(SessionIndex::new());
        let sockets = Arc::new(SocketRegistry::new());
        let synchronizer = Arc::new(Synchronizer::new(
            Arc::clone(&world),
            atlas.clone(),
            models,
            Arc::clone(&sessions),
            Arc::clone(&sockets) as Arc<dyn Outbox>,
        ));
        let scheduler = Arc::new(Scheduler::new(config.tick_period()));

        let engine = Arc::new(Self {
            config,
            world,
            atlas,
            sessions,
            sockets,
            limiter: Arc::new(RateLimiter::new()),
            synchronizer,
            scheduler,
            router: build_router(),
        });
        engine.register_tasks();
        Ok(engine)
    }

    /// An engine over a lazily connecting pool, for code paths that never
    /// reach the database.
    #[must_use]
    pub fn for_tests(config: ServerConfig) -> Arc<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy(&config.database_url)
            .expect("lazy pool");
        Self::new(config, Gateway::from_pool(pool)).expect("standard models are consistent")
    }

    fn register_tasks(self: &Arc<Self>) {
        let world = Arc::clone(&self.world);
        self.scheduler.add_task(
            "db_flush",
            self.config.db_flush_period(),
            PRIORITY_DB_FLUSH,
            Box::new(move |_| {
                let world = Arc::clone(&world);
                Box::pin(async move { world.flush().await.map_err(Into::into) })
            }),
        );

        let synchronizer = Arc::clone(&self.synchronizer);
        self.scheduler.add_task(
            "sync",
            self.config.sync_period(),
            PRIORITY_SYNC,
            Box::new(move |_| {
                let synchronizer = Arc::clone(&synchronizer);
                Box::pin(async move { synchronizer.tick().await })
            }),
        );

        let world = Arc::clone(&self.world);
        self.scheduler.add_task(
            "cache_clean",
            self.config.cache_clean_period(),
            PRIORITY_CACHE_CLEAN,
            Box::new(move |_| {
                let world = Arc::clone(&world);
                Box::pin(async move {
                    let dropped = world.cache().clean();
                    if dropped > 0 {
                        info!(dropped, "cache cleaned");
                    }
                    Ok(())
                })
            }),
        );

        let world = Arc::clone(&self.world);
        self.scheduler.add_task(
            "message_expiry",
            MESSAGE_EXPIRY_PERIOD,
            PRIORITY_MESSAGE_EXPIRY,
            Box::new(move |_| {
                let world = Arc::clone(&world);
                Box::pin(async move {
                    chat::expire_messages(&world);
                    Ok(())
                })
            }),
        );
    }

    /// Sends one event to one socket.
    pub fn send<T: Serialize>(&self, socket: SocketId, event: &str, payload: &T) {
        self.sockets.send_envelope(socket, &Envelope::new(event, payload));
    }

    /// Sends an event with a `null` payload.
    pub fn send_empty(&self, socket: SocketId, event: &str) {
        self.sockets.send_envelope(socket, &Envelope::empty(event));
    }

    /// Sends an `info` event carrying a semantic code.
    pub fn send_info(&self, socket: SocketId, code: &str) {
        self.send(socket, "info", &Info::new(code));
    }

    /// Routes one decoded inbound envelope.
    pub async fn handle_frame(self: &Arc<Self>, socket: SocketId, envelope: Envelope) {
        self.router.dispatch(self, socket, envelope).await;
    }

    /// Socket teardown: sign the user out of the world if this was their
    /// last socket, drop both session slots, forget rate-limit windows.
    pub async fn handle_socket_close(self: &Arc<Self>, socket: SocketId) {
        self.sign_out_user(socket).await;
        self.sessions.handle_close(socket);
        self.limiter.forget_socket(socket);
    }

    /// Logs the socket's user slot out. When no other socket keeps the
    /// user online, the avatar leaves the world (zone leave plus a Delete
    /// sync to its neighborhood).
    pub async fn sign_out_user(self: &Arc<Self>, socket: SocketId) {
        let Some(user_id) = self.sessions.user_by_socket(socket) else {
            return;
        };
        self.sessions.log_out_user(socket);
        if self.sessions.is_user_online(user_id) {
            return;
        }
        if let Some(user) = self.world.get_if_cached::<User>(user_id) {
            self.synchronizer.announce(&User::wrap(user), SyncOp::Delete).await;
        }
    }
}

/// The event surface, with its access levels and per-socket limits.
fn build_router() -> EventRouter {
    let mut router = EventRouter::new();

    router.register(
        "ping",
        Access::ForAll,
        None,
        Arc::new(auth::PingHandler),
    );
    router.register(
        "sign_up_account",
        Access::OnlyGuest,
        Some(Limit::once_per_ms(60_000)),
        Arc::new(auth::SignUpAccountHandler),
    );
    router.register(
        "sign_in_account",
        Access::OnlyGuest,
        Some(Limit::new(Duration::from_secs(1), 1)),
        Arc::new(auth::SignInAccountHandler),
    );
    router.register(
        "sign_in_by_token",
        Access::OnlyGuest,
        Some(Limit::new(Duration::from_secs(1), 1)),
        Arc::new(auth::SignInByTokenHandler),
    );
    router.register(
        "sign_up_user",
        Access::OnlyLoggedAccount,
        Some(Limit::once_per_ms(10_000)),
        Arc::new(auth::SignUpUserHandler),
    );
    router.register(
        "sign_in_user",
        Access::OnlyLoggedAccount,
        Some(Limit::new(Duration::from_secs(1), 1)),
        Arc::new(auth::SignInUserHandler),
    );
    router.register(
        "get_user_list",
        Access::OnlyLoggedAtLeastAccount,
        Some(Limit::new(Duration::from_secs(1), 2)),
        Arc::new(auth::GetUserListHandler),
    );
    router.register(
        "log_out_user",
        Access::OnlyLogged,
        None,
        Arc::new(auth::LogOutUserHandler),
    );
    router.register(
        "log_out_account",
        Access::OnlyLoggedAtLeastAccount,
        None,
        Arc::new(auth::LogOutAccountHandler),
    );
    router.register(
        "move",
        Access::OnlyLogged,
        Some(Limit::new(Duration::from_millis(100), 1)),
        Arc::new(movement::MoveHandler),
    );
    router.register(
        "send_message",
        Access::OnlyLogged,
        Some(Limit::new(Duration::from_secs(1), 1)),
        Arc::new(chat::SendMessageHandler),
    );

    router
}
