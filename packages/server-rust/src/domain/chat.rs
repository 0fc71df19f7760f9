//! Chat handler and message expiry sweep.
//!
//! A sent message becomes a persistent entity at the speaker's position;
//! the sync model fans its Create out to the hearing-radius disk. Expiry
//! is a periodic sweep comparing the persisted creation time against the
//! wall clock, so message lifetimes survive server restarts (a message
//! loaded back from storage after a restart still expires on schedule,
//! at most one sweep period late).

use std::sync::Arc;

use async_trait::async_trait;
use tilemud_core::messages::SendMessage;

use crate::network::{EventContext, EventHandler, HandlerError, Outcome};
use crate::world::entity::{Ref, Stored};
use crate::world::{Message, User, World};

const MAX_TEXT_LEN: usize = 256;

pub struct SendMessageHandler;

#[async_trait]
impl EventHandler for SendMessageHandler {
    async fn handle(&self, ctx: EventContext) -> Result<Outcome, HandlerError> {
        let data: SendMessage = ctx.parse()?;
        let text = data.text.trim();
        if text.is_empty() || text.chars().count() > MAX_TEXT_LEN {
            return Err(HandlerError::Validation);
        }

        let engine = &ctx.engine;
        let Some(user_id) = engine.sessions.user_by_socket(ctx.socket) else {
            return Err(HandlerError::Internal(anyhow::anyhow!("access checked")));
        };
        let user = engine.world.get_or_fail::<User>(user_id).await?;

        let mut message = Message::stub(0);
        message.meta_mut().initialized = true;
        message.text = text.to_string();
        message.position = user.read().position();
        message.location = user.read().location.clone();
        message.user = Ref::resolved(user);
        message.delete_in = Message::DEFAULT_DELETE_IN_MS;
        message.created_at = super::now_ms();
        engine.world.create(message);

        Ok(Outcome::Consumed)
    }
}

/// Removes expired messages; the tracker turns each removal into a DB
/// delete and a Delete sync to the message's audience.
pub fn expire_messages(world: &Arc<World>) {
    let now = super::now_ms();
    for handle in world.cached::<Message>() {
        let expired = {
            let message = handle.read();
            message.meta().initialized && now >= message.expires_at()
        };
        if expired {
            world.remove(&Message::wrap(handle));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cache::Cache;
    use crate::storage::Gateway;
    use crate::world::ChangeTracker;

    fn world() -> Arc<World> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/tilemud_test")
            .expect("lazy pool");
        Arc::new(World::new(
            Arc::new(Cache::new(Duration::from_secs(60))),
            Gateway::from_pool(pool),
            Arc::new(ChangeTracker::new()),
        ))
    }

    fn cached_message(world: &Arc<World>, id: i64, created_at: i64, delete_in: i64) {
        let handle = world.stub_handle::<Message>(id);
        let mut message = handle.write();
        message.meta_mut().initialized = true;
        message.created_at = created_at;
        message.delete_in = delete_in;
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_messages() {
        let world = world();
        let now = super::super::now_ms();
        cached_message(&world, 1, now - 400_000, 300_000);
        cached_message(&world, 2, now, 300_000);

        expire_messages(&world);

        let batch = world.tracker().take_flush();
        assert_eq!(batch.deletes.len(), 1);
        assert_eq!(batch.deletes[0].id(), 1);
        assert!(world.get_if_cached::<Message>(1).is_none());
        assert!(world.get_if_cached::<Message>(2).is_some());
    }

    #[tokio::test]
    async fn sweep_ignores_uninitialized_stubs() {
        let world = world();
        let _stub = world.stub_handle::<Message>(9);
        expire_messages(&world);
        assert!(world.tracker().take_flush().deletes.is_empty());
    }
}
