//! Movement handler.
//!
//! A `move` request applies one step in a unit direction. Steps scale X by
//! the configured speed and Y by twice the speed, since one visual tile of
//! height spans two Y units on the staggered map. A step is rejected (not
//! consumed, so its rate-limit slot is refunded) when the target tile is
//! missing or occupied, or when the tile one step further in the same
//! direction is absent: the outermost loaded row/column is half-visible
//! and never enterable.

use async_trait::async_trait;
use tilemud_core::messages::Move;
use tilemud_core::Vec2;

use crate::network::{EventContext, EventHandler, HandlerError, Outcome};
use crate::world::User;

pub struct MoveHandler;

#[async_trait]
impl EventHandler for MoveHandler {
    async fn handle(&self, ctx: EventContext) -> Result<Outcome, HandlerError> {
        let data: Move = ctx.parse()?;
        let direction = data.direction;
        if direction.x.abs() > 1 || direction.y.abs() > 1 || direction == Vec2::ZERO {
            return Err(HandlerError::Validation);
        }

        let engine = &ctx.engine;
        let Some(user_id) = engine.sessions.user_by_socket(ctx.socket) else {
            return Err(HandlerError::Internal(anyhow::anyhow!("access checked")));
        };
        let user = engine.world.get_or_fail::<User>(user_id).await?;

        let (location, position) = {
            let user = user.read();
            let Some(location) = user.location.key() else {
                return Ok(Outcome::NotConsumed);
            };
            (location, user.position())
        };

        let speed = if data.run {
            engine.config.movement_run_speed
        } else {
            engine.config.movement_walk_speed
        };
        let step = Vec2::new(direction.x * speed, direction.y * speed * 2);
        let target = position + step;
        let probe = target + Vec2::new(direction.x, direction.y * 2);

        if !engine.atlas.is_tile_free(location, target) || !engine.atlas.has_tile(location, probe) {
            return Ok(Outcome::NotConsumed);
        }

        user.write().set_position(engine.world.tracker(), target);
        Ok(Outcome::Consumed)
    }
}
