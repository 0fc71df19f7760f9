//! The synchronizer: change sets in, per-recipient sync events out.
//!
//! Runs as a scheduler task every sync tick, after the DB flush (so
//! freshly inserted entities already carry their keys). Each tick drains
//! the tracker's sync layer, resolves every declared receiver, handles
//! zone transitions (membership moves plus the delete-before-create swap
//! batches), applies lazy suppression, and sends each user exactly one
//! `sync` event with their ordered payload list.
//!
//! Failures are contained per receiver: a receiver that resolves to nobody
//! is skipped, an area constructor that rejects its parameters is logged as
//! a configuration error, and nothing here ever unwinds into the transport.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tilemud_core::{EntityId, EntityKind, Envelope, SyncBatch, SyncItem, SyncOp, Vec2};
use tracing::{error, warn};

use crate::map::{Atlas, Zone};
use crate::network::SocketId;
use crate::session::SessionIndex;
use crate::world::registry::RegistryError;
use crate::world::{EntityRef, UpdateRecord, World};

use super::model::{Receiver, SyncModel, SyncModels};

/// Transport-side sink for outbound envelopes. Writes to closed sockets
/// are dropped by the implementation.
pub trait Outbox: Send + Sync {
    fn send(&self, socket: SocketId, envelope: &Envelope);
}

/// Ordered stream of `(recipient, item)` pairs built during one tick.
type Emissions = Vec<(EntityId, SyncItem)>;

struct ReceiverGroup {
    receiver: Receiver,
    payload: serde_json::Map<String, serde_json::Value>,
    all_lazy: bool,
}

/// The per-tick sync engine.
pub struct Synchronizer {
    world: Arc<World>,
    atlas: Atlas,
    models: Arc<SyncModels>,
    sessions: Arc<SessionIndex>,
    outbox: Arc<dyn Outbox>,
    /// Handler-queued emissions (first-load batches, announcements),
    /// merged ahead of tracker-driven emissions at the next tick.
    pending: Mutex<Emissions>,
}

impl Synchronizer {
    #[must_use]
    pub fn new(
        world: Arc<World>,
        atlas: Atlas,
        models: Arc<SyncModels>,
        sessions: Arc<SessionIndex>,
        outbox: Arc<dyn Outbox>,
    ) -> Self {
        Self {
            world,
            atlas,
            models,
            sessions,
            outbox,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Queues items for a user, delivered with the next tick's batch.
    pub fn queue_for_user(&self, user: EntityId, items: impl IntoIterator<Item = SyncItem>) {
        let mut pending = self.pending.lock();
        pending.extend(items.into_iter().map(|item| (user, item)));
    }

    /// One sync tick: drain, fan out, send.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the signature matches the scheduler's task
    /// contract, and per-receiver failures are logged instead of raised.
    pub async fn tick(&self) -> anyhow::Result<()> {
        let mut out: Emissions = std::mem::take(&mut *self.pending.lock());
        let batch = self.world.tracker().take_sync();

        for entity in &batch.creates {
            self.emit_change(&mut out, entity, SyncOp::Create).await;
        }
        for update in &batch.updates {
            let Some(entity) = self.world.entity_ref(update.kind, update.id) else {
                // Evicted between mutation and tick; nobody can see it.
                continue;
            };
            self.emit_update(&mut out, &entity, update).await;
        }
        for entity in &batch.deletes {
            self.emit_change(&mut out, entity, SyncOp::Delete).await;
        }

        self.send(out);
        Ok(())
    }

    /// First sign-in of a user: a Create for every visible entity in their
    /// zone, queued as one initial batch. The user's own Self Create comes
    /// from announcing the user's appearance (see
    /// [`Synchronizer::announce`]).
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Storage`] when the zone cannot be loaded.
    pub async fn first_load(&self, user: &EntityRef) -> Result<(), RegistryError> {
        let Some(user_id) = user.as_user_id() else {
            return Ok(());
        };
        let Some((location, cells)) = user.spatial() else {
            return Ok(());
        };
        let anchor = cells.first().copied().unwrap_or(Vec2::ZERO);
        let zone = self.atlas.zone_at(location, anchor).await?;

        let mut items = Vec::new();
        for (kind, id) in zone.entities() {
            if kind == EntityKind::User && id == user_id {
                continue;
            }
            let Some(model) = self.models.get(kind) else {
                continue;
            };
            let Some(entity) = self.world.entity_ref(kind, id) else {
                continue;
            };
            items.push(SyncItem::new(
                SyncOp::Create,
                model.kind.model_name(),
                serde_json::Value::Object(Self::full_payload(&entity, model)),
            ));
        }
        self.queue_for_user(user_id, items);
        Ok(())
    }

    /// Announces an entity's appearance or disappearance outside the
    /// tracker: sign-in (Create) and sign-out (Delete) of users, whose
    /// rows persist across sessions. Also moves zone membership.
    pub async fn announce(&self, entity: &EntityRef, op: SyncOp) {
        let mut out = Emissions::new();
        self.emit_change(&mut out, entity, op).await;
        self.pending.lock().extend(out);
    }

    fn send(&self, out: Emissions) {
        let mut order: Vec<EntityId> = Vec::new();
        let mut per_user: std::collections::HashMap<EntityId, Vec<SyncItem>> =
            std::collections::HashMap::new();
        for (user, item) in out {
            per_user
                .entry(user)
                .or_insert_with(|| {
                    order.push(user);
                    Vec::new()
                })
                .push(item);
        }
        for user in order {
            let Some(syncs) = per_user.remove(&user) else {
                continue;
            };
            if syncs.is_empty() {
                continue;
            }
            let envelope = Envelope::new("sync", &SyncBatch { syncs });
            for socket in self.sessions.sockets_by_user(user) {
                self.outbox.send(socket, &envelope);
            }
        }
    }

    /// Emits a Create or Delete for an entity to all its declared
    /// receivers, then applies the membership change.
    async fn emit_change(&self, out: &mut Emissions, entity: &EntityRef, op: SyncOp) {
        let Some(model) = self.models.get(entity.kind()) else {
            return;
        };
        let spatial = entity.spatial();
        let zone_users =
            spatial.as_ref().map(|(location, cells)| self.users_around(*location, cells));

        for group in self.build_groups(entity, model, None) {
            let users = self.resolve_receiver(group.receiver, entity, zone_users.as_deref()).await;
            let item = SyncItem::new(
                op,
                model.kind.model_name(),
                serde_json::Value::Object(group.payload),
            );
            for user in users {
                out.push((user, item.clone()));
            }
        }

        if let Some((location, cells)) = spatial {
            let anchor = entity.vec2_field("position").unwrap_or(cells[0]);
            match self.atlas.zone_at(location, anchor).await {
                Ok(zone) => match op {
                    SyncOp::Create => {
                        zone.enter(entity.kind(), entity.id(), &cells, entity.blocks_tiles());
                    }
                    SyncOp::Delete => {
                        zone.leave(entity.kind(), entity.id(), &cells, entity.blocks_tiles());
                    }
                    SyncOp::Update => {}
                },
                Err(err) => {
                    error!(error = %err, "zone load failed during membership change");
                }
            }
        }
    }

    /// Emits an Update, handling zone transitions.
    async fn emit_update(&self, out: &mut Emissions, entity: &EntityRef, update: &UpdateRecord) {
        let Some(model) = self.models.get(update.kind) else {
            return;
        };
        let declared: Vec<&'static str> = update
            .fields
            .iter()
            .copied()
            .filter(|field| model.entries(field).is_some())
            .collect();

        let moved = update.original.contains_key("position") || update.original.contains_key("location");
        let mut zone_changed = false;
        let mut remaining_users: Option<Vec<EntityId>> = None;

        if moved {
            if let Some((location, cells)) = entity.spatial() {
                match self.apply_move(out, entity, update, location, &cells).await {
                    Ok(result) => {
                        zone_changed = result.zone_changed;
                        remaining_users = result.remaining_users;
                    }
                    Err(err) => {
                        error!(error = %err, "zone transition failed");
                    }
                }
            }
        }

        if declared.is_empty() {
            return;
        }

        let zone_users = match remaining_users {
            Some(users) => Some(users),
            None => entity
                .spatial()
                .map(|(location, cells)| self.users_around(location, &cells)),
        };

        for group in self.build_groups(entity, model, Some(&declared)) {
            // Lazy suppression: a receiver whose every emitted field is
            // lazy sees nothing unless the zone changed for it.
            if group.all_lazy && !zone_changed {
                continue;
            }
            let users = self.resolve_receiver(group.receiver, entity, zone_users.as_deref()).await;
            let item = SyncItem::new(
                SyncOp::Update,
                model.kind.model_name(),
                serde_json::Value::Object(group.payload),
            );
            for user in users {
                out.push((user, item.clone()));
            }
        }
    }

    /// Moves zone membership and, when the window shifted, emits the
    /// delete-before-create swap batches to the mover and its observers.
    async fn apply_move(
        &self,
        out: &mut Emissions,
        entity: &EntityRef,
        update: &UpdateRecord,
        location: EntityId,
        cells: &[Vec2],
    ) -> Result<MoveResult, RegistryError> {
        let anchor = entity.vec2_field("position").unwrap_or(cells[0]);
        let old_anchor = update
            .original
            .get("position")
            .and_then(tilemud_core::FieldValue::as_vec2)
            .unwrap_or(anchor);
        let old_location = update
            .original
            .get("location")
            .and_then(tilemud_core::FieldValue::as_id)
            .unwrap_or(location);

        let shift = old_anchor - anchor;
        let old_cells: Vec<Vec2> = cells.iter().map(|cell| *cell + shift).collect();

        let new_center = self.atlas.zone_position(anchor);
        let old_center = self.atlas.zone_position(old_anchor);

        let old_zone = self.atlas.zone(old_location, old_center).await?;
        let new_zone = if old_location == location && old_center == new_center {
            old_zone.clone()
        } else {
            self.atlas.zone(location, new_center).await?
        };

        // Membership first: enter/leave precede any Update emission for
        // this entity in the same tick.
        let (kind, id, blocks) = (entity.kind(), entity.id(), entity.blocks_tiles());
        old_zone.leave(kind, id, &old_cells, blocks);
        new_zone.enter(kind, id, cells, blocks);

        if old_location == location && old_center == new_center {
            return Ok(MoveResult { zone_changed: false, remaining_users: None });
        }

        let (entered, left, remaining) = if old_location == location {
            Zone::difference_of(&new_zone, &old_zone)
        } else {
            (
                new_zone.subzones().to_vec(),
                old_zone.subzones().to_vec(),
                Vec::new(),
            )
        };

        let mover = entity.as_user_id();

        // Deletes for everything left behind, before any Creates, so
        // clients can free local state reliably.
        self.emit_swap(out, entity, SyncOp::Delete, &left, mover).await;
        self.emit_swap(out, entity, SyncOp::Create, &entered, mover).await;

        let mut remaining_users: Vec<EntityId> = Vec::new();
        let mut seen = HashSet::new();
        for subzone in &remaining {
            for user in subzone.entities_of(EntityKind::User) {
                if seen.insert(user) {
                    remaining_users.push(user);
                }
            }
        }
        Ok(MoveResult {
            zone_changed: true,
            remaining_users: Some(remaining_users),
        })
    }

    /// One side of a zone swap: `op` of the mover to the observers in
    /// `subzones`, and (for a moving user) `op` of every entity in those
    /// subzones to the mover.
    async fn emit_swap(
        &self,
        out: &mut Emissions,
        entity: &EntityRef,
        op: SyncOp,
        subzones: &[Arc<crate::map::Subzone>],
        mover: Option<EntityId>,
    ) {
        // Observers learn of the mover's appearance/disappearance.
        if let Some(model) = self.models.get(entity.kind()) {
            let payload = Self::full_payload(entity, model);
            let item = SyncItem::new(op, model.kind.model_name(), serde_json::Value::Object(payload));
            let mut seen = HashSet::new();
            for subzone in subzones {
                for user in subzone.entities_of(EntityKind::User) {
                    if Some(user) == mover || !seen.insert(user) {
                        continue;
                    }
                    out.push((user, item.clone()));
                }
            }
        }

        // A moving user learns of everything on the other side.
        let Some(mover) = mover else {
            return;
        };
        let mut seen = HashSet::new();
        for subzone in subzones {
            for (kind, id) in subzone
                .all_entities()
                .into_iter()
                .flat_map(|(kind, ids)| ids.into_iter().map(move |id| (kind, id)))
            {
                if (kind == EntityKind::User && id == mover) || !seen.insert((kind, id)) {
                    continue;
                }
                let Some(model) = self.models.get(kind) else {
                    continue;
                };
                let Some(other) = self.world.entity_ref(kind, id) else {
                    continue;
                };
                out.push((
                    mover,
                    SyncItem::new(
                        op,
                        model.kind.model_name(),
                        serde_json::Value::Object(Self::full_payload(&other, model)),
                    ),
                ));
            }
        }
    }

    /// Builds per-receiver payloads for the given fields (all declared
    /// fields when `None`), canonically keyed so distinct receivers are
    /// never merged.
    fn build_groups(
        &self,
        entity: &EntityRef,
        model: &SyncModel,
        fields: Option<&[&'static str]>,
    ) -> Vec<ReceiverGroup> {
        let mut groups: Vec<ReceiverGroup> = Vec::new();
        for (name, entries) in &model.fields {
            if fields.is_some_and(|wanted| !wanted.contains(name)) {
                continue;
            }
            let raw = entity.sync_field(name);
            for entry in entries {
                let mut value = raw.clone().unwrap_or(serde_json::Value::Null);
                if value.is_null() {
                    if let Some(default) = &entry.default {
                        value = default.clone();
                    }
                }
                if let Some(map) = &entry.map {
                    value = map.apply(value);
                }

                let slot = groups
                    .iter()
                    .position(|group| group.receiver.same(&entry.receiver))
                    .unwrap_or_else(|| {
                        let mut payload = serde_json::Map::new();
                        payload.insert("id".to_string(), serde_json::json!(entity.id()));
                        groups.push(ReceiverGroup {
                            receiver: entry.receiver,
                            payload,
                            all_lazy: true,
                        });
                        groups.len() - 1
                    });
                let group = &mut groups[slot];
                group.payload.insert(entry.rename.unwrap_or(name).to_string(), value);
                group.all_lazy &= entry.lazy;
            }
        }
        groups
    }

    /// All declared properties of an entity as one payload, used for swap
    /// and first-load Creates directed at a single user. Per-field rename,
    /// map, and default follow the field's first declaration.
    fn full_payload(
        entity: &EntityRef,
        model: &SyncModel,
    ) -> serde_json::Map<String, serde_json::Value> {
        let mut payload = serde_json::Map::new();
        payload.insert("id".to_string(), serde_json::json!(entity.id()));
        for (name, entries) in &model.fields {
            let Some(entry) = entries.first() else {
                continue;
            };
            let mut value = entity.sync_field(name).unwrap_or(serde_json::Value::Null);
            if value.is_null() {
                if let Some(default) = &entry.default {
                    value = default.clone();
                }
            }
            if let Some(map) = &entry.map {
                value = map.apply(value);
            }
            payload.insert(entry.rename.unwrap_or(name).to_string(), value);
        }
        payload
    }

    /// Resolves a receiver to user ids. `zone_users` carries the caller's
    /// precomputed audience for `Zone` receivers (current window, or the
    /// remaining subzones during a transition).
    async fn resolve_receiver(
        &self,
        receiver: Receiver,
        entity: &EntityRef,
        zone_users: Option<&[EntityId]>,
    ) -> Vec<EntityId> {
        match receiver {
            Receiver::SelfUser => entity.as_user_id().into_iter().collect(),
            Receiver::Zone => zone_users.map(<[EntityId]>::to_vec).unwrap_or_default(),
            Receiver::UserByField(field) => entity.ref_key(field).into_iter().collect(),
            Receiver::Spatial { location, position } => {
                match (entity.ref_key(location), entity.vec2_field(position)) {
                    (Some(location), Some(position)) => {
                        self.users_around(location, &[position])
                    }
                    // The referenced pair is unset; nobody to notify.
                    _ => Vec::new(),
                }
            }
            Receiver::Area(factory) => {
                let Some(params) = entity.area_params() else {
                    warn!(kind = ?entity.kind(), "area receiver without area params");
                    return Vec::new();
                };
                match factory(&params) {
                    Ok(mut area) => match area.load(&self.atlas).await {
                        Ok(()) => area.user_ids(),
                        Err(err) => {
                            error!(error = %err, "area load failed");
                            Vec::new()
                        }
                    },
                    Err(err) => {
                        // Configuration error: the declaration and the
                        // entity's parameters disagree.
                        error!(error = %err, kind = ?entity.kind(), "area constructor rejected params");
                        Vec::new()
                    }
                }
            }
        }
    }

    /// Users in the zone windows around the given cells, consulting only
    /// already loaded subzones (a subzone containing an online user is
    /// always loaded).
    fn users_around(&self, location: EntityId, cells: &[Vec2]) -> Vec<EntityId> {
        let mut centers = HashSet::new();
        for cell in cells {
            centers.insert(self.atlas.zone_position(*cell));
        }
        let mut seen_subzones = HashSet::new();
        let mut seen_users = HashSet::new();
        let mut users = Vec::new();
        for center in centers {
            for zone_position in Zone::window(center) {
                if !seen_subzones.insert(zone_position) {
                    continue;
                }
                let subzone = self.atlas.subzone(location, zone_position);
                if !subzone.is_loaded() {
                    continue;
                }
                for user in subzone.entities_of(EntityKind::User) {
                    if seen_users.insert(user) {
                        users.push(user);
                    }
                }
            }
        }
        users
    }
}

struct MoveResult {
    zone_changed: bool,
    remaining_users: Option<Vec<EntityId>>,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tilemud_core::FieldValue;

    use super::*;
    use crate::cache::Cache;
    use crate::storage::Gateway;
    use crate::world::entity::{Ref, Shared, Stored};
    use crate::world::{ChangeTracker, Message, User};

    #[derive(Default)]
    struct CapturingOutbox {
        sent: Mutex<Vec<(SocketId, Envelope)>>,
    }

    impl Outbox for CapturingOutbox {
        fn send(&self, socket: SocketId, envelope: &Envelope) {
            self.sent.lock().push((socket, envelope.clone()));
        }
    }

    impl CapturingOutbox {
        /// All sync items delivered to a socket, flattened across ticks.
        fn items_for(&self, socket: SocketId) -> Vec<serde_json::Value> {
            self.sent
                .lock()
                .iter()
                .filter(|(s, _)| *s == socket)
                .flat_map(|(_, env)| {
                    env.data["syncs"].as_array().cloned().unwrap_or_default()
                })
                .collect()
        }
    }

    struct Fixture {
        world: Arc<World>,
        atlas: Atlas,
        sessions: Arc<SessionIndex>,
        outbox: Arc<CapturingOutbox>,
        sync: Synchronizer,
    }

    fn fixture() -> Fixture {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/tilemud_test")
            .expect("lazy pool");
        let world = Arc::new(World::new(
            Arc::new(Cache::new(Duration::from_secs(60))),
            Gateway::from_pool(pool),
            Arc::new(ChangeTracker::new()),
        ));
        let atlas = Atlas::new(Arc::clone(&world), Vec2::new(16, 32));
        let sessions = Arc::new(SessionIndex::new());
        let outbox = Arc::new(CapturingOutbox::default());
        let sync = Synchronizer::new(
            Arc::clone(&world),
            atlas.clone(),
            Arc::new(SyncModels::standard().expect("models")),
            Arc::clone(&sessions),
            Arc::clone(&outbox) as Arc<dyn Outbox>,
        );
        Fixture { world, atlas, sessions, outbox, sync }
    }

    /// Marks every subzone in the windows around `centers` as loaded, so
    /// zone assembly never touches storage.
    fn preload(atlas: &Atlas, location: EntityId, centers: &[Vec2]) {
        for center in centers {
            for zp in Zone::window(*center) {
                let subzone = atlas.subzone(location, zp);
                if !subzone.is_loaded() {
                    subzone.mark_loaded();
                }
            }
        }
    }

    /// Creates an online user standing on the map, with zone membership
    /// and a session socket.
    fn spawn_user(
        f: &Fixture,
        id: EntityId,
        socket: SocketId,
        location: EntityId,
        position: Vec2,
    ) -> Shared<User> {
        let handle = f.world.stub_handle::<User>(id);
        {
            let mut user = handle.write();
            user.meta_mut().initialized = true;
            user.name = format!("user{id}");
            user.account = Ref::Unresolved(id);
            user.location = Ref::Unresolved(location);
            user.set_position_untracked(position);
        }
        let subzone = f.atlas.subzone(location, f.atlas.zone_position(position));
        assert!(subzone.is_loaded(), "preload the window first");
        subzone.enter(EntityKind::User, id, &[position], true);
        f.sessions.log_in_user(socket, id);
        handle
    }

    #[tokio::test]
    async fn movement_syncs_to_zone_observers() {
        let f = fixture();
        preload(&f.atlas, 1, &[Vec2::ZERO]);
        let mover = spawn_user(&f, 1, SocketId(10), 1, Vec2::new(5, 5));
        let _observer = spawn_user(&f, 2, SocketId(20), 1, Vec2::new(8, 8));

        mover.write().set_position(f.world.tracker(), Vec2::new(6, 7));
        f.sync.tick().await.expect("tick");

        let items = f.outbox.items_for(SocketId(20));
        assert_eq!(items.len(), 1);
        assert_eq!(
            items[0],
            serde_json::json!(["update", "user", {"id": 1, "position": {"x": 6, "y": 7}}])
        );

        // The mover sees its own update through the Self receiver too.
        let own = f.outbox.items_for(SocketId(10));
        assert!(!own.is_empty());
        assert!(own.iter().all(|item| item[2]["id"] == 1));
    }

    #[tokio::test]
    async fn no_tick_means_no_send() {
        let f = fixture();
        f.sync.tick().await.expect("tick");
        assert!(f.outbox.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn lazy_only_update_is_suppressed() {
        let f = fixture();
        preload(&f.atlas, 1, &[Vec2::ZERO]);
        let _mover = spawn_user(&f, 1, SocketId(10), 1, Vec2::new(5, 5));
        let _observer = spawn_user(&f, 2, SocketId(20), 1, Vec2::new(8, 8));

        // "name" is declared lazy for the zone; a name-only change emits
        // nothing.
        f.world
            .tracker()
            .update(EntityKind::User, 1, "name", FieldValue::Str("old".into()));
        f.sync.tick().await.expect("tick");
        assert!(f.outbox.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn zone_transition_swaps_delete_before_create() {
        let f = fixture();
        // Windows around the old and new centers, wide enough for both
        // observers.
        preload(
            &f.atlas,
            1,
            &[Vec2::ZERO, Vec2::new(1, 0), Vec2::new(-1, 0), Vec2::new(2, 0)],
        );
        let mover = spawn_user(&f, 1, SocketId(10), 1, Vec2::new(15, 5));
        // In the old window only (zone position -1).
        let _behind = spawn_user(&f, 2, SocketId(20), 1, Vec2::new(-10, 5));
        // In the new window only (zone position 2).
        let _ahead = spawn_user(&f, 3, SocketId(30), 1, Vec2::new(34, 5));

        mover.write().set_position(f.world.tracker(), Vec2::new(16, 5));
        f.sync.tick().await.expect("tick");

        // The mover's batch deletes the left side before creating the
        // joined side.
        let own = f.outbox.items_for(SocketId(10));
        let delete_behind = own
            .iter()
            .position(|i| i[0] == "delete" && i[2]["id"] == 2)
            .expect("delete for user 2");
        let create_ahead = own
            .iter()
            .position(|i| i[0] == "create" && i[2]["id"] == 3)
            .expect("create for user 3");
        assert!(delete_behind < create_ahead);

        // Observers on each side see the mover appear/disappear.
        let behind = f.outbox.items_for(SocketId(20));
        assert!(behind.iter().any(|i| i[0] == "delete" && i[2]["id"] == 1));
        assert!(!behind.iter().any(|i| i[0] == "create" && i[2]["id"] == 1));

        let ahead = f.outbox.items_for(SocketId(30));
        assert!(ahead.iter().any(|i| i[0] == "create" && i[2]["id"] == 1));

        // Membership moved between subzones.
        let old_subzone = f.atlas.subzone(1, Vec2::ZERO);
        let new_subzone = f.atlas.subzone(1, Vec2::new(1, 0));
        assert!(!old_subzone.contains_entity(EntityKind::User, 1));
        assert!(new_subzone.contains_entity(EntityKind::User, 1));
    }

    #[tokio::test]
    async fn message_create_reaches_disk_audience_only() {
        let f = fixture();
        preload(&f.atlas, 1, &[Vec2::ZERO]);
        let speaker = spawn_user(&f, 1, SocketId(10), 1, Vec2::new(5, 5));
        // Distance 15: inside the 30-tile hearing radius.
        let _near = spawn_user(&f, 2, SocketId(20), 1, Vec2::new(20, 5));
        // Corner of the window, staggered distance ≈ 31.9: out of range.
        let _far = spawn_user(&f, 3, SocketId(30), 1, Vec2::new(31, -32));

        let mut message = Message::stub(0);
        message.meta_mut().initialized = true;
        message.text = "hi".into();
        message.user = Ref::resolved(speaker);
        message.location = Ref::Unresolved(1);
        message.position = Vec2::new(5, 5);
        message.delete_in = Message::DEFAULT_DELETE_IN_MS;
        message.created_at = 1_700_000_000_000;
        let handle = f.world.create(message);
        // Normally the DB flush adopts the key before the sync tick runs.
        handle.write().meta_mut().id = 99;

        f.sync.tick().await.expect("tick");

        let near = f.outbox.items_for(SocketId(20));
        assert_eq!(near.len(), 1);
        assert_eq!(
            near[0],
            serde_json::json!(["create", "message", {
                "id": 99,
                "text": "hi",
                "user": "user1",
                "delete_in": 300_000,
                "position": {"x": 5, "y": 5},
            }])
        );
        assert!(f.outbox.items_for(SocketId(30)).is_empty());
    }

    #[tokio::test]
    async fn first_load_queues_zone_creates_for_the_user() {
        let f = fixture();
        preload(&f.atlas, 1, &[Vec2::ZERO]);
        let _other = spawn_user(&f, 2, SocketId(20), 1, Vec2::new(8, 8));
        let user = spawn_user(&f, 1, SocketId(10), 1, Vec2::new(5, 5));

        let user_ref = User::wrap(user);
        f.sync.first_load(&user_ref).await.expect("first load");
        f.sync.tick().await.expect("tick");

        let items = f.outbox.items_for(SocketId(10));
        assert!(items
            .iter()
            .any(|i| i[0] == "create" && i[1] == "user" && i[2]["id"] == 2));
        // No create of the user to itself from first_load.
        assert!(!items.iter().any(|i| i[0] == "create" && i[2]["id"] == 1));
    }

    #[tokio::test]
    async fn announce_create_reaches_observers_and_self() {
        let f = fixture();
        preload(&f.atlas, 1, &[Vec2::ZERO]);
        let _observer = spawn_user(&f, 2, SocketId(20), 1, Vec2::new(8, 8));

        // The signing-in user is cached and positioned but not yet a
        // member of any subzone.
        let handle = f.world.stub_handle::<User>(1);
        {
            let mut user = handle.write();
            user.meta_mut().initialized = true;
            user.name = "user1".into();
            user.location = Ref::Unresolved(1);
            user.set_position_untracked(Vec2::new(5, 5));
        }
        f.sessions.log_in_user(SocketId(10), 1);

        let user_ref = User::wrap(handle);
        f.sync.announce(&user_ref, SyncOp::Create).await;
        f.sync.tick().await.expect("tick");

        let observer = f.outbox.items_for(SocketId(20));
        assert!(observer
            .iter()
            .any(|i| i[0] == "create" && i[1] == "user" && i[2]["id"] == 1));

        // Membership applied: the user is now visible in its subzone.
        let subzone = f.atlas.subzone(1, Vec2::ZERO);
        assert!(subzone.contains_entity(EntityKind::User, 1));

        // The Self receiver delivers the user's own create.
        let own = f.outbox.items_for(SocketId(10));
        assert!(own.iter().any(|i| i[0] == "create" && i[2]["id"] == 1));
    }
}
