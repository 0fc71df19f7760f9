//! Message: a chat line anchored at the speaking user's position.
//!
//! Messages sync through a hearing-radius disk and expire after
//! `delete_in` milliseconds, measured against the persisted creation time
//! so expiry survives a server restart.

use sqlx::postgres::PgRow;
use tilemud_core::{EntityKind, Vec2};

use crate::storage::{SqlParam, StorageError};
use crate::world::entities::{col, EntityRef, Location, User};
use crate::world::entity::{AreaParams, EntityMeta, Ref, Shared, Stored};

#[derive(Debug, Default)]
pub struct Message {
    meta: EntityMeta,
    pub text: String,
    pub user: Ref<User>,
    pub location: Ref<Location>,
    pub position: Vec2,
    /// Lifetime in milliseconds from `created_at`.
    pub delete_in: i64,
    /// Creation wall-clock time, milliseconds since the Unix epoch.
    pub created_at: i64,
}

impl Message {
    /// Hearing radius of chat, in tiles (staggered metric).
    pub const HEARING_RADIUS: f64 = 30.0;

    /// Default lifetime: five minutes.
    pub const DEFAULT_DELETE_IN_MS: i64 = 300_000;

    #[must_use]
    pub fn expires_at(&self) -> i64 {
        self.created_at + self.delete_in
    }

    #[must_use]
    pub fn area_params(&self) -> Option<AreaParams> {
        Some(AreaParams {
            location: self.location.key()?,
            center: self.position,
            extra: vec![Self::HEARING_RADIUS],
        })
    }

    #[must_use]
    pub fn sync_field(&self, field: &str) -> Option<serde_json::Value> {
        match field {
            "id" => Some(serde_json::json!(self.meta.id)),
            "text" => Some(serde_json::json!(self.text)),
            "position" => Some(serde_json::json!({"x": self.position.x, "y": self.position.y})),
            "delete_in" => Some(serde_json::json!(self.delete_in)),
            // The user reference embeds as an object so a sync mapping can
            // project sub-fields (the chat model sends just the name).
            "user" => Some(match self.user.get() {
                Some(user) => {
                    let user = user.read();
                    serde_json::json!({"id": user.id(), "name": user.name})
                }
                None => match self.user.key() {
                    Some(id) => serde_json::json!({"id": id}),
                    None => serde_json::Value::Null,
                },
            }),
            _ => None,
        }
    }
}

impl Stored for Message {
    const KIND: EntityKind = EntityKind::Message;

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }

    fn stub(id: i64) -> Self {
        Self {
            meta: EntityMeta::stub(id),
            ..Self::default()
        }
    }

    fn hydrate(&mut self, row: &PgRow) -> Result<(), StorageError> {
        self.meta.id = col(row, "id")?;
        self.text = col(row, "text")?;
        self.user.adopt(col::<Option<i64>>(row, "user_id")?);
        self.location.adopt(col::<Option<i64>>(row, "location_id")?);
        self.position = Vec2::new(col(row, "x")?, col(row, "y")?);
        self.delete_in = col(row, "delete_in")?;
        self.created_at = col(row, "created_at")?;
        self.meta.initialized = true;
        Ok(())
    }

    fn insert_columns(&self) -> Vec<(String, SqlParam)> {
        let mut columns = vec![
            ("text".into(), self.text.as_str().into()),
            super::ref_column("user", self.user.key()),
            super::ref_column("location", self.location.key()),
        ];
        columns.extend(super::vec2_columns("position", self.position));
        columns.push(("delete_in".into(), SqlParam::I64(self.delete_in)));
        columns.push(("created_at".into(), SqlParam::I64(self.created_at)));
        columns
    }

    fn columns_for_field(&self, field: &str) -> Vec<(String, SqlParam)> {
        match field {
            "text" => vec![("text".into(), self.text.as_str().into())],
            "position" => super::vec2_columns("position", self.position).into(),
            "delete_in" => vec![("delete_in".into(), SqlParam::I64(self.delete_in))],
            _ => Vec::new(),
        }
    }

    fn wrap(handle: Shared<Self>) -> EntityRef {
        EntityRef::Message(handle)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::RwLock;

    use super::*;

    #[test]
    fn expiry_is_creation_plus_lifetime() {
        let mut message = Message::stub(1);
        message.created_at = 1_000;
        message.delete_in = 300_000;
        assert_eq!(message.expires_at(), 301_000);
    }

    #[test]
    fn area_params_require_a_location() {
        let mut message = Message::stub(1);
        assert!(message.area_params().is_none());

        message.location = Ref::Unresolved(3);
        let params = message.area_params().expect("params");
        assert_eq!(params.location, 3);
        assert_eq!(params.extra, vec![Message::HEARING_RADIUS]);
    }

    #[test]
    fn user_field_embeds_resolved_user() {
        let mut user = User::stub(5);
        user.meta_mut().initialized = true;
        user.name = "Luka".into();
        let mut message = Message::stub(1);
        message.user = Ref::resolved(Arc::new(RwLock::new(user)));

        assert_eq!(
            message.sync_field("user"),
            Some(serde_json::json!({"id": 5, "name": "Luka"}))
        );
    }

    #[test]
    fn user_field_degrades_to_key_when_unresolved() {
        let mut message = Message::stub(1);
        message.user = Ref::Unresolved(5);
        assert_eq!(message.sync_field("user"), Some(serde_json::json!({"id": 5})));
    }
}
