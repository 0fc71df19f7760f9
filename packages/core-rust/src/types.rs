//! Shared identifier and value types used across the engine and the wire.

use serde::{Deserialize, Serialize};

use crate::vec2::Vec2;

/// Primary key of a persistent entity. Zero means "not yet saved".
pub type EntityId = i64;

/// Discriminant for the persistent entity classes.
///
/// Tables, cache paths, and sync model names all derive from this enum, so
/// adding a class means adding a variant here and wiring it in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Account,
    User,
    Location,
    Tile,
    Item,
    Message,
}

impl EntityKind {
    /// Snake-cased model name, used as the second element of a sync tuple
    /// and as the cache path segment (`"user/42"`).
    #[must_use]
    pub const fn model_name(self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::User => "user",
            Self::Location => "location",
            Self::Tile => "tile",
            Self::Item => "item",
            Self::Message => "message",
        }
    }

    /// Table name in the relational store.
    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::Account => "accounts",
            Self::User => "users",
            Self::Location => "locations",
            Self::Tile => "tiles",
            Self::Item => "items",
            Self::Message => "messages",
        }
    }
}

/// Kind of change carried by a sync event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOp {
    Create,
    Update,
    Delete,
}

/// Snapshot of a single property value, recorded by the change tracker as
/// the pre-change (`original`) value of an updated field.
///
/// The synchronizer needs typed originals (not JSON) to recover the
/// previous zone of an entity that moved.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Vec2(Vec2),
}

impl FieldValue {
    /// The value as JSON, for payload assembly.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Value::from(*f),
            Self::Str(s) => serde_json::Value::from(s.clone()),
            Self::Vec2(v) => serde_json::json!({ "x": v.x, "y": v.y }),
        }
    }

    /// The value as an entity id, if it is one.
    #[must_use]
    pub fn as_id(&self) -> Option<EntityId> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// The value as a position, if it is one.
    #[must_use]
    pub fn as_vec2(&self) -> Option<Vec2> {
        match self {
            Self::Vec2(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<Vec2> for FieldValue {
    fn from(v: Vec2) -> Self {
        Self::Vec2(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_names_are_snake_case_singular() {
        assert_eq!(EntityKind::User.model_name(), "user");
        assert_eq!(EntityKind::Message.model_name(), "message");
    }

    #[test]
    fn tables_are_snake_case_plural() {
        assert_eq!(EntityKind::User.table(), "users");
        assert_eq!(EntityKind::Item.table(), "items");
    }

    #[test]
    fn sync_op_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&SyncOp::Create).unwrap(), r#""create""#);
        assert_eq!(serde_json::to_string(&SyncOp::Delete).unwrap(), r#""delete""#);
    }

    #[test]
    fn field_value_to_json() {
        assert_eq!(FieldValue::Int(5).to_json(), serde_json::json!(5));
        assert_eq!(
            FieldValue::Vec2(Vec2::new(6, 7)).to_json(),
            serde_json::json!({"x": 6, "y": 7})
        );
        assert_eq!(FieldValue::Null.to_json(), serde_json::Value::Null);
    }

    #[test]
    fn field_value_typed_accessors() {
        assert_eq!(FieldValue::Int(9).as_id(), Some(9));
        assert_eq!(FieldValue::Str("x".into()).as_id(), None);
        assert_eq!(FieldValue::Vec2(Vec2::ZERO).as_vec2(), Some(Vec2::ZERO));
        assert_eq!(FieldValue::Bool(true).as_vec2(), None);
    }
}
