//! Payloads for movement and state synchronization events.

use serde::{Deserialize, Serialize};

use crate::types::SyncOp;
use crate::vec2::Vec2;

/// `move` request data: a unit direction plus the run flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    pub direction: Vec2,
    #[serde(default)]
    pub run: bool,
}

/// One sync emission: `[op, model, payload]`.
///
/// Serialized as a three-element array, matching the client's decoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncItem(pub SyncOp, pub String, pub serde_json::Value);

impl SyncItem {
    #[must_use]
    pub fn new(op: SyncOp, model: &str, payload: serde_json::Value) -> Self {
        Self(op, model.to_string(), payload)
    }

    #[must_use]
    pub fn op(&self) -> SyncOp {
        self.0
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.1
    }

    #[must_use]
    pub fn payload(&self) -> &serde_json::Value {
        &self.2
    }
}

/// `sync` event data: every emission for one user in one tick, in order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SyncBatch {
    pub syncs: Vec<SyncItem>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_defaults_run_to_false() {
        let m: Move = serde_json::from_str(r#"{"direction":{"x":1,"y":0}}"#).expect("deserialize");
        assert_eq!(m.direction, Vec2::new(1, 0));
        assert!(!m.run);
    }

    #[test]
    fn sync_item_serializes_as_tuple() {
        let item = SyncItem::new(
            SyncOp::Update,
            "user",
            serde_json::json!({"id": 1, "position": {"x": 6, "y": 7}}),
        );
        let json = serde_json::to_string(&item).expect("serialize");
        assert_eq!(json, r#"["update","user",{"id":1,"position":{"x":6,"y":7}}]"#);
    }

    #[test]
    fn sync_batch_roundtrip() {
        let batch = SyncBatch {
            syncs: vec![
                SyncItem::new(SyncOp::Delete, "item", serde_json::json!({"id": 2})),
                SyncItem::new(SyncOp::Create, "user", serde_json::json!({"id": 1})),
            ],
        };
        let json = serde_json::to_string(&batch).expect("serialize");
        let back: SyncBatch = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, batch);
        // Order is load-bearing: deletes for left subzones precede creates.
        assert_eq!(back.syncs[0].op(), SyncOp::Delete);
    }
}
