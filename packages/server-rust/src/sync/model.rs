//! Sync model registry: which properties sync, to whom, and how.
//!
//! Each persistent class that clients can observe registers one
//! [`SyncModel`]: an ordered list of `{receiver, rename, map, default,
//! lazy}` entries per property. The process-wide [`SyncModels`] registry is
//! populated once at startup; inconsistent declarations (two entries on
//! one property with the same receiver) are fatal there, never at emit
//! time.

use std::collections::HashMap;

use tilemud_core::EntityKind;

use crate::map::area::AreaFactory;

/// Who receives a property's sync emissions.
#[derive(Clone, Copy)]
pub enum Receiver {
    /// The entity itself, when it is a user with an open session.
    SelfUser,
    /// Every user whose zone window covers the entity's position(s).
    Zone,
    /// The user whose id is stored in the named reference field.
    UserByField(&'static str),
    /// Spatial like `Zone`, but against explicitly named fields.
    Spatial {
        location: &'static str,
        position: &'static str,
    },
    /// A user-defined shape built from the entity's area parameters.
    Area(AreaFactory),
}

impl Receiver {
    /// Receiver identity: two entries on one property may not share a
    /// receiver, and the synchronizer groups payloads by it.
    #[must_use]
    pub(crate) fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::SelfUser, Self::SelfUser) | (Self::Zone, Self::Zone) => true,
            (Self::UserByField(a), Self::UserByField(b)) => a == b,
            (
                Self::Spatial { location: al, position: ap },
                Self::Spatial { location: bl, position: bp },
            ) => al == bl && ap == bp,
            (Self::Area(a), Self::Area(b)) => std::ptr::fn_addr_eq(*a, *b),
            _ => false,
        }
    }
}

impl std::fmt::Debug for Receiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SelfUser => write!(f, "Self"),
            Self::Zone => write!(f, "Zone"),
            Self::UserByField(field) => write!(f, "UserByField({field})"),
            Self::Spatial { location, position } => {
                write!(f, "Spatial({location}, {position})")
            }
            Self::Area(_) => write!(f, "Area(..)"),
        }
    }
}

/// Value transform applied before emission.
#[derive(Clone, Copy)]
pub enum MapFn {
    /// Project a dotted path out of the value (`"a.b.c"`).
    Path(&'static str),
    /// Project a subset of an object's keys.
    Fields(&'static [&'static str]),
    /// Arbitrary transform.
    Func(fn(serde_json::Value) -> serde_json::Value),
}

impl MapFn {
    /// Applies the transform. Paths and projections of non-objects yield
    /// `null`.
    #[must_use]
    pub fn apply(&self, value: serde_json::Value) -> serde_json::Value {
        match self {
            Self::Path(path) => {
                let mut current = value;
                for segment in path.split('.') {
                    match current {
                        serde_json::Value::Object(mut object) => {
                            current = object.remove(segment).unwrap_or(serde_json::Value::Null);
                        }
                        _ => return serde_json::Value::Null,
                    }
                }
                current
            }
            Self::Fields(fields) => match value {
                serde_json::Value::Object(mut object) => {
                    let mut projected = serde_json::Map::new();
                    for field in *fields {
                        if let Some(v) = object.remove(*field) {
                            projected.insert((*field).to_string(), v);
                        }
                    }
                    serde_json::Value::Object(projected)
                }
                _ => serde_json::Value::Null,
            },
            Self::Func(f) => f(value),
        }
    }
}

/// One sync declaration for one property.
#[derive(Clone)]
pub struct SyncEntry {
    pub receiver: Receiver,
    /// Rename the property in the emitted payload.
    pub rename: Option<&'static str>,
    pub map: Option<MapFn>,
    /// Fallback when the source value is null or undefined.
    pub default: Option<serde_json::Value>,
    /// Emit only when a non-lazy field also changed or the zone changed.
    pub lazy: bool,
}

impl SyncEntry {
    #[must_use]
    pub fn to(receiver: Receiver) -> Self {
        Self {
            receiver,
            rename: None,
            map: None,
            default: None,
            lazy: false,
        }
    }

    #[must_use]
    pub fn renamed(mut self, name: &'static str) -> Self {
        self.rename = Some(name);
        self
    }

    #[must_use]
    pub fn mapped(mut self, map: MapFn) -> Self {
        self.map = Some(map);
        self
    }

    #[must_use]
    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }

    #[must_use]
    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }
}

/// Sync declarations of one class: ordered `(property, entries)` pairs.
#[derive(Clone)]
pub struct SyncModel {
    pub kind: EntityKind,
    pub fields: Vec<(&'static str, Vec<SyncEntry>)>,
}

impl SyncModel {
    #[must_use]
    pub fn new(kind: EntityKind) -> Self {
        Self { kind, fields: Vec::new() }
    }

    #[must_use]
    pub fn field(mut self, name: &'static str, entries: Vec<SyncEntry>) -> Self {
        self.fields.push((name, entries));
        self
    }

    /// Declared property names, in declaration order.
    #[must_use]
    pub fn field_names(&self) -> Vec<&'static str> {
        self.fields.iter().map(|(name, _)| *name).collect()
    }

    #[must_use]
    pub fn entries(&self, field: &str) -> Option<&[SyncEntry]> {
        self.fields
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, entries)| entries.as_slice())
    }
}

/// Sync declaration errors. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("duplicate receiver {receiver:?} on {kind:?}.{field}")]
    DuplicateReceiver {
        kind: EntityKind,
        field: &'static str,
        receiver: String,
    },
    #[error("model for {kind:?} registered twice")]
    DuplicateModel { kind: EntityKind },
}

/// Process-wide class → model mapping.
#[derive(Default)]
pub struct SyncModels {
    models: HashMap<EntityKind, SyncModel>,
}

impl SyncModels {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a class's model, validating its declarations.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::DuplicateReceiver`] when two entries on one
    /// property share a receiver, [`ModelError::DuplicateModel`] when the
    /// class is registered twice.
    pub fn register(&mut self, model: SyncModel) -> Result<(), ModelError> {
        for (field, entries) in &model.fields {
            for (i, a) in entries.iter().enumerate() {
                if entries[..i].iter().any(|b| a.receiver.same(&b.receiver)) {
                    return Err(ModelError::DuplicateReceiver {
                        kind: model.kind,
                        field,
                        receiver: format!("{:?}", a.receiver),
                    });
                }
            }
        }
        let kind = model.kind;
        if self.models.insert(kind, model).is_some() {
            return Err(ModelError::DuplicateModel { kind });
        }
        Ok(())
    }

    /// The model of a class, when it has one. Classes without a model are
    /// invisible to clients; their change sets are silently ignored.
    #[must_use]
    pub fn get(&self, kind: EntityKind) -> Option<&SyncModel> {
        self.models.get(&kind)
    }

    /// The standard declarations of this server's observable classes.
    ///
    /// # Errors
    ///
    /// Propagates validation failures, which are configuration bugs.
    pub fn standard() -> Result<Self, ModelError> {
        use crate::map::Disk;

        let mut models = Self::new();
        models.register(
            SyncModel::new(EntityKind::User)
                .field("position", vec![
                    SyncEntry::to(Receiver::Zone),
                    SyncEntry::to(Receiver::SelfUser),
                ])
                .field("name", vec![SyncEntry::to(Receiver::Zone).lazy()]),
        )?;
        models.register(
            SyncModel::new(EntityKind::Item)
                .field("position", vec![SyncEntry::to(Receiver::Zone)])
                .field("name", vec![SyncEntry::to(Receiver::Zone).lazy()]),
        )?;
        models.register(
            SyncModel::new(EntityKind::Message)
                .field("text", vec![SyncEntry::to(Receiver::Area(Disk::from_params))])
                .field("user", vec![
                    SyncEntry::to(Receiver::Area(Disk::from_params))
                        .mapped(MapFn::Path("name"))
                        .with_default(serde_json::json!("")),
                ])
                .field("delete_in", vec![SyncEntry::to(Receiver::Area(Disk::from_params))])
                .field("position", vec![
                    SyncEntry::to(Receiver::Area(Disk::from_params)).lazy(),
                ]),
        )?;
        Ok(models)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_models_validate() {
        let models = SyncModels::standard().expect("standard models are consistent");
        assert!(models.get(EntityKind::User).is_some());
        assert!(models.get(EntityKind::Message).is_some());
        // Tiles and accounts are never synced.
        assert!(models.get(EntityKind::Tile).is_none());
        assert!(models.get(EntityKind::Account).is_none());
    }

    #[test]
    fn duplicate_receiver_is_rejected() {
        let mut models = SyncModels::new();
        let err = models
            .register(SyncModel::new(EntityKind::User).field(
                "position",
                vec![SyncEntry::to(Receiver::Zone), SyncEntry::to(Receiver::Zone)],
            ))
            .expect_err("duplicate receiver");
        assert!(matches!(err, ModelError::DuplicateReceiver { field: "position", .. }));
    }

    #[test]
    fn distinct_receivers_on_one_field_are_fine() {
        let mut models = SyncModels::new();
        models
            .register(SyncModel::new(EntityKind::User).field(
                "position",
                vec![
                    SyncEntry::to(Receiver::Zone),
                    SyncEntry::to(Receiver::SelfUser),
                    SyncEntry::to(Receiver::UserByField("owner")),
                ],
            ))
            .expect("distinct receivers");
    }

    #[test]
    fn duplicate_model_is_rejected() {
        let mut models = SyncModels::new();
        models.register(SyncModel::new(EntityKind::User)).expect("first");
        assert!(matches!(
            models.register(SyncModel::new(EntityKind::User)),
            Err(ModelError::DuplicateModel { .. })
        ));
    }

    #[test]
    fn map_path_projects_nested_values() {
        let value = serde_json::json!({"id": 5, "name": "Luka"});
        assert_eq!(MapFn::Path("name").apply(value), serde_json::json!("Luka"));
        assert_eq!(
            MapFn::Path("a.b").apply(serde_json::json!({"a": {"b": 3}})),
            serde_json::json!(3)
        );
        assert_eq!(MapFn::Path("missing").apply(serde_json::json!({})), serde_json::Value::Null);
        assert_eq!(MapFn::Path("x").apply(serde_json::json!(7)), serde_json::Value::Null);
    }

    #[test]
    fn map_fields_projects_subset() {
        let value = serde_json::json!({"id": 5, "name": "Luka", "secret": true});
        assert_eq!(
            MapFn::Fields(&["id", "name"]).apply(value),
            serde_json::json!({"id": 5, "name": "Luka"})
        );
    }

    #[test]
    fn map_func_applies() {
        fn double(v: serde_json::Value) -> serde_json::Value {
            serde_json::json!(v.as_i64().unwrap_or(0) * 2)
        }
        assert_eq!(MapFn::Func(double).apply(serde_json::json!(21)), serde_json::json!(42));
    }

    #[test]
    fn spatial_receivers_with_different_fields_are_distinct() {
        let a = Receiver::Spatial { location: "location", position: "position" };
        let b = Receiver::Spatial { location: "target_location", position: "target" };
        assert!(!a.same(&b));
        assert!(a.same(&Receiver::Spatial { location: "location", position: "position" }));
    }
}
