//! Account: the authentication root. Never synced to clients.

use sqlx::postgres::PgRow;
use tilemud_core::EntityKind;

use crate::storage::{SqlParam, StorageError};
use crate::world::entities::{col, EntityRef};
use crate::world::entity::{EntityMeta, Shared, Stored};

#[derive(Debug, Default)]
pub struct Account {
    meta: EntityMeta,
    pub name: String,
    pub mail: String,
    /// Hex sha-256 of salt + password.
    pub pass_hash: String,
    pub salt: String,
    /// 96-hex-char persistent sign-in token.
    pub token: String,
}

impl Stored for Account {
    const KIND: EntityKind = EntityKind::Account;

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
        self.name = col(row, "name")?;
        self.mail = col(row, "mail")?;
        self.pass_hash = col(row, "pass_hash")?;
        self.salt = col(row, "salt")?;
        self.token = col(row, "token")?;
        self.meta.initialized = true;
        Ok(())
    }

    fn insert_columns(&self) -> Vec<(String, SqlParam)> {
        vec![
            ("name".into(), self.name.as_str().into()),
            ("mail".into(), self.mail.as_str().into()),
            ("pass_hash".into(), self.pass_hash.as_str().into()),
            ("salt".into(), self.salt.as_str().into()),
            ("token".into(), self.token.as_str().into()),
        ]
    }

    fn columns_for_field(&self, field: &str) -> Vec<(String, SqlParam)> {
        match field {
            "name" => vec![("name".into(), self.name.as_str().into())],
            "mail" => vec![("mail".into(), self.mail.as_str().into())],
            "pass_hash" => vec![("pass_hash".into(), self.pass_hash.as_str().into())],
            "token" => vec![("token".into(), self.token.as_str().into())],
            _ => Vec::new(),
        }
    }

    fn wrap(handle: Shared<Self>) -> EntityRef {
        EntityRef::Account(handle)
    }
}
