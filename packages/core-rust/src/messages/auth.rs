//! Payloads for account and user authentication events.

use serde::{Deserialize, Serialize};

use crate::types::EntityId;

/// `sign_up_account` request data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignUpAccount {
    pub name: String,
    pub mail: String,
    pub pass: String,
}

/// `sign_in_account` request data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignInAccount {
    pub name: String,
    pub pass: String,
}

/// `sign_in_by_token` request data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignInByToken {
    pub token: String,
}

/// `sign_up_user` / `sign_in_user` request data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignUpUser {
    pub name: String,
}

/// `sign_in_user` request data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignInUser {
    pub name: String,
}

/// Successful `sign_in_account` response: the account's persistent token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenData {
    pub token: String,
}

/// `*_error` response data carrying a semantic auth code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignInError {
    pub error: String,
}

/// One row of the `get_user_list` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserListEntry {
    pub id: EntityId,
    pub name: String,
}

/// `get_user_list` response data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserList {
    pub users: Vec<UserListEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_up_account_wire_shape() {
        let data: SignUpAccount =
            serde_json::from_str(r#"{"name":"Luka","mail":"a@b.c","pass":"12345678"}"#)
                .expect("deserialize");
        assert_eq!(data.name, "Luka");
        assert_eq!(data.mail, "a@b.c");
    }

    #[test]
    fn unknown_keys_are_rejected_by_strict_parse() {
        // Handlers parse with serde_json::from_value; extra keys pass through
        // by default, which is the tolerant behavior we want at the boundary.
        let data: SignInAccount =
            serde_json::from_str(r#"{"name":"Luka","pass":"x","extra":1}"#).expect("deserialize");
        assert_eq!(data.pass, "x");
    }

    #[test]
    fn user_list_serializes_as_array() {
        let list = UserList {
            users: vec![UserListEntry { id: 3, name: "Luka".into() }],
        };
        let json = serde_json::to_value(&list).expect("serialize");
        assert_eq!(json["users"][0]["id"], 3);
    }
}
