//! The transport envelope and event-agnostic payloads.

use serde::{Deserialize, Serialize};

/// Semantic message codes sent to clients via `info` and `*_error` events.
///
/// Codes are stable identifiers; the client's translation layer maps them
/// to localized text.
pub mod codes {
    /// Client input did not match the expected schema.
    pub const WRONG_DATA: &str = "WRONG_DATA";
    /// The event requires an account session.
    pub const PLEASE_LOGIN_ACCOUNT: &str = "PLEASE_LOGIN_ACCOUNT";
    /// The event requires a user session.
    pub const PLEASE_LOGIN_USER: &str = "PLEASE_LOGIN_USER";
    /// The event is only available to guests.
    pub const ALREADY_LOGGED_IN: &str = "ALREADY_LOGGED_IN";
    /// Per-socket rate limit exceeded.
    pub const LIMIT_REACHED: &str = "LIMIT_REACHED";
    /// Unclassified server-side failure.
    pub const UNKNOWN_ERROR: &str = "UNKNOWN_ERROR";

    pub const AUTH_ACCOUNT_NOT_FOUND: &str = "AUTH_ACCOUNT_NOT_FOUND";
    pub const AUTH_USER_NOT_FOUND: &str = "AUTH_USER_NOT_FOUND";
    pub const AUTH_WRONG_PASSWORD: &str = "AUTH_WRONG_PASSWORD";
    pub const AUTH_WRONG_TOKEN: &str = "AUTH_WRONG_TOKEN";
    pub const AUTH_NAME_TAKEN: &str = "AUTH_NAME_TAKEN";
}

/// Errors decoding an inbound frame.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("frame is not a valid envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("frame is not valid UTF-8")]
    NotUtf8,
}

/// One transport frame: an event name plus its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    /// Event payload; `null` for events without data.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Envelope {
    /// Builds an envelope from an event name and a serializable payload.
    ///
    /// # Panics
    ///
    /// Panics if `data` fails to serialize, which cannot happen for the
    /// payload types in this module (no maps with non-string keys).
    #[must_use]
    pub fn new<T: Serialize>(event: &str, data: &T) -> Self {
        Self {
            event: event.to_string(),
            data: serde_json::to_value(data).expect("payload serializes"),
        }
    }

    /// An envelope with a `null` payload.
    #[must_use]
    pub fn empty(event: &str) -> Self {
        Self {
            event: event.to_string(),
            data: serde_json::Value::Null,
        }
    }

    /// Decodes an inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Malformed`] when the frame is not a JSON object
    /// with an `event` string.
    pub fn decode(raw: &str) -> Result<Self, WireError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Encodes the envelope as a text frame.
    #[must_use]
    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("envelope serializes")
    }
}

/// Payload of the `info` event: a semantic code for the client to localize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Info {
    pub text: String,
}

impl Info {
    #[must_use]
    pub fn new(code: &str) -> Self {
        Self { text: code.to_string() }
    }
}

/// Payload of the `pong` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    /// Server wall-clock time in milliseconds since the Unix epoch.
    pub server_time: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_envelope_with_data() {
        let env = Envelope::decode(r#"{"event":"move","data":{"direction":{"x":1,"y":0},"run":false}}"#)
            .expect("decode");
        assert_eq!(env.event, "move");
        assert_eq!(env.data["direction"]["x"], 1);
    }

    #[test]
    fn decode_envelope_without_data() {
        let env = Envelope::decode(r#"{"event":"log_out_account"}"#).expect("decode");
        assert_eq!(env.event, "log_out_account");
        assert!(env.data.is_null());
    }

    #[test]
    fn decode_rejects_non_envelope() {
        assert!(Envelope::decode("[1,2,3]").is_err());
        assert!(Envelope::decode("{").is_err());
    }

    #[test]
    fn encode_roundtrip() {
        let env = Envelope::new("info", &Info::new(codes::LIMIT_REACHED));
        let back = Envelope::decode(&env.encode()).expect("decode");
        assert_eq!(back, env);
        assert_eq!(back.data["text"], codes::LIMIT_REACHED);
    }

    #[test]
    fn empty_envelope_has_null_data() {
        let env = Envelope::empty("sign_up_account");
        assert_eq!(env.encode(), r#"{"event":"sign_up_account","data":null}"#);
    }
}
