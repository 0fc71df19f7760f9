//! Payloads for chat events.

use serde::{Deserialize, Serialize};

/// `send_message` request data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessage {
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_message_wire_shape() {
        let m: SendMessage = serde_json::from_str(r#"{"text":"hi"}"#).expect("deserialize");
        assert_eq!(m.text, "hi");
    }
}
