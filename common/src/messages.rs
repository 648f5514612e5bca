// common/src/messages.rs
use serde::{Deserialize, Serialize};

/// Frames the gateway sends over an accepted connection.
///
/// Every frame is a JSON object tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// First frame on a new session
    Welcome {
        connection_id: String,
        user_id: String,
        expires_at: i64,
    },
    /// A client frame reflected back to its sender
    Echo {
        connection_id: String,
        payload: serde_json::Value,
        timestamp: i64,
    },
    /// Sent when the client frame could not be understood
    Error {
        message: String,
    },
}

impl ServerFrame {
    pub fn to_json(&self) -> String {
        // Serializing a tagged enum of strings and values cannot fail
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}
