//! Client commands (Client -> Server).
//!
//! The full command set belongs to the backend protocol; these are the ones
//! the coordinator issues itself.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Ask whether the assistant is still working on a session.
    CheckSessionStatus {
        #[serde(rename = "sessionId")]
        session_id: String,
    },

    /// Stop the in-flight response for a session.
    AbortSession {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
}
