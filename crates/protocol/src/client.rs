//! Client → server requests

use serde::{Deserialize, Serialize};

use crate::types::Message;

/// Start a new response turn for a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRequest {
    pub session_id: String,
    /// Full history the server should continue from; the last entry is the
    /// newly submitted user message when one was added.
    pub messages: Vec<Message>,
    /// Content submitted with this turn; `None` continues the existing
    /// transcript without a new user message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation_id: Option<String>,
}

/// Re-attach to a turn the server is still running
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachRequest {
    pub session_id: String,
    /// Only events newer than this id are replayed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_event_id: Option<u64>,
}

/// Ask the server to cancel in-flight work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopRequest {
    pub session_id: String,
}
