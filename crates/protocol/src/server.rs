//! Server → client stream events

use crate::types::Notification;

/// One undecoded frame as read off the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Event tag (`text`, `toolcall`, ...).
    pub event: String,
    /// Payload, normally a JSON object.
    pub data: String,
    /// Server-assigned sequence id, used to resume a stream.
    pub id: Option<u64>,
}

impl RawFrame {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
            id: None,
        }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }
}

/// Progress reported by a `status` frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamStatus {
    Running,
    Thinking,
    Compacting,
    Other(String),
}

impl StreamStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "running" => StreamStatus::Running,
            "thinking" => StreamStatus::Thinking,
            "compacting" => StreamStatus::Compacting,
            _ => StreamStatus::Other(raw.to_string()),
        }
    }
}

/// Outcome carried by a terminal `done` frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DoneStatus {
    Completed,
    Failed,
    Cancelled,
    Other(String),
}

impl DoneStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "completed" => DoneStatus::Completed,
            "failed" => DoneStatus::Failed,
            "cancelled" | "canceled" => DoneStatus::Cancelled,
            _ => DoneStatus::Other(raw.to_string()),
        }
    }
}

/// A decoded, typed stream event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Status(StreamStatus),
    Text {
        content: String,
    },
    Thinking {
        content: String,
    },
    ToolCall {
        id: String,
        name: String,
    },
    ToolResult {
        id: String,
        success: bool,
        content: String,
        name: Option<String>,
        duration_ms: Option<u64>,
    },
    Turn {
        current: u32,
        max: u32,
    },
    Compaction {
        strategy: String,
        before_tokens: u64,
        after_tokens: u64,
    },
    SessionId {
        session_id: String,
    },
    Notification(Notification),
    Done {
        status: DoneStatus,
        error: Option<String>,
    },
    Error {
        message: String,
    },
}

impl StreamEvent {
    /// Wire tag for this event variant.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Status(_) => "status",
            Self::Text { .. } => "text",
            Self::Thinking { .. } => "thinking",
            Self::ToolCall { .. } => "toolcall",
            Self::ToolResult { .. } => "toolresult",
            Self::Turn { .. } => "turn",
            Self::Compaction { .. } => "compaction",
            Self::SessionId { .. } => "session_id",
            Self::Notification(_) => "notification",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}
