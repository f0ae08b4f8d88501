//! Core conversation types shared by the decoder, reducer and observers

use serde::{Deserialize, Serialize};

/// Message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// What the session is currently doing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatState {
    #[default]
    Idle,
    LoadingConversation,
    Thinking,
    Streaming,
    WaitingForUserInput,
    Compacting,
}

impl ChatState {
    /// True for every state in which a response turn is in progress.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            ChatState::Thinking
                | ChatState::Streaming
                | ChatState::WaitingForUserInput
                | ChatState::Compacting
        )
    }
}

/// A tool invocation made by the assistant, correlated with its result by `id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallInfo {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// `None` while the call is pending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl ToolCallInfo {
    pub fn pending(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            result: None,
            success: None,
            duration_ms: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.success.is_none()
    }
}

/// Agent loop progress within one response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnProgress {
    pub current: u32,
    pub max: u32,
}

/// Context compaction that happened while producing a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionRecord {
    pub strategy: String,
    pub before_tokens: u64,
    pub after_tokens: u64,
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn: Option<TurnProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compaction: Option<CompactionRecord>,
    #[serde(default)]
    pub is_streaming: bool,
    pub timestamp: String,
}

impl Message {
    /// A finalized user-authored message.
    pub fn user(content: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            id: crate::new_id(),
            role: Role::User,
            content: content.into(),
            thinking: None,
            tool_calls: Vec::new(),
            turn: None,
            compaction: None,
            is_streaming: false,
            timestamp: timestamp.into(),
        }
    }

    /// An empty assistant message that is still receiving deltas.
    pub fn streaming_assistant(timestamp: impl Into<String>) -> Self {
        Self {
            id: crate::new_id(),
            role: Role::Assistant,
            content: String::new(),
            thinking: None,
            tool_calls: Vec::new(),
            turn: None,
            compaction: None,
            is_streaming: true,
            timestamp: timestamp.into(),
        }
    }

    pub fn tool_call(&self, id: &str) -> Option<&ToolCallInfo> {
        self.tool_calls.iter().find(|call| call.id == id)
    }

    pub fn tool_call_mut(&mut self, id: &str) -> Option<&mut ToolCallInfo> {
        self.tool_calls.iter_mut().find(|call| call.id == id)
    }
}

/// Token accounting for a session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenState {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub compaction_count: u32,
}

/// Out-of-band request that needs a user response before the turn can continue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub request_id: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Session metadata owned by the registry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub token_state: TokenState,
    /// Server-side conversation id that follow-up turns must continue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation_id: Option<String>,
    /// The server reports a turn still running for this session.
    #[serde(default)]
    pub processing: bool,
}

impl SessionMeta {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

/// A session as returned by a loader: metadata plus its materialized transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadedSession {
    pub session: SessionMeta,
    pub messages: Vec<Message>,
}

/// Everything an observer needs to render a session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamState {
    pub messages: Vec<Message>,
    pub chat_state: ChatState,
    pub token_state: TokenState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notifications: Vec<Notification>,
    /// Last stream-level failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Failure to bootstrap the session, kept apart from stream failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_error: Option<String>,
}

impl StreamState {
    /// The message currently receiving deltas, if any.
    pub fn streaming_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.is_streaming)
    }

    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::Assistant)
    }
}
