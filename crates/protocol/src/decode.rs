//! Frame decoder
//!
//! Turns one raw frame (tag + JSON payload) into a typed [`StreamEvent`].
//! Decoding never fails loudly: unknown tags and malformed payloads come back
//! as [`Decoded::Drop`] so a single bad frame cannot end the stream.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::server::{DoneStatus, RawFrame, StreamEvent, StreamStatus};
use crate::types::Notification;

/// Result of decoding one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Event(StreamEvent),
    Drop(DropReason),
}

/// Why a frame was skipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    UnknownTag(String),
    InvalidPayload { tag: String, error: String },
    MissingId { tag: String },
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::UnknownTag(tag) => write!(f, "unknown event tag '{tag}'"),
            DropReason::InvalidPayload { tag, error } => {
                write!(f, "invalid '{tag}' payload: {error}")
            }
            DropReason::MissingId { tag } => write!(f, "'{tag}' payload has an empty id"),
        }
    }
}

#[derive(Deserialize)]
struct StatusPayload {
    status: String,
}

#[derive(Deserialize)]
struct DeltaPayload {
    #[serde(alias = "delta")]
    content: String,
}

#[derive(Deserialize)]
struct ToolCallPayload {
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct ToolResultPayload {
    id: String,
    success: bool,
    #[serde(default)]
    content: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    duration_ms: Option<u64>,
}

#[derive(Deserialize)]
struct TurnPayload {
    current: u32,
    max: u32,
}

#[derive(Deserialize)]
struct CompactionPayload {
    strategy: String,
    before_tokens: u64,
    after_tokens: u64,
}

#[derive(Deserialize)]
struct SessionIdPayload {
    session_id: String,
}

#[derive(Deserialize)]
struct DonePayload {
    status: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(alias = "message")]
    error: String,
}

fn payload<T: DeserializeOwned>(frame: &RawFrame) -> Result<T, DropReason> {
    serde_json::from_str(&frame.data).map_err(|e| DropReason::InvalidPayload {
        tag: frame.event.clone(),
        error: e.to_string(),
    })
}

fn require_id(frame: &RawFrame, id: &str) -> Result<(), DropReason> {
    if id.trim().is_empty() {
        Err(DropReason::MissingId {
            tag: frame.event.clone(),
        })
    } else {
        Ok(())
    }
}

fn decode_event(frame: &RawFrame) -> Result<StreamEvent, DropReason> {
    let event = match frame.event.as_str() {
        "status" => {
            let p: StatusPayload = payload(frame)?;
            StreamEvent::Status(StreamStatus::parse(&p.status))
        }
        "text" => {
            let p: DeltaPayload = payload(frame)?;
            StreamEvent::Text { content: p.content }
        }
        "thinking" => {
            let p: DeltaPayload = payload(frame)?;
            StreamEvent::Thinking { content: p.content }
        }
        "toolcall" => {
            let p: ToolCallPayload = payload(frame)?;
            require_id(frame, &p.id)?;
            StreamEvent::ToolCall {
                id: p.id,
                name: p.name,
            }
        }
        "toolresult" => {
            let p: ToolResultPayload = payload(frame)?;
            require_id(frame, &p.id)?;
            StreamEvent::ToolResult {
                id: p.id,
                success: p.success,
                content: p.content,
                name: p.name,
                duration_ms: p.duration_ms,
            }
        }
        "turn" => {
            let p: TurnPayload = payload(frame)?;
            StreamEvent::Turn {
                current: p.current,
                max: p.max,
            }
        }
        "compaction" => {
            let p: CompactionPayload = payload(frame)?;
            StreamEvent::Compaction {
                strategy: p.strategy,
                before_tokens: p.before_tokens,
                after_tokens: p.after_tokens,
            }
        }
        "session_id" => {
            let p: SessionIdPayload = payload(frame)?;
            require_id(frame, &p.session_id)?;
            StreamEvent::SessionId {
                session_id: p.session_id,
            }
        }
        "notification" => {
            let p: Notification = payload(frame)?;
            require_id(frame, &p.request_id)?;
            StreamEvent::Notification(p)
        }
        "done" => {
            let p: DonePayload = payload(frame)?;
            StreamEvent::Done {
                status: DoneStatus::parse(&p.status),
                error: p.error,
            }
        }
        "error" => {
            let p: ErrorPayload = payload(frame)?;
            StreamEvent::Error { message: p.error }
        }
        other => return Err(DropReason::UnknownTag(other.to_string())),
    };
    Ok(event)
}

/// Decode one frame. Never panics; bad frames are reported as `Drop`.
pub fn decode_frame(frame: &RawFrame) -> Decoded {
    match decode_event(frame) {
        Ok(event) => Decoded::Event(event),
        Err(reason) => Decoded::Drop(reason),
    }
}
