//! Parley Protocol
//!
//! Shared types for the conversation manager: the transcript data model,
//! typed stream events, outbound requests and the frame decoder.

use uuid::Uuid;

pub mod client;
pub mod decode;
pub mod server;
pub mod types;

pub use client::{AttachRequest, StartRequest, StopRequest};
pub use decode::{decode_frame, Decoded, DropReason};
pub use server::{DoneStatus, RawFrame, StreamEvent, StreamStatus};
pub use types::*;

/// Generate a new unique ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
