//! Commands sent to a session actor from registry callers, and the
//! inputs its stream reader feeds back.

use parley_protocol::{Message, SessionMeta};
use tokio::sync::oneshot;

use crate::error::ManagerError;
use crate::transition::Input;

pub type Reply<T> = oneshot::Sender<Result<T, ManagerError>>;

/// Result of asking a session to start (or resume) a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A reader was spawned for this generation.
    Started { generation: u64 },
    /// Nothing to send: no content and no history.
    Ignored,
}

/// A command that can be sent to a session actor.
pub enum SessionCommand {
    /// Load the transcript once; later calls return immediately.
    Initialize { reply: Reply<()> },

    StartStream {
        content: String,
        reply: Reply<StartOutcome>,
    },

    /// Replies `true` when a stream was actually stopped.
    StopStream { reply: Reply<bool> },

    ResumeStream { reply: Reply<StartOutcome> },

    UpdateCache {
        meta: SessionMeta,
        messages: Vec<Message>,
        reply: Reply<()>,
    },

    /// Replies `true` when the notification was pending.
    ResolveNotification {
        request_id: String,
        reply: Reply<bool>,
    },

    Shutdown,
}

impl SessionCommand {
    pub fn name(&self) -> &'static str {
        match self {
            SessionCommand::Initialize { .. } => "initialize",
            SessionCommand::StartStream { .. } => "start_stream",
            SessionCommand::StopStream { .. } => "stop_stream",
            SessionCommand::ResumeStream { .. } => "resume_stream",
            SessionCommand::UpdateCache { .. } => "update_cache",
            SessionCommand::ResolveNotification { .. } => "resolve_notification",
            SessionCommand::Shutdown => "shutdown",
        }
    }
}

/// One input from a stream reader, tagged with the generation that
/// spawned it.
#[derive(Debug)]
pub struct StreamInput {
    pub generation: u64,
    pub event_id: Option<u64>,
    pub input: Input,
}
