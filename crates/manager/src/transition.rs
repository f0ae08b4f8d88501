//! Pure state transition function
//!
//! Every change to a session's transcript flows through a pure,
//! synchronous function: `transition(state, input, now) -> (state, effects)`.
//! It never performs IO, so every rule is unit-testable.

use parley_protocol::{
    ChatState, CompactionRecord, DoneStatus, Message, Notification, Role, StreamEvent,
    StreamState, StreamStatus, TokenState, ToolCallInfo, TurnProgress,
};

const DEFAULT_FAILURE_TEXT: &str = "Request failed";

// ---------------------------------------------------------------------------
// TransitionState: pure data snapshot of a session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionState {
    pub id: String,
    pub messages: Vec<Message>,
    pub chat_state: ChatState,
    pub token_state: TokenState,
    pub notifications: Vec<Notification>,
    pub error: Option<String>,
    pub load_error: Option<String>,
    pub continuation_id: Option<String>,
}

impl TransitionState {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn to_stream_state(&self) -> StreamState {
        StreamState {
            messages: self.messages.clone(),
            chat_state: self.chat_state,
            token_state: self.token_state.clone(),
            notifications: self.notifications.clone(),
            error: self.error.clone(),
            load_error: self.load_error.clone(),
        }
    }

    pub fn has_in_flight(&self) -> bool {
        self.messages.iter().any(|m| m.is_streaming)
    }
}

// ---------------------------------------------------------------------------
// Input: one variant per decoded event or controller lifecycle step
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// A new response turn was requested, optionally with a user message.
    TurnStarted { user_message: Option<Message> },
    /// A decoded wire event from the current stream.
    Event(StreamEvent),
    /// The transport failed before a `done` event.
    TransportError(String),
    /// The user stopped the stream.
    Stopped,
    /// The user answered an out-of-band request.
    NotificationResolved { request_id: String },
}

impl From<StreamEvent> for Input {
    fn from(event: StreamEvent) -> Self {
        Input::Event(event)
    }
}

// ---------------------------------------------------------------------------
// Effects: follow-up work for the controller
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Completed,
    Failed,
    Cancelled,
    Errored,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// The stream is over; the controller releases its transport.
    StreamFinished { reason: FinishReason },
    /// A tool result arrived for an id the in-flight message never saw.
    ToolResultUnmatched { tool_call_id: String },
    ContinuationChanged { continuation_id: String },
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// The streaming assistant message, created when absent.
fn ensure_in_flight<'a>(messages: &'a mut Vec<Message>, now: &str) -> &'a mut Message {
    let reusable = messages
        .last()
        .is_some_and(|m| m.is_streaming && m.role == Role::Assistant);
    if !reusable {
        messages.push(Message::streaming_assistant(now));
    }
    let last = messages.len() - 1;
    &mut messages[last]
}

fn in_flight_mut(messages: &mut [Message]) -> Option<&mut Message> {
    messages.iter_mut().rev().find(|m| m.is_streaming)
}

/// Mark every streaming message final, keeping whatever was accumulated.
fn finalize_all(messages: &mut [Message]) {
    for message in messages.iter_mut().filter(|m| m.is_streaming) {
        message.is_streaming = false;
    }
}

fn mark_busy(state: &mut TransitionState, chat_state: ChatState) {
    state.chat_state = chat_state;
}

fn settle_idle(state: &mut TransitionState) {
    finalize_all(&mut state.messages);
    state.chat_state = ChatState::Idle;
    state.notifications.clear();
}

// ---------------------------------------------------------------------------
// transition(): the pure core
// ---------------------------------------------------------------------------

/// Pure, synchronous state transition.
///
/// Given the current state and one input, returns the new state and the
/// effects the controller must carry out.
pub fn transition(
    mut state: TransitionState,
    input: Input,
    now: &str,
) -> (TransitionState, Vec<Effect>) {
    let mut effects: Vec<Effect> = Vec::new();

    match input {
        // -- Lifecycle --------------------------------------------------------
        Input::TurnStarted { user_message } => {
            finalize_all(&mut state.messages);
            if let Some(message) = user_message {
                state.messages.push(message);
            }
            state.error = None;
            state.notifications.clear();
            state.chat_state = ChatState::Thinking;
        }

        Input::TransportError(message) => {
            settle_idle(&mut state);
            state.error = Some(message);
            effects.push(Effect::StreamFinished {
                reason: FinishReason::Errored,
            });
        }

        Input::Stopped => {
            settle_idle(&mut state);
            effects.push(Effect::StreamFinished {
                reason: FinishReason::Stopped,
            });
        }

        Input::NotificationResolved { request_id } => {
            state.notifications.retain(|n| n.request_id != request_id);
            if state.notifications.is_empty()
                && state.chat_state == ChatState::WaitingForUserInput
            {
                state.chat_state = ChatState::Streaming;
            }
        }

        // -- Status -----------------------------------------------------------
        Input::Event(StreamEvent::Status(status)) => match status {
            StreamStatus::Running => {
                ensure_in_flight(&mut state.messages, now).is_streaming = true;
                mark_busy(&mut state, ChatState::Streaming);
            }
            StreamStatus::Thinking => mark_busy(&mut state, ChatState::Thinking),
            StreamStatus::Compacting => mark_busy(&mut state, ChatState::Compacting),
            StreamStatus::Other(_) => {}
        },

        // -- Content deltas ---------------------------------------------------
        Input::Event(StreamEvent::Text { content }) => {
            ensure_in_flight(&mut state.messages, now)
                .content
                .push_str(&content);
            mark_busy(&mut state, ChatState::Streaming);
        }

        Input::Event(StreamEvent::Thinking { content }) => {
            ensure_in_flight(&mut state.messages, now)
                .thinking
                .get_or_insert_with(String::new)
                .push_str(&content);
            mark_busy(&mut state, ChatState::Thinking);
        }

        // -- Tools ------------------------------------------------------------
        Input::Event(StreamEvent::ToolCall { id, name }) => {
            let message = ensure_in_flight(&mut state.messages, now);
            message
                .tool_calls
                .push(ToolCallInfo::pending(id, name));
            if !state.chat_state.is_busy() {
                state.chat_state = ChatState::Streaming;
            }
        }

        Input::Event(StreamEvent::ToolResult {
            id,
            success,
            content,
            duration_ms,
            ..
        }) => {
            let call = in_flight_mut(&mut state.messages).and_then(|m| m.tool_call_mut(&id));
            match call {
                Some(call) => {
                    call.result = Some(content);
                    call.success = Some(success);
                    if duration_ms.is_some() {
                        call.duration_ms = duration_ms;
                    }
                }
                None => effects.push(Effect::ToolResultUnmatched { tool_call_id: id }),
            }
        }

        // -- Progress metadata (last write wins) -----------------------------
        Input::Event(StreamEvent::Turn { current, max }) => {
            ensure_in_flight(&mut state.messages, now).turn = Some(TurnProgress { current, max });
        }

        Input::Event(StreamEvent::Compaction {
            strategy,
            before_tokens,
            after_tokens,
        }) => {
            ensure_in_flight(&mut state.messages, now).compaction = Some(CompactionRecord {
                strategy,
                before_tokens,
                after_tokens,
            });
            state.token_state.total_tokens = after_tokens;
            state.token_state.compaction_count += 1;
            if state.chat_state == ChatState::Compacting {
                state.chat_state = ChatState::Streaming;
            }
        }

        Input::Event(StreamEvent::SessionId { session_id }) => {
            if state.continuation_id.as_deref() != Some(session_id.as_str()) {
                state.continuation_id = Some(session_id.clone());
                effects.push(Effect::ContinuationChanged {
                    continuation_id: session_id,
                });
            }
        }

        // -- Out-of-band requests --------------------------------------------
        Input::Event(StreamEvent::Notification(notification)) => {
            match state
                .notifications
                .iter_mut()
                .find(|n| n.request_id == notification.request_id)
            {
                Some(existing) => *existing = notification,
                None => state.notifications.push(notification),
            }
            state.chat_state = ChatState::WaitingForUserInput;
        }

        // -- Terminal events --------------------------------------------------
        Input::Event(StreamEvent::Done { status, error }) => {
            let reason = match status {
                DoneStatus::Failed => {
                    // Server-reported failure replaces the partial answer.
                    let text = error
                        .filter(|e| !e.trim().is_empty())
                        .unwrap_or_else(|| DEFAULT_FAILURE_TEXT.to_string());
                    ensure_in_flight(&mut state.messages, now).content = text;
                    FinishReason::Failed
                }
                DoneStatus::Cancelled => FinishReason::Cancelled,
                DoneStatus::Completed | DoneStatus::Other(_) => FinishReason::Completed,
            };
            settle_idle(&mut state);
            effects.push(Effect::StreamFinished { reason });
        }

        Input::Event(StreamEvent::Error { message }) => {
            settle_idle(&mut state);
            state.error = Some(message);
            effects.push(Effect::StreamFinished {
                reason: FinishReason::Errored,
            });
        }
    }

    (state, effects)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
