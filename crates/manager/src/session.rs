//! Session state owned by the session actor

use std::sync::Arc;

use arc_swap::ArcSwap;
use parley_protocol::{ChatState, LoadedSession, Message, SessionMeta, StreamState};

use crate::observer::ObserverSet;
use crate::transition::{transition, Effect, Input, TransitionState};

/// Lock-free, read-only view of a session.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub meta: SessionMeta,
    pub state: Arc<StreamState>,
    pub stream_active: bool,
    pub initialized: bool,
}

impl SessionSnapshot {
    fn empty(id: &str) -> Self {
        Self {
            meta: SessionMeta::new(id),
            state: Arc::new(StreamState::default()),
            stream_active: false,
            initialized: false,
        }
    }
}

/// Handle to a session's mutable state. Only the owning actor touches it.
pub struct SessionHandle {
    meta: SessionMeta,
    state: TransitionState,
    initialized: bool,
    stream_active: bool,
    last_event_id: Option<u64>,
    snapshot: Arc<ArcSwap<SessionSnapshot>>,
    observers: ObserverSet,
}

impl SessionHandle {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            meta: SessionMeta::new(id.clone()),
            snapshot: Arc::new(ArcSwap::from_pointee(SessionSnapshot::empty(&id))),
            state: TransitionState::new(id),
            initialized: false,
            stream_active: false,
            last_event_id: None,
            observers: ObserverSet::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.meta.id
    }

    pub fn meta(&self) -> &SessionMeta {
        &self.meta
    }

    pub fn messages(&self) -> &[Message] {
        &self.state.messages
    }

    pub fn chat_state(&self) -> ChatState {
        self.state.chat_state
    }

    pub fn continuation_id(&self) -> Option<&str> {
        self.state.continuation_id.as_deref()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_stream_active(&self) -> bool {
        self.stream_active
    }

    pub fn set_stream_active(&mut self, active: bool) {
        self.stream_active = active;
        self.meta.processing = active;
    }

    pub fn last_event_id(&self) -> Option<u64> {
        self.last_event_id
    }

    pub fn record_event_id(&mut self, id: u64) {
        self.last_event_id = Some(id);
    }

    pub fn reset_event_id(&mut self) {
        self.last_event_id = None;
    }

    pub fn has_notification(&self, request_id: &str) -> bool {
        self.state
            .notifications
            .iter()
            .any(|n| n.request_id == request_id)
    }

    pub fn snapshot_arc(&self) -> Arc<ArcSwap<SessionSnapshot>> {
        self.snapshot.clone()
    }

    pub fn observers(&self) -> ObserverSet {
        self.observers.clone()
    }

    /// Run one input through the transition function.
    pub fn apply(&mut self, input: Input) -> Vec<Effect> {
        let state = std::mem::take(&mut self.state);
        let (next, effects) = transition(state, input, &chrono_now());
        self.state = next;
        self.meta.token_state = self.state.token_state.clone();
        self.meta.continuation_id = self.state.continuation_id.clone();
        effects
    }

    pub fn begin_loading(&mut self) {
        self.state.chat_state = ChatState::LoadingConversation;
        self.state.load_error = None;
    }

    pub fn finish_loading(&mut self, loaded: LoadedSession) {
        let LoadedSession { session, messages } = loaded;
        self.replace_transcript(session, messages);
        self.state.chat_state = ChatState::Idle;
        self.state.load_error = None;
    }

    pub fn fail_loading(&mut self, message: String) {
        self.state.chat_state = ChatState::Idle;
        self.state.load_error = Some(message);
    }

    /// Splice in a freshly fetched transcript, bypassing the reducer.
    pub fn replace_transcript(&mut self, meta: SessionMeta, messages: Vec<Message>) {
        let id = self.meta.id.clone();
        let continuation_id = meta
            .continuation_id
            .clone()
            .or_else(|| self.state.continuation_id.take());

        self.state.messages = messages;
        self.state.token_state = meta.token_state.clone();
        self.state.continuation_id = continuation_id.clone();
        self.state.error = None;
        self.state.notifications.clear();
        let processing = meta.processing || self.stream_active;
        self.meta = SessionMeta {
            id,
            continuation_id,
            processing,
            ..meta
        };
        self.initialized = true;
    }

    /// Build a `StartRequest` payload from the current transcript.
    pub fn outbound_history(&self) -> Vec<Message> {
        self.state.messages.clone()
    }

    /// Store a fresh snapshot and notify observers.
    pub fn publish(&self) {
        let state = Arc::new(self.state.to_stream_state());
        self.snapshot.store(Arc::new(SessionSnapshot {
            meta: self.meta.clone(),
            state: state.clone(),
            stream_active: self.stream_active,
            initialized: self.initialized,
        }));
        self.observers.notify(&state);
    }
}

/// Get current time as `<unix seconds>Z`
pub fn chrono_now() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}Z", duration.as_secs())
}
