//! Session actor: owns a SessionHandle and processes commands sequentially.
//!
//! Each session runs as an independent tokio task. External callers
//! communicate via `SessionActorHandle` which sends `SessionCommand`
//! messages over an mpsc channel. Lock-free reads go through `ArcSwap`.
//!
//! Streams are read by a separate reader task per generation. Readers feed
//! `StreamInput`s back to the actor, which folds only those tagged with the
//! current generation.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use futures::StreamExt;
use parley_connectors::{SessionLoader, Transport};
use parley_protocol::{
    decode_frame, AttachRequest, Decoded, Message, SessionMeta, StartRequest, StopRequest,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ManagerConfig;
use crate::error::ManagerError;
use crate::observer::{Observer, ObserverSet, SessionView, Subscription};
use crate::session::{chrono_now, SessionHandle, SessionSnapshot};
use crate::session_command::{Reply, SessionCommand, StartOutcome, StreamInput};
use crate::transition::{Effect, Input};

pub const PREMATURE_CLOSE: &str = "Connection closed before stream completed";
pub const STREAM_IDLE_TIMEOUT: &str = "Stream idle timeout";

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Handle to a running session actor (cheap to Clone).
#[derive(Clone)]
pub struct SessionActorHandle {
    pub id: String,
    command_tx: mpsc::Sender<SessionCommand>,
    snapshot: Arc<ArcSwap<SessionSnapshot>>,
    observers: ObserverSet,
}

impl SessionActorHandle {
    /// Spawn the actor for `handle`. Must be called inside a tokio runtime.
    pub fn spawn(
        handle: SessionHandle,
        transport: Arc<dyn Transport>,
        loader: Arc<dyn SessionLoader>,
        config: ManagerConfig,
    ) -> SessionActorHandle {
        let (command_tx, command_rx) = mpsc::channel(config.command_capacity.max(1));
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let snapshot = handle.snapshot_arc();
        let observers = handle.observers();
        let id = handle.id().to_string();
        handle.publish();

        let actor = SessionActor {
            handle,
            transport,
            loader,
            config,
            event_tx,
            generation: 0,
            reader: None,
        };
        tokio::spawn(actor.run(command_rx, event_rx));

        SessionActorHandle {
            id,
            command_tx,
            snapshot,
            observers,
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> SessionCommand,
    ) -> Result<T, ManagerError> {
        let (reply, rx) = oneshot::channel();
        if self.command_tx.send(build(reply)).await.is_err() {
            warn!(
                component = "session_actor",
                session_id = %self.id,
                "Actor channel closed, command dropped"
            );
            return Err(ManagerError::ActorGone(self.id.clone()));
        }
        rx.await
            .map_err(|_| ManagerError::ActorGone(self.id.clone()))?
    }

    pub async fn initialize(&self) -> Result<(), ManagerError> {
        self.request(|reply| SessionCommand::Initialize { reply })
            .await
    }

    pub async fn start_stream(&self, content: impl Into<String>) -> Result<StartOutcome, ManagerError> {
        let content = content.into();
        self.request(|reply| SessionCommand::StartStream { content, reply })
            .await
    }

    pub async fn stop_stream(&self) -> Result<bool, ManagerError> {
        self.request(|reply| SessionCommand::StopStream { reply })
            .await
    }

    pub async fn resume_stream(&self) -> Result<StartOutcome, ManagerError> {
        self.request(|reply| SessionCommand::ResumeStream { reply })
            .await
    }

    pub async fn update_cache(
        &self,
        meta: SessionMeta,
        messages: Vec<Message>,
    ) -> Result<(), ManagerError> {
        self.request(|reply| SessionCommand::UpdateCache {
            meta,
            messages,
            reply,
        })
        .await
    }

    pub async fn resolve_notification(
        &self,
        request_id: impl Into<String>,
    ) -> Result<bool, ManagerError> {
        let request_id = request_id.into();
        self.request(|reply| SessionCommand::ResolveNotification { request_id, reply })
            .await
    }

    /// Ask the actor to exit. Any live reader is aborted.
    pub async fn shutdown(&self) {
        if self.command_tx.send(SessionCommand::Shutdown).await.is_err() {
            debug!(
                component = "session_actor",
                session_id = %self.id,
                "Actor already stopped"
            );
        }
    }

    /// Lock-free snapshot read.
    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        self.snapshot.load_full()
    }

    pub fn subscribe(&self, observer: Observer) -> Subscription {
        self.observers.add(observer)
    }

    pub fn view(&self) -> SessionView {
        SessionView::attach(&self.observers, || self.snapshot.load().state.clone())
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }
}

enum StreamSource {
    Start(StartRequest),
    Attach(AttachRequest),
}

struct SessionActor {
    handle: SessionHandle,
    transport: Arc<dyn Transport>,
    loader: Arc<dyn SessionLoader>,
    config: ManagerConfig,
    event_tx: mpsc::Sender<StreamInput>,
    generation: u64,
    reader: Option<JoinHandle<()>>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<SessionCommand>,
        mut event_rx: mpsc::Receiver<StreamInput>,
    ) {
        debug!(
            component = "session_actor",
            event = "session.actor.started",
            session_id = %self.handle.id(),
            "Session actor started"
        );

        loop {
            tokio::select! {
                cmd = command_rx.recv() => match cmd {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(cmd) => self.handle_command(cmd).await,
                },
                Some(input) = event_rx.recv() => self.handle_stream_input(input),
            }
        }

        self.abort_reader();
        debug!(
            component = "session_actor",
            event = "session.actor.stopped",
            session_id = %self.handle.id(),
            "Session actor stopped"
        );
    }

    async fn handle_command(&mut self, cmd: SessionCommand) {
        debug!(
            component = "session_actor",
            event = "session.command",
            session_id = %self.handle.id(),
            command = cmd.name(),
            "Processing command"
        );

        match cmd {
            SessionCommand::Initialize { reply } => {
                let result = self.initialize().await;
                let _ = reply.send(result);
            }
            SessionCommand::StartStream { content, reply } => {
                let _ = reply.send(self.start_stream(content));
            }
            SessionCommand::StopStream { reply } => {
                let _ = reply.send(Ok(self.stop_stream()));
            }
            SessionCommand::ResumeStream { reply } => {
                let _ = reply.send(self.resume_stream());
            }
            SessionCommand::UpdateCache {
                meta,
                messages,
                reply,
            } => {
                let _ = reply.send(self.update_cache(meta, messages));
            }
            SessionCommand::ResolveNotification { request_id, reply } => {
                let _ = reply.send(Ok(self.resolve_notification(&request_id)));
            }
            SessionCommand::Shutdown => {}
        }
    }

    // -- Lifecycle ----------------------------------------------------------

    async fn initialize(&mut self) -> Result<(), ManagerError> {
        if self.handle.is_initialized() {
            return Ok(());
        }

        let session_id = self.handle.id().to_string();
        self.handle.begin_loading();
        self.handle.publish();

        let load = tokio::time::timeout(self.config.load_timeout, self.loader.load(&session_id));
        let loaded = match load.await {
            Ok(Ok(loaded)) => loaded,
            Ok(Err(e)) => return Err(self.load_failed(e.to_string())),
            Err(_) => {
                let secs = self.config.load_timeout.as_secs_f32();
                return Err(self.load_failed(format!("Timed out after {secs:.1}s")));
            }
        };

        let processing = loaded.session.processing;
        let message_count = loaded.messages.len();
        self.handle.finish_loading(loaded);
        self.handle.publish();

        info!(
            component = "session_actor",
            event = "session.load.completed",
            session_id = %session_id,
            message_count,
            processing,
            "Session loaded"
        );

        if processing && self.config.auto_resume {
            if let Err(e) = self.resume_stream() {
                warn!(
                    component = "session_actor",
                    event = "session.resume.failed",
                    session_id = %session_id,
                    error = %e,
                    "Auto-resume failed"
                );
            }
        }
        Ok(())
    }

    fn load_failed(&mut self, message: String) -> ManagerError {
        let session_id = self.handle.id().to_string();
        warn!(
            component = "session_actor",
            event = "session.load.failed",
            session_id = %session_id,
            error = %message,
            "Session load failed"
        );
        self.handle.fail_loading(message.clone());
        self.handle.publish();
        ManagerError::SessionLoad {
            session_id,
            message,
        }
    }

    fn start_stream(&mut self, content: String) -> Result<StartOutcome, ManagerError> {
        if !self.handle.is_initialized() {
            return Err(ManagerError::NotInitialized(self.handle.id().to_string()));
        }

        let has_content = !content.trim().is_empty();
        if !has_content && self.handle.messages().is_empty() {
            debug!(
                component = "session_actor",
                event = "session.stream.ignored",
                session_id = %self.handle.id(),
                "Nothing to send"
            );
            return Ok(StartOutcome::Ignored);
        }

        if self.reader.is_some() {
            debug!(
                component = "session_actor",
                event = "session.stream.superseded",
                session_id = %self.handle.id(),
                generation = self.generation,
                "Superseding active stream"
            );
        }
        self.abort_reader();
        let generation = self.next_generation();

        let new_content = has_content.then_some(content);
        let user_message = new_content
            .clone()
            .map(|content| Message::user(content, chrono_now()));
        self.fold(Input::TurnStarted { user_message });

        let request = StartRequest {
            session_id: self.handle.id().to_string(),
            messages: self.handle.outbound_history(),
            new_content,
            continuation_id: self.handle.continuation_id().map(str::to_string),
        };
        self.handle.reset_event_id();
        self.spawn_reader(generation, StreamSource::Start(request));
        self.handle.publish();

        info!(
            component = "session_actor",
            event = "session.stream.started",
            session_id = %self.handle.id(),
            generation,
            "Stream started"
        );
        Ok(StartOutcome::Started { generation })
    }

    fn resume_stream(&mut self) -> Result<StartOutcome, ManagerError> {
        if !self.handle.is_initialized() {
            return Err(ManagerError::NotInitialized(self.handle.id().to_string()));
        }
        if self.handle.is_stream_active() {
            return Err(ManagerError::StreamActive(self.handle.id().to_string()));
        }

        let generation = self.next_generation();
        self.fold(Input::TurnStarted { user_message: None });

        let request = AttachRequest {
            session_id: self.handle.id().to_string(),
            last_event_id: self.handle.last_event_id(),
        };
        info!(
            component = "session_actor",
            event = "session.stream.resumed",
            session_id = %self.handle.id(),
            generation,
            last_event_id = ?request.last_event_id,
            "Re-attaching to running stream"
        );
        self.spawn_reader(generation, StreamSource::Attach(request));
        self.handle.publish();
        Ok(StartOutcome::Started { generation })
    }

    fn stop_stream(&mut self) -> bool {
        if !self.handle.is_stream_active() {
            return false;
        }

        self.abort_reader();
        let generation = self.next_generation();
        self.fold(Input::Stopped);
        self.handle.publish();

        info!(
            component = "session_actor",
            event = "session.stream.stopped",
            session_id = %self.handle.id(),
            generation,
            "Stream stopped"
        );

        let transport = self.transport.clone();
        let request = StopRequest {
            session_id: self.handle.id().to_string(),
        };
        tokio::spawn(async move {
            let session_id = request.session_id.clone();
            if let Err(e) = transport.cancel(request).await {
                warn!(
                    component = "session_actor",
                    event = "session.cancel.failed",
                    session_id = %session_id,
                    error = %e,
                    "Remote cancel failed"
                );
            }
        });
        true
    }

    fn update_cache(&mut self, meta: SessionMeta, messages: Vec<Message>) -> Result<(), ManagerError> {
        if self.handle.is_stream_active() {
            return Err(ManagerError::StreamActive(self.handle.id().to_string()));
        }
        self.handle.replace_transcript(meta, messages);
        self.handle.publish();
        Ok(())
    }

    fn resolve_notification(&mut self, request_id: &str) -> bool {
        if !self.handle.has_notification(request_id) {
            return false;
        }
        self.fold(Input::NotificationResolved {
            request_id: request_id.to_string(),
        });
        self.handle.publish();
        true
    }

    // -- Stream plumbing ----------------------------------------------------

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn abort_reader(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }

    fn spawn_reader(&mut self, generation: u64, source: StreamSource) {
        let reader = StreamReader {
            session_id: self.handle.id().to_string(),
            generation,
            transport: self.transport.clone(),
            events: self.event_tx.clone(),
            idle_timeout: self.config.idle_timeout,
        };
        self.reader = Some(tokio::spawn(reader.run(source)));
        self.handle.set_stream_active(true);
    }

    fn handle_stream_input(&mut self, input: StreamInput) {
        if input.generation != self.generation {
            debug!(
                component = "session_actor",
                event = "session.stream.stale_input",
                session_id = %self.handle.id(),
                input_generation = input.generation,
                current_generation = self.generation,
                "Dropping input from superseded stream"
            );
            return;
        }
        if let Some(id) = input.event_id {
            self.handle.record_event_id(id);
        }
        self.fold(input.input);
        self.handle.publish();
    }

    /// Apply one input and carry out its effects. Callers publish.
    fn fold(&mut self, input: Input) {
        for effect in self.handle.apply(input) {
            match effect {
                Effect::StreamFinished { reason } => {
                    // The reader exits on its own after a terminal input.
                    self.reader = None;
                    self.handle.set_stream_active(false);
                    info!(
                        component = "session_actor",
                        event = "session.stream.finished",
                        session_id = %self.handle.id(),
                        reason = ?reason,
                        "Stream finished"
                    );
                }
                Effect::ToolResultUnmatched { tool_call_id } => {
                    warn!(
                        component = "session_actor",
                        event = "session.tool_result.unmatched",
                        session_id = %self.handle.id(),
                        tool_call_id = %tool_call_id,
                        "Dropping tool result without a matching call"
                    );
                }
                Effect::ContinuationChanged { continuation_id } => {
                    debug!(
                        component = "session_actor",
                        event = "session.continuation.changed",
                        session_id = %self.handle.id(),
                        continuation_id = %continuation_id,
                        "Continuation id updated"
                    );
                }
            }
        }
    }
}

/// Reads one stream and forwards decoded inputs to the actor.
struct StreamReader {
    session_id: String,
    generation: u64,
    transport: Arc<dyn Transport>,
    events: mpsc::Sender<StreamInput>,
    idle_timeout: Duration,
}

impl StreamReader {
    async fn run(self, source: StreamSource) {
        let open = async {
            match source {
                StreamSource::Start(request) => self.transport.open(request).await,
                StreamSource::Attach(request) => self.transport.attach(request).await,
            }
        };
        let mut frames = match tokio::time::timeout(self.idle_timeout, open).await {
            Ok(Ok(frames)) => frames,
            Ok(Err(e)) => return self.fail(e.to_string()).await,
            Err(_) => return self.fail(STREAM_IDLE_TIMEOUT.to_string()).await,
        };

        loop {
            let frame = match tokio::time::timeout(self.idle_timeout, frames.next()).await {
                Ok(Some(Ok(frame))) => frame,
                Ok(Some(Err(e))) => return self.fail(e.to_string()).await,
                Ok(None) => return self.fail(PREMATURE_CLOSE.to_string()).await,
                Err(_) => return self.fail(STREAM_IDLE_TIMEOUT.to_string()).await,
            };

            match decode_frame(&frame) {
                Decoded::Event(event) => {
                    let terminal = event.is_terminal();
                    if terminal {
                        debug!(
                            component = "stream_reader",
                            event = "stream.frame.terminal",
                            session_id = %self.session_id,
                            generation = self.generation,
                            tag = event.event_type(),
                            "Terminal event received"
                        );
                    }
                    if !self.emit(frame.id, Input::Event(event)).await || terminal {
                        return;
                    }
                }
                Decoded::Drop(reason) => debug!(
                    component = "stream_reader",
                    event = "stream.frame.dropped",
                    session_id = %self.session_id,
                    tag = %frame.event,
                    reason = %reason,
                    "Dropping frame"
                ),
            }
        }
    }

    async fn fail(&self, message: String) {
        warn!(
            component = "stream_reader",
            event = "stream.transport.error",
            session_id = %self.session_id,
            generation = self.generation,
            error = %message,
            "Stream ended with transport error"
        );
        self.emit(None, Input::TransportError(message)).await;
    }

    /// False once the actor is gone.
    async fn emit(&self, event_id: Option<u64>, input: Input) -> bool {
        self.events
            .send(StreamInput {
                generation: self.generation,
                event_id,
                input,
            })
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_config, FakeLoader, Opened, ScriptedTransport, WAIT};
    use parley_protocol::{ChatState, Role, StreamState};

    fn spawn_with(
        transport: Arc<ScriptedTransport>,
        loader: Arc<FakeLoader>,
        config: ManagerConfig,
    ) -> SessionActorHandle {
        SessionActorHandle::spawn(SessionHandle::new("test-session"), transport, loader, config)
    }

    async fn settle(
        view: &mut SessionView,
        predicate: impl FnMut(&StreamState) -> bool,
    ) -> Arc<StreamState> {
        tokio::time::timeout(WAIT, view.wait_for(predicate))
            .await
            .expect("timed out waiting for state")
            .unwrap()
    }

    #[tokio::test]
    async fn hello_round_trip() {
        let transport = ScriptedTransport::new();
        let actor = spawn_with(transport.clone(), FakeLoader::new(vec![]), test_config());
        let mut view = actor.view();

        actor.initialize().await.unwrap();
        let outcome = actor.start_stream("hello").await.unwrap();
        assert_eq!(outcome, StartOutcome::Started { generation: 1 });

        let stream = transport.next_stream().await;
        let request = stream.start_request();
        assert_eq!(request.session_id, "test-session");
        assert_eq!(request.new_content.as_deref(), Some("hello"));

        stream.send("status", r#"{"status":"running"}"#);
        stream.send("text", r#"{"content":"Hi"}"#);
        stream.send("text", r#"{"content":" there"}"#);
        stream.send("done", r#"{"status":"completed"}"#);

        let state = settle(&mut view, |s| {
            s.chat_state == ChatState::Idle && s.messages.len() == 2
        })
        .await;
        assert_eq!(state.messages[0].role, Role::User);
        assert_eq!(state.messages[0].content, "hello");
        assert_eq!(state.messages[1].content, "Hi there");
        assert!(!state.messages[1].is_streaming);
        assert!(!actor.snapshot().stream_active);
    }

    #[tokio::test]
    async fn start_requires_initialize() {
        let transport = ScriptedTransport::new();
        let actor = spawn_with(transport.clone(), FakeLoader::new(vec![]), test_config());

        let err = actor.start_stream("hello").await.unwrap_err();
        assert_eq!(err, ManagerError::NotInitialized("test-session".to_string()));
        assert_eq!(transport.opens(), 0);
    }

    #[tokio::test]
    async fn empty_content_on_empty_transcript_is_ignored() {
        let transport = ScriptedTransport::new();
        let actor = spawn_with(transport.clone(), FakeLoader::new(vec![]), test_config());
        actor.initialize().await.unwrap();

        assert_eq!(actor.start_stream("   ").await.unwrap(), StartOutcome::Ignored);
        assert_eq!(transport.opens(), 0);
        assert!(actor.snapshot().state.messages.is_empty());
    }

    #[tokio::test]
    async fn empty_content_continues_existing_transcript() {
        let transport = ScriptedTransport::new();
        let history = vec![Message::user("earlier", "1Z")];
        let actor = spawn_with(transport.clone(), FakeLoader::new(history), test_config());
        actor.initialize().await.unwrap();

        let outcome = actor.start_stream("").await.unwrap();
        assert!(matches!(outcome, StartOutcome::Started { .. }));

        let stream = transport.next_stream().await;
        assert_eq!(stream.start_request().messages.len(), 1);
        assert_eq!(stream.start_request().new_content, None);
        assert_eq!(actor.snapshot().state.messages.len(), 1);
    }

    #[tokio::test]
    async fn stop_then_start_ignores_the_old_stream() {
        let transport = ScriptedTransport::new();
        let actor = spawn_with(transport.clone(), FakeLoader::new(vec![]), test_config());
        let mut view = actor.view();
        actor.initialize().await.unwrap();

        actor.start_stream("first").await.unwrap();
        let first = transport.next_stream().await;
        first.send("text", r#"{"content":"partial"}"#);
        settle(&mut view, |s| {
            s.streaming_message().is_some_and(|m| m.content == "partial")
        })
        .await;

        assert!(actor.stop_stream().await.unwrap());
        let stopped = actor.snapshot();
        assert_eq!(stopped.state.chat_state, ChatState::Idle);
        assert_eq!(stopped.state.messages[1].content, "partial");
        assert!(!stopped.state.messages[1].is_streaming);
        assert_eq!(stopped.state.error, None);

        actor.start_stream("second").await.unwrap();
        let second = transport.next_stream().await;
        tokio::time::timeout(WAIT, first.closed())
            .await
            .expect("old reader never released its stream");

        // Late frames on the old stream cannot reach the transcript.
        first.send("text", r#"{"content":" stale"}"#);
        second.send("text", r#"{"content":"fresh"}"#);
        second.send("done", r#"{"status":"completed"}"#);

        let state = settle(&mut view, |s| {
            s.chat_state == ChatState::Idle && s.messages.len() == 4
        })
        .await;
        assert_eq!(state.messages[1].content, "partial");
        assert_eq!(state.messages[3].content, "fresh");
        assert_eq!(transport.opens(), 2);

        tokio::time::timeout(WAIT, async {
            while transport.cancels() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("remote cancel was never attempted");
    }

    #[tokio::test]
    async fn stop_without_stream_is_a_no_op() {
        let transport = ScriptedTransport::new();
        let actor = spawn_with(transport.clone(), FakeLoader::new(vec![]), test_config());
        actor.initialize().await.unwrap();

        assert!(!actor.stop_stream().await.unwrap());
        tokio::task::yield_now().await;
        assert_eq!(transport.cancels(), 0);
    }

    #[tokio::test]
    async fn tool_call_then_transport_error_keeps_pending_call() {
        let transport = ScriptedTransport::new();
        let actor = spawn_with(transport.clone(), FakeLoader::new(vec![]), test_config());
        let mut view = actor.view();
        actor.initialize().await.unwrap();

        actor.start_stream("search please").await.unwrap();
        let stream = transport.next_stream().await;
        stream.send("toolcall", r#"{"id":"t1","name":"search"}"#);
        stream.fail("connection reset");

        let state = settle(&mut view, |s| s.error.is_some()).await;
        assert_eq!(state.chat_state, ChatState::Idle);
        let call = state.messages[1].tool_call("t1").unwrap();
        assert!(call.is_pending());
        assert!(!state.messages[1].is_streaming);
        assert!(state.error.as_deref().unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn premature_close_is_a_transport_error() {
        let transport = ScriptedTransport::new();
        let actor = spawn_with(transport.clone(), FakeLoader::new(vec![]), test_config());
        let mut view = actor.view();
        actor.initialize().await.unwrap();

        actor.start_stream("hello").await.unwrap();
        let stream = transport.next_stream().await;
        stream.send("text", r#"{"content":"Hi"}"#);
        drop(stream);

        let state = settle(&mut view, |s| s.error.is_some()).await;
        assert_eq!(state.error.as_deref(), Some(PREMATURE_CLOSE));
        assert_eq!(state.messages[1].content, "Hi");
    }

    #[tokio::test]
    async fn idle_stream_times_out() {
        let transport = ScriptedTransport::new();
        let config = ManagerConfig {
            idle_timeout: Duration::from_millis(50),
            ..test_config()
        };
        let actor = spawn_with(transport.clone(), FakeLoader::new(vec![]), config);
        let mut view = actor.view();
        actor.initialize().await.unwrap();

        actor.start_stream("hello").await.unwrap();
        let _stream = transport.next_stream().await;

        let state = settle(&mut view, |s| s.error.is_some()).await;
        assert_eq!(state.error.as_deref(), Some(STREAM_IDLE_TIMEOUT));
        assert_eq!(state.chat_state, ChatState::Idle);
    }

    #[tokio::test]
    async fn refused_connection_surfaces_as_stream_error() {
        let transport = ScriptedTransport::new();
        transport.refuse_connections();
        let actor = spawn_with(transport.clone(), FakeLoader::new(vec![]), test_config());
        let mut view = actor.view();
        actor.initialize().await.unwrap();

        actor.start_stream("hello").await.unwrap();
        let state = settle(&mut view, |s| s.error.is_some()).await;
        assert!(state.error.as_deref().unwrap().contains("connection refused"));
        assert_eq!(state.messages.len(), 1);
        assert!(!actor.snapshot().stream_active);
    }

    #[tokio::test]
    async fn undecodable_frames_are_skipped() {
        let transport = ScriptedTransport::new();
        let actor = spawn_with(transport.clone(), FakeLoader::new(vec![]), test_config());
        let mut view = actor.view();
        actor.initialize().await.unwrap();

        actor.start_stream("hello").await.unwrap();
        let stream = transport.next_stream().await;
        stream.send("text", "not json");
        stream.send("mystery", r#"{"content":"?"}"#);
        stream.send("toolresult", r#"{"id":"ghost","success":true,"content":"x"}"#);
        stream.send("text", r#"{"content":"ok"}"#);
        stream.send("done", r#"{"status":"completed"}"#);

        let state = settle(&mut view, |s| s.chat_state == ChatState::Idle && s.messages.len() == 2).await;
        assert_eq!(state.messages[1].content, "ok");
        assert!(state.messages[1].tool_calls.is_empty());
        assert_eq!(state.error, None);
    }

    #[tokio::test]
    async fn update_cache_is_refused_while_streaming() {
        let transport = ScriptedTransport::new();
        let actor = spawn_with(transport.clone(), FakeLoader::new(vec![]), test_config());
        actor.initialize().await.unwrap();
        actor.start_stream("hello").await.unwrap();
        let stream = transport.next_stream().await;

        let fresh = vec![Message::user("from server", "2Z")];
        let err = actor
            .update_cache(SessionMeta::new("test-session"), fresh.clone())
            .await
            .unwrap_err();
        assert_eq!(err, ManagerError::StreamActive("test-session".to_string()));

        stream.send("done", r#"{"status":"completed"}"#);
        let mut view = actor.view();
        settle(&mut view, |s| s.chat_state == ChatState::Idle).await;

        actor
            .update_cache(SessionMeta::new("test-session"), fresh)
            .await
            .unwrap();
        let snap = actor.snapshot();
        assert_eq!(snap.state.messages.len(), 1);
        assert_eq!(snap.state.messages[0].content, "from server");
    }

    #[tokio::test]
    async fn continuation_id_flows_into_next_start() {
        let transport = ScriptedTransport::new();
        let actor = spawn_with(transport.clone(), FakeLoader::new(vec![]), test_config());
        let mut view = actor.view();
        actor.initialize().await.unwrap();

        actor.start_stream("one").await.unwrap();
        let first = transport.next_stream().await;
        assert_eq!(first.start_request().continuation_id, None);
        first.send("session_id", r#"{"session_id":"backend-7"}"#);
        first.send("text", r#"{"content":"ok"}"#);
        first.send("done", r#"{"status":"completed"}"#);
        settle(&mut view, |s| s.chat_state == ChatState::Idle && s.messages.len() == 2).await;

        actor.start_stream("two").await.unwrap();
        let second = transport.next_stream().await;
        assert_eq!(
            second.start_request().continuation_id.as_deref(),
            Some("backend-7")
        );
        assert_eq!(second.start_request().messages.len(), 3);
    }

    #[tokio::test]
    async fn processing_flag_survives_load_without_auto_resume() {
        let transport = ScriptedTransport::new();
        let config = ManagerConfig {
            auto_resume: false,
            ..test_config()
        };
        let actor = spawn_with(transport.clone(), FakeLoader::processing(vec![]), config);
        actor.initialize().await.unwrap();

        let snap = actor.snapshot();
        assert!(snap.meta.processing);
        assert!(!snap.stream_active);
        assert_eq!(transport.opens(), 0);

        actor.resume_stream().await.unwrap();
        let stream = transport.next_stream().await;
        stream.send("done", r#"{"status":"completed"}"#);
        let mut view = actor.view();
        settle(&mut view, |s| s.chat_state == ChatState::Idle).await;
        assert!(!actor.snapshot().meta.processing);
    }

    #[tokio::test]
    async fn update_cache_clears_stale_error() {
        let transport = ScriptedTransport::new();
        let actor = spawn_with(transport.clone(), FakeLoader::new(vec![]), test_config());
        let mut view = actor.view();
        actor.initialize().await.unwrap();
        actor.start_stream("hello").await.unwrap();
        let stream = transport.next_stream().await;
        stream.fail("socket reset");
        settle(&mut view, |s| s.error.is_some()).await;

        actor
            .update_cache(
                SessionMeta::new("test-session"),
                vec![Message::user("edited", "3Z")],
            )
            .await
            .unwrap();
        let snap = actor.snapshot();
        assert_eq!(snap.state.error, None);
        assert_eq!(snap.state.messages[0].content, "edited");
    }

    #[tokio::test]
    async fn processing_session_resumes_from_last_event_id() {
        let transport = ScriptedTransport::new();
        let actor = spawn_with(
            transport.clone(),
            FakeLoader::processing(vec![Message::user("running job", "1Z")]),
            test_config(),
        );
        let mut view = actor.view();
        actor.initialize().await.unwrap();
        assert!(actor.snapshot().stream_active);

        let stream = transport.next_stream().await;
        match &stream.opened {
            Opened::Attach(request) => assert_eq!(request.last_event_id, None),
            Opened::Start(_) => panic!("expected attach"),
        }
        stream.send_with_id(4, "text", r#"{"content":"resumed"}"#);
        settle(&mut view, |s| s.messages.len() == 2).await;
        drop(stream);
        settle(&mut view, |s| s.error.is_some()).await;

        actor.resume_stream().await.unwrap();
        let again = transport.next_stream().await;
        match &again.opened {
            Opened::Attach(request) => assert_eq!(request.last_event_id, Some(4)),
            Opened::Start(_) => panic!("expected attach"),
        }
    }

    #[tokio::test]
    async fn notification_round_trip() {
        let transport = ScriptedTransport::new();
        let actor = spawn_with(transport.clone(), FakeLoader::new(vec![]), test_config());
        let mut view = actor.view();
        actor.initialize().await.unwrap();

        actor.start_stream("deploy").await.unwrap();
        let stream = transport.next_stream().await;
        stream.send(
            "notification",
            r#"{"request_id":"r1","kind":"confirmation","message":"Proceed?"}"#,
        );
        settle(&mut view, |s| s.chat_state == ChatState::WaitingForUserInput).await;

        assert!(!actor.resolve_notification("unknown").await.unwrap());
        assert!(actor.resolve_notification("r1").await.unwrap());
        let snap = actor.snapshot();
        assert!(snap.state.notifications.is_empty());
        assert_eq!(snap.state.chat_state, ChatState::Streaming);
    }

    #[tokio::test]
    async fn failed_load_can_be_retried() {
        let transport = ScriptedTransport::new();
        let loader = FakeLoader::failing("no such session");
        let actor = spawn_with(transport, loader.clone(), test_config());

        let err = actor.initialize().await.unwrap_err();
        assert!(matches!(err, ManagerError::SessionLoad { .. }));
        let snap = actor.snapshot();
        assert!(snap.state.load_error.is_some());
        assert_eq!(snap.state.error, None);
        assert_eq!(snap.state.chat_state, ChatState::Idle);

        loader.succeed_with(vec![Message::user("hi", "1Z")]);
        actor.initialize().await.unwrap();
        let snap = actor.snapshot();
        assert_eq!(snap.state.load_error, None);
        assert_eq!(snap.state.messages.len(), 1);
        assert_eq!(loader.loads(), 2);
    }

    #[tokio::test]
    async fn slow_load_times_out() {
        let transport = ScriptedTransport::new();
        let loader = FakeLoader::slow(vec![], Duration::from_millis(200));
        let config = ManagerConfig {
            load_timeout: Duration::from_millis(20),
            ..test_config()
        };
        let actor = spawn_with(transport, loader, config);

        let err = actor.initialize().await.unwrap_err();
        match err {
            ManagerError::SessionLoad { message, .. } => assert!(message.contains("Timed out")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn commands_after_shutdown_report_actor_gone() {
        let transport = ScriptedTransport::new();
        let actor = spawn_with(transport, FakeLoader::new(vec![]), test_config());
        actor.shutdown().await;

        let err = actor.initialize().await.unwrap_err();
        assert_eq!(err, ManagerError::ActorGone("test-session".to_string()));
    }
}
