//! In-memory transport and loader for actor and registry tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::{stream, StreamExt};
use parley_connectors::{ConnectorError, FrameStream, SessionLoader, Transport};
use parley_protocol::{
    AttachRequest, LoadedSession, Message, RawFrame, SessionMeta, StartRequest, StopRequest,
};
use tokio::sync::mpsc;

use crate::config::ManagerConfig;

pub const WAIT: Duration = Duration::from_secs(2);

pub fn test_config() -> ManagerConfig {
    ManagerConfig {
        idle_timeout: Duration::from_secs(5),
        load_timeout: Duration::from_secs(1),
        command_capacity: 16,
        auto_resume: true,
    }
}

#[derive(Debug, Clone)]
pub enum Opened {
    Start(StartRequest),
    Attach(AttachRequest),
}

/// Server side of one opened stream.
pub struct ScriptedStream {
    pub opened: Opened,
    tx: mpsc::UnboundedSender<Result<RawFrame, ConnectorError>>,
}

impl ScriptedStream {
    pub fn start_request(&self) -> &StartRequest {
        match &self.opened {
            Opened::Start(request) => request,
            Opened::Attach(request) => panic!("expected start, got attach {request:?}"),
        }
    }

    pub fn send(&self, event: &str, data: &str) {
        let _ = self.tx.send(Ok(RawFrame::new(event, data)));
    }

    pub fn send_with_id(&self, id: u64, event: &str, data: &str) {
        let _ = self.tx.send(Ok(RawFrame::new(event, data).with_id(id)));
    }

    pub fn fail(&self, message: &str) {
        let _ = self.tx.send(Err(ConnectorError::Stream(message.to_string())));
    }

    /// Resolves once the reader dropped its end of the stream.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }
}

pub struct ScriptedTransport {
    opened_tx: mpsc::UnboundedSender<ScriptedStream>,
    opened_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ScriptedStream>>,
    opens: AtomicUsize,
    cancels: AtomicUsize,
    refuse: AtomicBool,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        let (opened_tx, opened_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            opened_tx,
            opened_rx: tokio::sync::Mutex::new(opened_rx),
            opens: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
            refuse: AtomicBool::new(false),
        })
    }

    /// Next stream the manager opened.
    pub async fn next_stream(&self) -> ScriptedStream {
        let mut rx = self.opened_rx.lock().await;
        tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for a stream to open")
            .expect("transport dropped")
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn refuse_connections(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    fn connect(&self, opened: Opened) -> Result<FrameStream, ConnectorError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ConnectorError::Stream("connection refused".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = self.opened_tx.send(ScriptedStream { opened, tx });
        Ok(stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed())
    }
}

impl Transport for ScriptedTransport {
    fn open(&self, request: StartRequest) -> BoxFuture<'_, Result<FrameStream, ConnectorError>> {
        Box::pin(async move { self.connect(Opened::Start(request)) })
    }

    fn attach(
        &self,
        request: AttachRequest,
    ) -> BoxFuture<'_, Result<FrameStream, ConnectorError>> {
        Box::pin(async move { self.connect(Opened::Attach(request)) })
    }

    fn cancel(&self, _request: StopRequest) -> BoxFuture<'_, Result<(), ConnectorError>> {
        Box::pin(async move {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            Err(ConnectorError::Status {
                status: 503,
                body: "cancel unavailable".to_string(),
            })
        })
    }
}

/// Loader returning a fixed transcript, counting calls.
pub struct FakeLoader {
    loads: AtomicUsize,
    delay: Duration,
    result: Mutex<Result<LoadedSession, String>>,
}

impl FakeLoader {
    pub fn new(messages: Vec<Message>) -> Arc<Self> {
        Self::build(messages, false, Duration::ZERO)
    }

    pub fn slow(messages: Vec<Message>, delay: Duration) -> Arc<Self> {
        Self::build(messages, false, delay)
    }

    /// A loader whose session is still running server-side.
    pub fn processing(messages: Vec<Message>) -> Arc<Self> {
        Self::build(messages, true, Duration::ZERO)
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            loads: AtomicUsize::new(0),
            delay: Duration::ZERO,
            result: Mutex::new(Err(message.to_string())),
        })
    }

    fn build(messages: Vec<Message>, processing: bool, delay: Duration) -> Arc<Self> {
        let mut session = SessionMeta::new("loaded");
        session.processing = processing;
        Arc::new(Self {
            loads: AtomicUsize::new(0),
            delay,
            result: Mutex::new(Ok(LoadedSession { session, messages })),
        })
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn succeed_with(&self, messages: Vec<Message>) {
        *self.result.lock().unwrap() = Ok(LoadedSession {
            session: SessionMeta::new("loaded"),
            messages,
        });
    }
}

impl SessionLoader for FakeLoader {
    fn load<'a>(
        &'a self,
        session_id: &'a str,
    ) -> BoxFuture<'a, Result<LoadedSession, ConnectorError>> {
        Box::pin(async move {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let result = self.result.lock().unwrap().clone();
            match result {
                Ok(mut loaded) => {
                    loaded.session.id = session_id.to_string();
                    Ok(loaded)
                }
                Err(message) => Err(ConnectorError::NotFound(message)),
            }
        })
    }
}
