//! Parley Connectors
//!
//! Transports that carry a session's event stream and loaders that bootstrap
//! a session's transcript. The manager only sees the [`Transport`] and
//! [`SessionLoader`] traits; [`HttpBackend`] implements both over HTTP + SSE.

pub mod http;
pub mod sse;
pub mod transcript;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use parley_protocol::{AttachRequest, LoadedSession, RawFrame, StartRequest, StopRequest};
use thiserror::Error;

pub use http::HttpBackend;

/// Errors that can occur in connectors
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Stream error: {0}")]
    Stream(String),
}

/// Frames of one open stream, in arrival order.
pub type FrameStream = BoxStream<'static, Result<RawFrame, ConnectorError>>;

/// Carries one session's event stream.
pub trait Transport: Send + Sync + 'static {
    /// Submit a turn and open the stream carrying its events.
    fn open(&self, request: StartRequest) -> BoxFuture<'_, Result<FrameStream, ConnectorError>>;

    /// Re-attach to a turn that is still running server-side.
    fn attach(&self, request: AttachRequest)
        -> BoxFuture<'_, Result<FrameStream, ConnectorError>>;

    /// Ask the server to stop in-flight work. Best-effort.
    fn cancel(&self, request: StopRequest) -> BoxFuture<'_, Result<(), ConnectorError>>;
}

/// Supplies the initial transcript for a session.
pub trait SessionLoader: Send + Sync + 'static {
    fn load<'a>(&'a self, session_id: &'a str)
        -> BoxFuture<'a, Result<LoadedSession, ConnectorError>>;
}
