//! HTTP + SSE backend
//!
//! Talks to the chat session routes:
//! `POST /chat/sessions/{id}/messages`, `GET /chat/sessions/{id}/stream`,
//! `POST /chat/sessions/{id}/cancel` and `GET /chat/sessions/{id}`.

use std::time::Duration;

use futures::future::BoxFuture;
use parley_protocol::{
    AttachRequest, LoadedSession, Message, SessionMeta, StartRequest, StopRequest, TokenState,
};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::{Client, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::sse::frame_stream;
use crate::transcript::messages_from_json;
use crate::{ConnectorError, FrameStream, SessionLoader, Transport};

const CONNECT_TIMEOUT_SECS: u64 = 15;
const MAX_ERROR_BODY_BYTES: usize = 8 * 1024;

/// Transport and loader backed by the chat HTTP API
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
}

#[derive(Serialize)]
struct SendMessageBody<'a> {
    content: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    continuation_id: Option<&'a str>,
}

#[derive(Deserialize)]
struct SessionDocument {
    session_id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    messages_json: Option<String>,
    #[serde(default)]
    total_tokens: Option<u64>,
    #[serde(default)]
    input_tokens: Option<u64>,
    #[serde(default)]
    output_tokens: Option<u64>,
    #[serde(default)]
    compaction_count: Option<u32>,
    #[serde(default)]
    is_processing: bool,
}

impl SessionDocument {
    fn into_loaded(self) -> Result<LoadedSession, ConnectorError> {
        let messages = match self.messages_json.as_deref() {
            Some(raw) if !raw.trim().is_empty() => messages_from_json(raw)?,
            _ => Vec::new(),
        };
        let session = SessionMeta {
            id: self.session_id,
            name: self.title.or(self.name),
            token_state: TokenState {
                input_tokens: self.input_tokens.unwrap_or(0),
                output_tokens: self.output_tokens.unwrap_or(0),
                total_tokens: self.total_tokens.unwrap_or(0),
                compaction_count: self.compaction_count.unwrap_or(0),
            },
            continuation_id: None,
            processing: self.is_processing,
        };
        Ok(LoadedSession { session, messages })
    }
}

impl HttpBackend {
    pub fn new(base_url: &str) -> Result<Self, ConnectorError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()?;
        Self::with_client(client, base_url)
    }

    pub fn with_client(client: Client, base_url: &str) -> Result<Self, ConnectorError> {
        let base_url =
            Url::parse(base_url).map_err(|e| ConnectorError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ConnectorError::InvalidUrl(base_url.to_string()));
        }
        Ok(Self { client, base_url })
    }

    /// `{base}/chat/sessions/{id}[/{action}]`, with the id percent-encoded.
    fn session_url(&self, session_id: &str, action: Option<&str>) -> Result<Url, ConnectorError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ConnectorError::InvalidUrl(self.base_url.to_string()))?;
            segments.pop_if_empty().extend(["chat", "sessions", session_id]);
            if let Some(action) = action {
                segments.push(action);
            }
        }
        Ok(url)
    }

    async fn open_stream(
        &self,
        session_id: &str,
        last_event_id: Option<u64>,
    ) -> Result<FrameStream, ConnectorError> {
        let mut url = self.session_url(session_id, Some("stream"))?;
        if let Some(id) = last_event_id {
            url.query_pairs_mut()
                .append_pair("last_event_id", &id.to_string());
        }

        debug!(
            component = "http_backend",
            event = "http.stream.open",
            session_id = %session_id,
            last_event_id = ?last_event_id,
            "Opening event stream"
        );

        let response = self
            .client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?;
        let response = check_status(response, session_id).await?;
        Ok(frame_stream(response.bytes_stream()))
    }

    async fn submit(&self, request: &StartRequest, content: &str) -> Result<(), ConnectorError> {
        let url = self.session_url(&request.session_id, Some("messages"))?;
        let body = SendMessageBody {
            content,
            messages: &request.messages,
            continuation_id: request.continuation_id.as_deref(),
        };
        let response = self.client.post(url).json(&body).send().await?;
        check_status(response, &request.session_id).await?;
        Ok(())
    }
}

async fn check_status(response: Response, session_id: &str) -> Result<Response, ConnectorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(ConnectorError::NotFound(session_id.to_string()));
    }
    Err(ConnectorError::Status {
        status: status.as_u16(),
        body: read_capped_body(response).await,
    })
}

async fn read_capped_body(response: Response) -> String {
    match response.bytes().await {
        Ok(bytes) => {
            let end = bytes.len().min(MAX_ERROR_BODY_BYTES);
            String::from_utf8_lossy(&bytes[..end]).into_owned()
        }
        Err(e) => format!("<failed to read body: {e}>"),
    }
}

impl Transport for HttpBackend {
    fn open(&self, request: StartRequest) -> BoxFuture<'_, Result<FrameStream, ConnectorError>> {
        Box::pin(async move {
            match request.new_content.as_deref() {
                Some(content) => self.submit(&request, content).await?,
                None => debug!(
                    component = "http_backend",
                    event = "http.submit.skipped",
                    session_id = %request.session_id,
                    "Continuing without a new message"
                ),
            }
            self.open_stream(&request.session_id, None).await
        })
    }

    fn attach(
        &self,
        request: AttachRequest,
    ) -> BoxFuture<'_, Result<FrameStream, ConnectorError>> {
        Box::pin(async move {
            self.open_stream(&request.session_id, request.last_event_id)
                .await
        })
    }

    fn cancel(&self, request: StopRequest) -> BoxFuture<'_, Result<(), ConnectorError>> {
        Box::pin(async move {
            let url = self.session_url(&request.session_id, Some("cancel"))?;
            let response = self.client.post(url).send().await?;
            check_status(response, &request.session_id).await?;
            Ok(())
        })
    }
}

impl SessionLoader for HttpBackend {
    fn load<'a>(
        &'a self,
        session_id: &'a str,
    ) -> BoxFuture<'a, Result<LoadedSession, ConnectorError>> {
        Box::pin(async move {
            let url = self.session_url(session_id, None)?;
            let response = self.client.get(url).send().await?;
            let response = check_status(response, session_id).await?;
            let document: SessionDocument = serde_json::from_slice(&response.bytes().await?)?;
            document.into_loaded()
        })
    }
}
