//! Server-sent event framing
//!
//! Splits a byte stream into `event:` / `data:` / `id:` blocks. Comment lines
//! and blocks without data (keep-alive pings) are skipped.

use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};
use futures::{stream, Stream, StreamExt};
use parley_protocol::RawFrame;
use tracing::warn;

use crate::{ConnectorError, FrameStream};

/// Upper bound on buffered bytes without a complete event.
const MAX_SSE_BUFFER_BYTES: usize = 4 * 1024 * 1024;
const DEFAULT_EVENT: &str = "message";

fn find_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n");
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a <= b { (a, 2) } else { (b, 4) }),
        (Some(a), None) => Some((a, 2)),
        (None, Some(b)) => Some((b, 4)),
        (None, None) => None,
    }
}

fn parse_block(block: &str) -> Option<RawFrame> {
    let mut event: Option<String> = None;
    let mut data = String::new();
    let mut has_data = false;
    let mut id = None;

    for line in block.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event = Some(value.to_string()),
            "data" => {
                if has_data {
                    data.push('\n');
                }
                data.push_str(value);
                has_data = true;
            }
            "id" => id = value.trim().parse::<u64>().ok(),
            _ => {}
        }
    }

    if !has_data {
        return None;
    }
    Some(RawFrame {
        event: event.unwrap_or_else(|| DEFAULT_EVENT.to_string()),
        data,
        id,
    })
}

/// Incremental SSE parser
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<RawFrame>, ConnectorError> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some((pos, delim_len)) = find_event_boundary(&self.buffer) {
            let block = self.buffer.split_to(pos);
            self.buffer.advance(delim_len);

            match std::str::from_utf8(&block) {
                Ok(text) => frames.extend(parse_block(text)),
                Err(e) => warn!(
                    component = "sse",
                    event = "sse.block.invalid_utf8",
                    error = %e,
                    block_bytes = block.len(),
                    "Skipping SSE block with invalid UTF-8"
                ),
            }
        }

        if self.buffer.len() > MAX_SSE_BUFFER_BYTES {
            return Err(ConnectorError::Stream(
                "SSE buffer exceeded maximum size (4 MiB)".to_string(),
            ));
        }
        Ok(frames)
    }
}

struct FrameState<S> {
    body: std::pin::Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<RawFrame>,
    finished: bool,
}

/// Adapt a response body into a stream of frames.
///
/// Ends when the body ends; a trailing block without its blank-line
/// terminator is discarded. A body error is yielded once and ends the stream.
pub fn frame_stream<S, E>(body: S) -> FrameStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<ConnectorError> + Send + 'static,
{
    let state = FrameState {
        body: Box::pin(body),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(frame) = state.pending.pop_front() {
                return Some((Ok(frame), state));
            }
            if state.finished {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => match state.decoder.push(&chunk) {
                    Ok(frames) => state.pending.extend(frames),
                    Err(e) => {
                        state.finished = true;
                        return Some((Err(e), state));
                    }
                },
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(e.into()), state));
                }
                None => state.finished = true,
            }
        }
    })
    .boxed()
}
