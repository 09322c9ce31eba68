//! Streaming helpers for the engine side of a chat relay.
//!
//! Ollama streams newline-delimited JSON. [`ndjson_lines`] splits a byte
//! stream into lines across chunk boundaries, [`decode_chat_line`] turns one
//! line into a fragment, and [`terminated`] guarantees that whatever the
//! engine does, the relayed sequence ends with exactly one terminal fragment.

use std::fmt::Display;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use tracing::{debug, warn};

use super::errors::EngineError;
use super::types::{ChatFragment, EngineChatChunk};

/// Longest NDJSON line accepted from the engine.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

struct LineState<S> {
    bytes: Pin<Box<S>>,
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to hold no newline.
    scanned: usize,
    finished: bool,
}

/// Split a byte stream into non-blank lines (without the trailing newline).
///
/// A transport error, or a line longer than [`MAX_LINE_BYTES`], ends the
/// stream after yielding one `EngineError::Stream`.
pub fn ndjson_lines<S, E>(bytes: S) -> impl Stream<Item = Result<Vec<u8>, EngineError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    ndjson_lines_with_limit(bytes, MAX_LINE_BYTES)
}

fn ndjson_lines_with_limit<S, E>(
    bytes: S,
    max_line: usize,
) -> impl Stream<Item = Result<Vec<u8>, EngineError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = LineState {
        bytes: Box::pin(bytes),
        buffer: Vec::new(),
        scanned: 0,
        finished: false,
    };

    stream::unfold(state, move |mut state| async move {
        loop {
            if let Some(pos) = state.buffer[state.scanned..].iter().position(|b| *b == b'\n') {
                let end = state.scanned + pos;
                let mut line: Vec<u8> = state.buffer.drain(..=end).collect();
                state.scanned = 0;
                line.pop();
                if line.len() > max_line {
                    state.finished = true;
                    state.buffer.clear();
                    return Some((Err(line_too_long(max_line)), state));
                }
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                return Some((Ok(line), state));
            }
            state.scanned = state.buffer.len();

            if state.buffer.len() > max_line {
                state.finished = true;
                state.buffer.clear();
                state.scanned = 0;
                return Some((Err(line_too_long(max_line)), state));
            }

            if state.finished {
                if state.buffer.iter().all(u8::is_ascii_whitespace) {
                    return None;
                }
                // Last line without a trailing newline.
                state.scanned = 0;
                let line = std::mem::take(&mut state.buffer);
                return Some((Ok(line), state));
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => state.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    state.finished = true;
                    state.buffer.clear();
                    state.scanned = 0;
                    let err = EngineError::Stream {
                        reason: format!("read error: {e}"),
                    };
                    return Some((Err(err), state));
                }
                None => state.finished = true,
            }
        }
    })
}

fn line_too_long(max_line: usize) -> EngineError {
    EngineError::Stream {
        reason: format!("engine line exceeds {max_line} bytes"),
    }
}

/// Decode one NDJSON line of a streaming `/api/chat` response.
///
/// Returns `None` for lines that carry no content (the final `done` line,
/// empty deltas, or undecodable JSON) so they are skipped rather than
/// failing the stream.
pub fn decode_chat_line(line: &[u8]) -> Option<Result<ChatFragment, EngineError>> {
    let chunk: EngineChatChunk = match serde_json::from_slice(line) {
        Ok(chunk) => chunk,
        Err(e) => {
            debug!(error = %e, "Skipping undecodable engine line");
            return None;
        }
    };

    if let Some(reason) = chunk.error {
        return Some(Err(EngineError::Stream { reason }));
    }

    let content = chunk.message.and_then(|m| m.content)?;
    if content.is_empty() {
        return None;
    }
    Some(Ok(ChatFragment::content(content)))
}

/// Close a fragment stream with exactly one terminal fragment.
///
/// The terminal fragment is emitted when the inner stream ends, yields its
/// own terminal fragment, fails, or stays silent longer than `idle_timeout`.
/// Nothing is pulled from the inner stream after that.
pub fn terminated<S>(inner: S, idle_timeout: Option<Duration>) -> impl Stream<Item = ChatFragment> + Send
where
    S: Stream<Item = Result<ChatFragment, EngineError>> + Send + 'static,
{
    stream::unfold(Some(Box::pin(inner)), move |state| async move {
        let mut inner = state?;

        let next = match idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, inner.next()).await {
                Ok(next) => next,
                Err(_) => {
                    warn!(
                        idle_secs = limit.as_secs(),
                        "Engine stream idle, closing with terminal fragment"
                    );
                    return Some((ChatFragment::stop(), None));
                }
            },
            None => inner.next().await,
        };

        match next {
            Some(Ok(fragment)) if fragment.is_terminal() => Some((ChatFragment::stop(), None)),
            Some(Ok(fragment)) => Some((fragment, Some(inner))),
            Some(Err(e)) => {
                warn!(error = %e, "Engine stream failed, closing with terminal fragment");
                Some((ChatFragment::stop(), None))
            }
            None => Some((ChatFragment::stop(), None)),
        }
    })
}
