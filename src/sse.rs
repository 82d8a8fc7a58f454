//! Server-Sent Events (SSE) stream processing.
//!
//! Turns a chunked byte stream into the ordered sequence of `data:` payloads
//! it carries. Chunk boundaries may fall anywhere: inside a line, inside a
//! field name, or in the middle of a multi-byte UTF-8 sequence.
//!
//! SSE format honored:
//! ```text
//! : comment, ignored
//! event: message
//! data: first token
//!
//! data: second token
//! data: [DONE]
//! ```
//!
//! Only `data:` lines are meaningful. Each one is significant on its own;
//! lines are not grouped into multi-line records. Payloads that are empty
//! after trimming, or equal to the `[DONE]` sentinel, are dropped.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, Stream};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::ClientError;
use crate::http::ResponseBytes;

/// Payload the generation backend uses to mark the logical end of output.
pub const DONE_SENTINEL: &str = "[DONE]";

const DATA_PREFIX: &str = "data:";

/// A pull-based source of raw body bytes.
///
/// `pull` yields `Ok(None)` once the source is exhausted. `cancel` abandons
/// the underlying transfer. `release` frees the source and is called exactly
/// once by whoever drives it, on every exit path.
#[async_trait]
pub trait ByteSource: Send {
    async fn pull(&mut self) -> Result<Option<Bytes>, ClientError>;

    fn cancel(&mut self);

    fn release(&mut self);
}

#[async_trait]
impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    async fn pull(&mut self) -> Result<Option<Bytes>, ClientError> {
        (**self).pull().await
    }

    fn cancel(&mut self) {
        (**self).cancel()
    }

    fn release(&mut self) {
        (**self).release()
    }
}

#[async_trait]
impl<S: ByteSource + ?Sized> ByteSource for &mut S {
    async fn pull(&mut self) -> Result<Option<Bytes>, ClientError> {
        (**self).pull().await
    }

    fn cancel(&mut self) {
        (**self).cancel()
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// Holds a source for the duration of a parse and releases it on drop.
///
/// Dropping covers every way out: normal completion, `?` on a pull error,
/// cancellation, and the parsing future itself being dropped mid-await.
pub(crate) struct SourceGuard<S: ByteSource> {
    source: S,
}

impl<S: ByteSource> SourceGuard<S> {
    pub(crate) fn new(source: S) -> Self {
        Self { source }
    }
}

impl<S: ByteSource> Deref for SourceGuard<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.source
    }
}

impl<S: ByteSource> DerefMut for SourceGuard<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.source
    }
}

impl<S: ByteSource> Drop for SourceGuard<S> {
    fn drop(&mut self) {
        self.source.release();
    }
}

/// Incremental UTF-8 decoder.
///
/// Bytes of a code point split across chunks are held back until the rest
/// arrives. Invalid sequences decode to U+FFFD instead of failing.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of `bytes` (plus any held-back prefix) as is complete.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let input = std::mem::take(&mut self.pending);
        let mut out = String::with_capacity(input.len());
        let mut rest = &input[..];

        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    if let Ok(s) = std::str::from_utf8(&rest[..valid]) {
                        out.push_str(s);
                    }
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &rest[valid + len..];
                        }
                        None => {
                            // Truncated sequence at the end: wait for more bytes.
                            self.pending = rest[valid..].to_vec();
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    /// Flush held-back bytes at end of stream.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        let pending = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&pending).into_owned()
    }

    /// Number of raw bytes waiting for the rest of their code point.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Accumulates decoded text and hands out complete `\n`-terminated lines.
///
/// After every `push` at most one unterminated line remains buffered.
#[derive(Debug, Default)]
pub struct LineBuffer {
    partial: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append text and return every line it completed, without terminators.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.partial.push_str(text);

        let Some(last_newline) = self.partial.rfind('\n') else {
            return Vec::new();
        };

        let rest = self.partial.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.partial, rest);
        complete[..last_newline]
            .split('\n')
            .map(str::to_string)
            .collect()
    }

    /// Take the unterminated remainder, leaving the buffer empty.
    pub fn take_remainder(&mut self) -> String {
        std::mem::take(&mut self.partial)
    }

    pub fn remaining(&self) -> &str {
        &self.partial
    }
}

/// A classified SSE line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseLine<'a> {
    /// A `data:` field and its trimmed payload.
    Data(&'a str),
    /// `event:`, `id:`, `retry:`, comments, blank lines, anything else.
    Other,
}

/// Classify a raw line.
pub fn classify(line: &str) -> SseLine<'_> {
    match parse_sse_line(line) {
        Some(payload) => SseLine::Data(payload),
        None => SseLine::Other,
    }
}

/// Parse an SSE line to extract the data portion.
///
/// The line is trimmed first, so leading whitespace and a trailing `\r` are
/// tolerated.
///
/// # Example
/// ```
/// use cfforge_client::sse::parse_sse_line;
///
/// assert_eq!(parse_sse_line("data: {\"key\": \"value\"}"), Some("{\"key\": \"value\"}"));
/// assert_eq!(parse_sse_line("  data:tight\r"), Some("tight"));
/// assert_eq!(parse_sse_line("event: message"), None);
/// ```
pub fn parse_sse_line(line: &str) -> Option<&str> {
    line.trim().strip_prefix(DATA_PREFIX).map(str::trim)
}

/// Check if an SSE payload is the end-of-output sentinel.
///
/// # Example
/// ```
/// use cfforge_client::sse::is_done_marker;
///
/// assert!(is_done_marker("[DONE]"));
/// assert!(!is_done_marker(""));
/// assert!(!is_done_marker("{\"data\": \"value\"}"));
/// ```
pub fn is_done_marker(data: &str) -> bool {
    data == DONE_SENTINEL
}

/// Payload to forward for a complete line, if any.
fn forwardable(line: &str) -> Option<&str> {
    match classify(line) {
        SseLine::Data(payload) if !payload.is_empty() && !is_done_marker(payload) => Some(payload),
        _ => None,
    }
}

/// How a parse run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    /// The source was exhausted and `on_complete` ran.
    Completed,
    /// The cancellation token fired; `on_complete` did not run.
    Cancelled,
}

/// Drive `source` to exhaustion, forwarding each qualifying payload.
///
/// `on_payload` is called once per `data:` line in completion order.
/// `on_complete` is called exactly once when the source is exhausted, after
/// the unterminated tail (if any) has been processed as a final line.
///
/// If `cancel` fires before or during a pull, the source is cancelled, any
/// buffered input is discarded, and neither callback runs again. A pull error
/// is returned without calling `on_complete`. The source is released exactly
/// once in every case.
pub async fn parse_sse_stream<S, P, C>(
    source: S,
    cancel: &CancellationToken,
    mut on_payload: P,
    on_complete: C,
) -> Result<ParseOutcome, ClientError>
where
    S: ByteSource,
    P: FnMut(String),
    C: FnOnce(),
{
    let mut source = SourceGuard::new(source);
    let mut decoder = Utf8Decoder::new();
    let mut lines = LineBuffer::new();

    loop {
        let pulled = if cancel.is_cancelled() {
            None
        } else {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                pulled = source.pull() => Some(pulled),
            }
        };

        let Some(pulled) = pulled else {
            debug!(buffered = lines.remaining().len(), "SSE stream cancelled");
            source.cancel();
            return Ok(ParseOutcome::Cancelled);
        };

        match pulled? {
            Some(chunk) => {
                let text = decoder.decode(&chunk);
                for line in lines.push(&text) {
                    if cancel.is_cancelled() {
                        break;
                    }
                    if let Some(payload) = forwardable(&line) {
                        on_payload(payload.to_string());
                    }
                }
            }
            None => {
                let mut tail = lines.take_remainder();
                tail.push_str(&decoder.finish());
                if let Some(payload) = forwardable(&tail) {
                    on_payload(payload.to_string());
                }
                on_complete();
                return Ok(ParseOutcome::Completed);
            }
        }
    }
}

struct PayloadState<S: ByteSource> {
    source: SourceGuard<S>,
    decoder: Utf8Decoder,
    lines: LineBuffer,
    ready: VecDeque<String>,
    finished: bool,
}

/// The same pipeline as [`parse_sse_stream`], exposed as a `Stream`.
///
/// Yields payloads in order and ends when the source is exhausted. A pull
/// error is yielded once and ends the stream. Dropping the stream releases
/// the source.
pub fn sse_payloads<S>(source: S) -> impl Stream<Item = Result<String, ClientError>> + Send
where
    S: ByteSource + 'static,
{
    let state = PayloadState {
        source: SourceGuard::new(source),
        decoder: Utf8Decoder::new(),
        lines: LineBuffer::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(payload) = state.ready.pop_front() {
                return Some((Ok(payload), state));
            }
            if state.finished {
                return None;
            }

            match state.source.pull().await {
                Ok(Some(chunk)) => {
                    let text = state.decoder.decode(&chunk);
                    for line in state.lines.push(&text) {
                        if let Some(payload) = forwardable(&line) {
                            state.ready.push_back(payload.to_string());
                        }
                    }
                }
                Ok(None) => {
                    state.finished = true;
                    let mut tail = state.lines.take_remainder();
                    tail.push_str(&state.decoder.finish());
                    if let Some(payload) = forwardable(&tail) {
                        state.ready.push_back(payload.to_string());
                    }
                }
                Err(e) => {
                    state.finished = true;
                    return Some((Err(e), state));
                }
            }
        }
    })
}

/// Extension trait for `reqwest::Response` to enable SSE streaming.
///
/// # Example
/// ```ignore
/// use cfforge_client::sse::SseResponseExt;
///
/// let response = client.get("https://forge.example.com/stream").send().await?;
/// let mut stream = Box::pin(response.sse());
/// while let Some(result) = stream.next().await {
///     println!("SSE data: {}", result?);
/// }
/// ```
pub trait SseResponseExt {
    /// Convert the response into a stream of SSE `data:` payloads.
    fn sse(self) -> impl Stream<Item = Result<String, ClientError>> + Send;
}

impl SseResponseExt for reqwest::Response {
    fn sse(self) -> impl Stream<Item = Result<String, ClientError>> + Send {
        sse_payloads(ResponseBytes::new(self))
    }
}
