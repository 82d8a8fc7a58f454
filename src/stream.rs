//! Consumer side of a streamed generation.

use tokio::sync::mpsc;

use crate::client::ClientError;

/// Receives the decoded payloads of one streamed call.
///
/// `on_chunk` runs once per payload, in order. Then exactly one of `on_done`
/// or `on_error` runs, unless the call was cancelled or the session could not
/// be refreshed. In both of those cases neither runs: a dead session is
/// handled by the re-authentication redirect, not reported to the sink.
pub trait ChunkSink: Send {
    fn on_chunk(&mut self, text: &str);

    fn on_done(&mut self);

    fn on_error(&mut self, error: ClientError);
}

/// How a streamed call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Cancelled,
    Failed,
    /// The session expired and could not be refreshed.
    Unauthenticated,
}

/// Sink that appends every chunk to one growing text.
#[derive(Debug, Default)]
pub struct TextAccumulator {
    text: String,
    chunks: usize,
    done: bool,
    error: Option<ClientError>,
}

impl TextAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    /// Number of chunks received so far.
    pub fn chunks(&self) -> usize {
        self.chunks
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn error(&self) -> Option<&ClientError> {
        self.error.as_ref()
    }
}

impl ChunkSink for TextAccumulator {
    fn on_chunk(&mut self, text: &str) {
        self.text.push_str(text);
        self.chunks += 1;
    }

    fn on_done(&mut self) {
        self.done = true;
    }

    fn on_error(&mut self, error: ClientError) {
        self.error = Some(error);
    }
}

/// Streaming event, for consumers that live on another task.
#[derive(Debug)]
pub enum StreamEvent {
    Chunk(String),
    Done,
    Error(ClientError),
}

/// Forwards every callback as a [`StreamEvent`]. A closed receiver is ignored.
impl ChunkSink for mpsc::UnboundedSender<StreamEvent> {
    fn on_chunk(&mut self, text: &str) {
        let _ = self.send(StreamEvent::Chunk(text.to_string()));
    }

    fn on_done(&mut self) {
        let _ = self.send(StreamEvent::Done);
    }

    fn on_error(&mut self, error: ClientError) {
        let _ = self.send(StreamEvent::Error(error));
    }
}
