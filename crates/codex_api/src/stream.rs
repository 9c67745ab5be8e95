use std::collections::VecDeque;
use std::pin::Pin;

use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::CodexApiError;
use crate::events::CodexStreamEvent;
use crate::sse::SseStreamParser;

type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, CodexApiError>> + Send>>;

/// Pull-based view over a response body, yielding decoded events in order.
pub struct CodexEventStream {
    bytes: ByteStream,
    parser: SseStreamParser,
    pending: VecDeque<CodexStreamEvent>,
    exhausted: bool,
}

impl std::fmt::Debug for CodexEventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodexEventStream")
            .field("pending", &self.pending.len())
            .field("skipped", &self.parser.skipped())
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

impl CodexEventStream {
    pub fn from_byte_stream<S, B, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<B, E>> + Send + 'static,
        B: AsRef<[u8]>,
        E: Into<CodexApiError>,
    {
        let bytes = stream.map(|chunk| chunk.map(|bytes| bytes.as_ref().to_vec()).map_err(Into::into));
        Self {
            bytes: Box::pin(bytes),
            parser: SseStreamParser::default(),
            pending: VecDeque::new(),
            exhausted: false,
        }
    }

    pub fn from_response(response: reqwest::Response) -> Self {
        Self::from_byte_stream(response.bytes_stream())
    }

    /// Next decoded event; `None` once the body is finished. A transport
    /// error is returned once and ends the stream.
    pub async fn next_event(&mut self) -> Option<Result<CodexStreamEvent, CodexApiError>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            if self.exhausted {
                return None;
            }
            match self.bytes.next().await {
                Some(Ok(chunk)) => self.pending.extend(self.parser.feed(&chunk)),
                Some(Err(error)) => {
                    self.exhausted = true;
                    return Some(Err(error));
                }
                None => {
                    self.exhausted = true;
                    self.pending.extend(self.parser.finish());
                }
            }
        }
    }

    /// Like [`Self::next_event`], but resolves to [`CodexApiError::Cancelled`]
    /// as soon as `cancel` fires.
    pub async fn next_event_or_cancel(
        &mut self,
        cancel: &CancellationToken,
    ) -> Option<Result<CodexStreamEvent, CodexApiError>> {
        if cancel.is_cancelled() {
            return Some(Err(CodexApiError::Cancelled));
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Some(Err(CodexApiError::Cancelled)),
            next = self.next_event() => next,
        }
    }

    /// Blocks dropped so far because they failed to decode.
    pub fn skipped(&self) -> usize {
        self.parser.skipped()
    }
}
