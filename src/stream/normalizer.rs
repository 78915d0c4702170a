//! Per-turn streaming normalizer and its iterator/`Stream` adapters.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use futures_util::Stream;
use pin_project_lite::pin_project;

use super::access::EventFields;
use super::accumulator::TurnAccumulator;
use super::extract::{extract_event, ExtractedEvent};
use crate::error::ProxyError;
use crate::observability::log_turn_telemetry;
use crate::protocol::canonical::{GenericChunk, ToolUseFragment};
use crate::protocol::openai_chat::normalize_chat_chunk;
use crate::trace::{notify, ChunkObserver, UpstreamChunk};

/// Converts one turn's upstream events into [`GenericChunk`]s.
///
/// Owns the turn's tool-call state; dropping the normalizer discards it.
pub struct StreamNormalizer {
    accumulator: TurnAccumulator,
    telemetry: bool,
    observer: Option<Arc<dyn ChunkObserver>>,
    chunk_idx: usize,
}

impl StreamNormalizer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            accumulator: TurnAccumulator::new(),
            telemetry: false,
            observer: None,
            chunk_idx: 0,
        }
    }

    /// Log a tool-turn summary whenever a turn ends.
    #[must_use]
    pub fn with_telemetry(mut self, enabled: bool) -> Self {
        self.telemetry = enabled;
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ChunkObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    #[must_use]
    pub fn accumulator(&self) -> &TurnAccumulator {
        &self.accumulator
    }

    /// Normalize one upstream event.
    ///
    /// Chat-completion chunks are read statelessly; Responses events go
    /// through the tool-call accumulator. Events of neither shape yield
    /// `None`.
    pub fn normalize<E: EventFields + ?Sized>(&mut self, event: &E) -> Option<GenericChunk> {
        let (chunk, from_chat) = match normalize_chat_chunk(event) {
            Some(chunk) => (chunk, true),
            None => {
                let extracted = extract_event(event)?;
                let tool_use = self.accumulator.apply(&extracted);
                if extracted.kind.ends_turn() {
                    self.end_turn();
                }
                (chunk_from(extracted, tool_use), false)
            }
        };
        let upstream = self.observer.is_some().then(|| {
            let raw = event.to_raw();
            if from_chat {
                UpstreamChunk::ChatCompletions(raw)
            } else {
                UpstreamChunk::Responses(raw)
            }
        });
        self.observe(upstream.as_ref(), &chunk);
        Some(chunk)
    }

    /// Reconcile a stream that ended without a terminal event.
    pub fn finish(&mut self) -> Option<GenericChunk> {
        let chunk = self.accumulator.finish_eof();
        self.end_turn();
        if let Some(chunk) = &chunk {
            self.observe(None, chunk);
        }
        chunk
    }

    fn end_turn(&mut self) {
        let telemetry = self.accumulator.take_telemetry();
        if self.telemetry && telemetry.tool_items_seen > 0 {
            log_turn_telemetry(&telemetry);
        }
    }

    fn observe(&mut self, upstream: Option<&UpstreamChunk>, chunk: &GenericChunk) {
        let idx = self.chunk_idx;
        self.chunk_idx += 1;
        if let Some(observer) = &self.observer {
            notify(observer.as_ref(), "chunk", |o| o.on_chunk(idx, upstream, chunk));
        }
    }
}

impl Default for StreamNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StreamNormalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamNormalizer")
            .field("accumulator", &self.accumulator)
            .field("telemetry", &self.telemetry)
            .field("observer", &self.observer.is_some())
            .field("chunk_idx", &self.chunk_idx)
            .finish()
    }
}

fn chunk_from(extracted: ExtractedEvent, tool_use: Option<ToolUseFragment>) -> GenericChunk {
    GenericChunk {
        text: extracted.text,
        is_finished: extracted.is_finished,
        finish_reason: extracted.finish_reason,
        usage: None,
        index: extracted.index,
        tool_use,
        provider_specific_fields: Some(extracted.provider_fields),
    }
}

/// Normalizes a synchronous sequence of events, then yields the EOF chunk.
pub struct NormalizedIter<I> {
    inner: I,
    normalizer: StreamNormalizer,
    finished: bool,
}

impl<I> NormalizedIter<I> {
    pub fn new(inner: I, normalizer: StreamNormalizer) -> Self {
        Self {
            inner,
            normalizer,
            finished: false,
        }
    }
}

impl<I> Iterator for NormalizedIter<I>
where
    I: Iterator,
    I::Item: EventFields,
{
    type Item = GenericChunk;

    fn next(&mut self) -> Option<GenericChunk> {
        if self.finished {
            return None;
        }
        for event in self.inner.by_ref() {
            if let Some(chunk) = self.normalizer.normalize(&event) {
                return Some(chunk);
            }
        }
        self.finished = true;
        self.normalizer.finish()
    }
}

pin_project! {
    /// Normalizes an async stream of events, then yields the EOF chunk.
    ///
    /// Upstream errors are passed through and do not end the stream.
    pub struct NormalizedStream<S> {
        #[pin]
        inner: S,
        normalizer: StreamNormalizer,
        finished: bool,
    }
}

impl<S> NormalizedStream<S> {
    pub fn new(inner: S, normalizer: StreamNormalizer) -> Self {
        Self {
            inner,
            normalizer,
            finished: false,
        }
    }
}

impl<S, T, E> Stream for NormalizedStream<S>
where
    S: Stream<Item = Result<T, E>>,
    T: EventFields,
    E: Into<ProxyError>,
{
    type Item = Result<GenericChunk, ProxyError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        if *this.finished {
            return Poll::Ready(None);
        }
        loop {
            match ready!(this.inner.as_mut().poll_next(cx)) {
                Some(Ok(event)) => {
                    if let Some(chunk) = this.normalizer.normalize(&event) {
                        return Poll::Ready(Some(Ok(chunk)));
                    }
                }
                Some(Err(e)) => return Poll::Ready(Some(Err(e.into()))),
                None => {
                    *this.finished = true;
                    return Poll::Ready(this.normalizer.finish().map(Ok));
                }
            }
        }
    }
}
