//! Streaming side: event field access, extraction, tool-call accumulation,
//! EOF reconciliation and the normalizer adapters.

pub mod access;
pub mod accumulator;
pub mod eof;
pub mod extract;
pub mod normalizer;
pub mod sse;

pub use access::EventFields;
pub use accumulator::{ToolCallPhase, TurnAccumulator, TurnTelemetry};
pub use eof::EOF_ARGUMENTS_ERROR;
pub use extract::{extract_event, CallItem, EventKind, ExtractedEvent};
pub use normalizer::{NormalizedIter, NormalizedStream, StreamNormalizer};
pub use sse::{json_line_events, sse_event_stream, SseEvent, SseParser};
