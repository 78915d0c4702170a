use serde::de::IgnoredAny;
use tracing::warn;

use super::accumulator::TurnAccumulator;
use crate::protocol::canonical::{GenericChunk, FINISH_ERROR};

pub const EOF_ARGUMENTS_ERROR: &str = "Provider ended stream before tool arguments were finalized.";

/// Clears the turn when dropped, whichever way `finish_eof` returns.
struct ClearOnDrop<'a>(&'a mut TurnAccumulator);

impl Drop for ClearOnDrop<'_> {
    fn drop(&mut self) {
        self.0.clear_turn();
    }
}

/// Whether a buffered argument string can be sent as-is. Empty means `{}`.
fn arguments_are_valid(args: &str) -> bool {
    args.is_empty() || serde_json::from_str::<IgnoredAny>(args).is_ok()
}

impl TurnAccumulator {
    /// Reconcile a turn whose upstream ended without a terminal event.
    ///
    /// Returns a recovery chunk for an adopted, not-yet-emitted tool call, or
    /// an assistant-visible error chunk when its buffered arguments are not
    /// valid JSON. All turn state is cleared before returning.
    pub fn finish_eof(&mut self) -> Option<GenericChunk> {
        let guard = ClearOnDrop(self);
        let acc = &*guard.0;

        let adopted = acc.adopted.as_deref()?;
        let state = acc.states.get(adopted)?;
        if state.emitted {
            return None;
        }

        if arguments_are_valid(&state.args) {
            warn!(item_id = adopted, "stream ended early; emitting buffered tool call");
            let chunk = GenericChunk {
                index: state.index,
                tool_use: Some(state.fragment()),
                ..GenericChunk::default()
            };
            return Some(chunk.with_responses_type("eof_fallback"));
        }

        warn!(
            item_id = adopted,
            buffered = state.args.len(),
            "stream ended before tool arguments were finalized"
        );
        let chunk = GenericChunk {
            text: EOF_ARGUMENTS_ERROR.to_string(),
            finish_reason: FINISH_ERROR.to_string(),
            ..GenericChunk::default()
        };
        Some(chunk.with_responses_type("eof_fallback_error"))
    }
}
