//! Per-turn tool-call accumulation.
//!
//! A tool call's name and arguments arrive spread over several events. The
//! accumulator tracks every call item seen in the turn, adopts exactly one of
//! them, and emits that one once, as soon as its arguments are complete.

use rustc_hash::FxHashMap;
use tracing::debug;

use super::extract::{CallItem, EventKind, ExtractedEvent};
use crate::protocol::canonical::ToolUseFragment;

/// Lifecycle position of one tracked call item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCallPhase {
    Announced,
    Accumulating,
    Done,
    Emitted,
}

#[derive(Debug, Clone)]
pub(crate) struct ToolCallState {
    pub(crate) item_id: String,
    pub(crate) name: Option<String>,
    pub(crate) call_id: Option<String>,
    pub(crate) args: String,
    pub(crate) args_done: bool,
    pub(crate) emitted: bool,
    pub(crate) index: usize,
}

impl ToolCallState {
    fn new(item_id: &str, index: usize) -> Self {
        Self {
            item_id: item_id.to_string(),
            name: None,
            call_id: None,
            args: String::new(),
            args_done: false,
            emitted: false,
            index,
        }
    }

    fn phase(&self) -> ToolCallPhase {
        if self.emitted {
            ToolCallPhase::Emitted
        } else if self.args_done {
            ToolCallPhase::Done
        } else if self.args.is_empty() {
            ToolCallPhase::Announced
        } else {
            ToolCallPhase::Accumulating
        }
    }

    /// Fill identity gaps from a call item without overwriting known values.
    fn merge_identity(&mut self, item: &CallItem) {
        if self.name.is_none() {
            self.name.clone_from(&item.name);
        }
        if self.call_id.is_none() {
            self.call_id.clone_from(&item.call_id);
        }
    }

    pub(crate) fn fragment(&self) -> ToolUseFragment {
        let arguments = if self.args.is_empty() {
            "{}".to_string()
        } else {
            self.args.clone()
        };
        ToolUseFragment::function(
            self.index,
            Some(self.call_id.clone().unwrap_or_else(|| self.item_id.clone())),
            self.name.clone(),
            Some(arguments),
        )
    }
}

/// Counters describing how a turn's tool items were handled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnTelemetry {
    pub tool_items_seen: u32,
    pub extra_items_ignored: u32,
    pub adopted_item_id: Option<String>,
    pub adopted_output_index: Option<usize>,
    pub emitted: bool,
}

/// Tool-call state for one in-flight turn.
#[derive(Debug, Default)]
pub struct TurnAccumulator {
    pub(crate) states: FxHashMap<String, ToolCallState>,
    pub(crate) adopted: Option<String>,
    emitted_in_turn: bool,
    telemetry: TurnTelemetry,
}

impl TurnAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one extracted event; returns the tool call to emit, if this event
    /// completed the adopted one.
    pub fn apply(&mut self, event: &ExtractedEvent) -> Option<ToolUseFragment> {
        match &event.kind {
            EventKind::ItemAdded(item) => self.on_item_added(item, event.index),
            EventKind::ArgumentsDelta { item_id, delta } => {
                self.on_arguments_delta(item_id, delta, event.index)
            }
            EventKind::ArgumentsDone { item_id, arguments } => {
                self.on_arguments_done(item_id, arguments.as_deref())
            }
            EventKind::ItemDone(item) => self.on_item_done(item),
            EventKind::Terminal { calls } | EventKind::Error { calls } => {
                let fragment = self.on_terminal(calls, event.index);
                self.clear_turn();
                fragment
            }
            EventKind::TextDelta | EventKind::Other => None,
        }
    }

    /// The adopted item id, if any.
    #[must_use]
    pub fn adopted(&self) -> Option<&str> {
        self.adopted.as_deref()
    }

    #[must_use]
    pub fn phase(&self, item_id: &str) -> Option<ToolCallPhase> {
        self.states.get(item_id).map(ToolCallState::phase)
    }

    /// True when no item is tracked and nothing is adopted.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.states.is_empty() && self.adopted.is_none()
    }

    #[must_use]
    pub fn telemetry(&self) -> &TurnTelemetry {
        &self.telemetry
    }

    /// Hand over the finished turn's telemetry and start counting afresh.
    pub fn take_telemetry(&mut self) -> TurnTelemetry {
        std::mem::take(&mut self.telemetry)
    }

    /// Drop all tracked items and the adoption marker.
    pub fn clear_turn(&mut self) {
        self.states.clear();
        self.adopted = None;
        self.emitted_in_turn = false;
    }

    fn adopt(&mut self, item_id: &str, via: &'static str) {
        debug!(item_id, via, "adopted tool item");
        self.adopted = Some(item_id.to_string());
        self.telemetry.adopted_item_id = Some(item_id.to_string());
        self.telemetry.adopted_output_index = self.states.get(item_id).map(|state| state.index);
    }

    fn is_adopted(&self, item_id: &str) -> bool {
        self.adopted.as_deref() == Some(item_id)
    }

    fn state_mut(&mut self, item_id: &str, index: usize) -> &mut ToolCallState {
        self.states
            .entry(item_id.to_string())
            .or_insert_with(|| ToolCallState::new(item_id, index))
    }

    /// Emit the adopted item once its arguments are complete and it has a name.
    fn try_emit(&mut self, item_id: &str) -> Option<ToolUseFragment> {
        if !self.is_adopted(item_id) {
            return None;
        }
        let state = self.states.get_mut(item_id)?;
        if state.emitted || !state.args_done || state.name.as_deref().map_or(true, str::is_empty) {
            return None;
        }
        state.emitted = true;
        let fragment = state.fragment();
        self.emitted_in_turn = true;
        self.telemetry.emitted = true;
        debug!(
            item_id,
            name = ?fragment.function.name,
            index = fragment.index,
            "emitting tool_use"
        );
        Some(fragment)
    }

    fn on_item_added(&mut self, item: &CallItem, index: usize) -> Option<ToolUseFragment> {
        let Some(item_id) = item.item_id.as_deref() else {
            debug!("ignoring announced tool item without an id");
            return None;
        };
        self.state_mut(item_id, index).merge_identity(item);
        self.telemetry.tool_items_seen += 1;
        if self.adopted.is_some() && !self.is_adopted(item_id) {
            self.telemetry.extra_items_ignored += 1;
            debug!(item_id, "extra tool item announced while another is adopted");
        }
        self.try_emit(item_id)
    }

    fn on_arguments_delta(
        &mut self,
        item_id: &str,
        delta: &str,
        index: usize,
    ) -> Option<ToolUseFragment> {
        self.state_mut(item_id, index).args.push_str(delta);
        if self.adopted.is_none() {
            self.adopt(item_id, "arguments.delta");
        }
        self.try_emit(item_id)
    }

    fn on_arguments_done(
        &mut self,
        item_id: &str,
        arguments: Option<&str>,
    ) -> Option<ToolUseFragment> {
        if !self.states.contains_key(item_id) {
            debug!(item_id, "arguments.done for an untracked item");
            return None;
        }
        if self.adopted.is_none() {
            self.adopt(item_id, "arguments.done");
        }
        if !self.is_adopted(item_id) {
            return None;
        }
        let state = self.states.get_mut(item_id)?;
        if state.emitted {
            return None;
        }
        if let Some(arguments) = arguments {
            state.args = arguments.to_string();
        }
        state.args_done = true;
        self.try_emit(item_id)
    }

    fn on_item_done(&mut self, item: &CallItem) -> Option<ToolUseFragment> {
        let item_id = item.item_id.as_deref()?;
        let state = self.states.get(item_id)?;

        let eligible =
            self.is_adopted(item_id) || (self.adopted.is_none() && !self.emitted_in_turn);
        let mut fragment = None;
        if !state.emitted {
            if eligible {
                if self.adopted.is_none() {
                    self.adopt(item_id, "output_item.done");
                }
                if let Some(state) = self.states.get_mut(item_id) {
                    state.merge_identity(item);
                    if let Some(arguments) = item.arguments.as_deref().filter(|a| !a.is_empty()) {
                        state.args = arguments.to_string();
                    }
                    state.args_done = true;
                }
                fragment = self.try_emit(item_id);
            } else {
                debug!(item_id, "closing non-adopted tool item without emitting");
            }
        }

        self.states.remove(item_id);
        if self.is_adopted(item_id) {
            self.adopted = None;
        }
        fragment
    }

    /// Last-resort emission from the final response when the turn produced no
    /// tool call through the incremental path.
    fn on_terminal(&mut self, calls: &[CallItem], index: usize) -> Option<ToolUseFragment> {
        if self.emitted_in_turn {
            return None;
        }
        let call = match self.adopted.as_deref() {
            Some(adopted) => calls
                .iter()
                .find(|call| call.item_id.as_deref() == Some(adopted)),
            None => calls.first(),
        }?;
        let item_id = call.item_id.clone().unwrap_or_default();

        let mut state = ToolCallState::new(&item_id, index);
        state.merge_identity(call);
        state.args = call.arguments.clone().unwrap_or_default();
        state.args_done = true;
        self.states.insert(item_id.clone(), state);
        self.adopted = Some(item_id.clone());
        let fragment = self.try_emit(&item_id);
        if fragment.is_some() {
            debug!(item_id, "synthesized tool_use from final response");
        }
        fragment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::extract::extract_event;
    use serde_json::{json, Value};

    fn feed(acc: &mut TurnAccumulator, raw: Value) -> Option<ToolUseFragment> {
        let event = extract_event(&raw).expect("responses event");
        acc.apply(&event)
    }

    fn added(item_id: &str, name: &str) -> Value {
        json!({
            "type": "response.output_item.added",
            "output_index": 0,
            "item": {"type": "function_call", "id": item_id, "call_id": format!("call_{item_id}"), "name": name}
        })
    }

    fn delta(item_id: &str, text: &str) -> Value {
        json!({"type": "response.function_call_arguments.delta", "item_id": item_id, "delta": text})
    }

    fn done(item_id: &str) -> Value {
        json!({"type": "response.function_call_arguments.done", "item_id": item_id})
    }

    #[test]
    fn test_phases_progress() {
        let mut acc = TurnAccumulator::new();
        assert!(feed(&mut acc, added("fc_1", "f")).is_none());
        assert_eq!(acc.phase("fc_1"), Some(ToolCallPhase::Announced));
        assert!(feed(&mut acc, delta("fc_1", "{")).is_none());
        assert_eq!(acc.phase("fc_1"), Some(ToolCallPhase::Accumulating));
        assert!(feed(&mut acc, delta("fc_1", "}")).is_none());
        let tool = feed(&mut acc, done("fc_1")).unwrap();
        assert_eq!(acc.phase("fc_1"), Some(ToolCallPhase::Emitted));
        assert_eq!(tool.id.as_deref(), Some("call_fc_1"));
        assert_eq!(tool.function.arguments.as_deref(), Some("{}"));
    }

    #[test]
    fn test_done_event_arguments_win() {
        let mut acc = TurnAccumulator::new();
        feed(&mut acc, added("fc_1", "f"));
        feed(&mut acc, delta("fc_1", "{\"partial\""));
        let tool = feed(
            &mut acc,
            json!({
                "type": "response.function_call_arguments.done",
                "item_id": "fc_1",
                "arguments": "{\"full\":true}"
            }),
        )
        .unwrap();
        assert_eq!(tool.function.arguments.as_deref(), Some("{\"full\":true}"));
    }

    #[test]
    fn test_missing_name_blocks_emission_until_item_done() {
        let mut acc = TurnAccumulator::new();
        feed(&mut acc, delta("fc_1", "{}"));
        assert!(feed(&mut acc, done("fc_1")).is_none());
        let tool = feed(
            &mut acc,
            json!({
                "type": "response.output_item.done",
                "item": {"type": "function_call", "id": "fc_1", "name": "late_name"}
            }),
        )
        .unwrap();
        assert_eq!(tool.function.name.as_deref(), Some("late_name"));
        assert_eq!(tool.id.as_deref(), Some("fc_1"));
        assert!(acc.is_idle());
    }

    #[test]
    fn test_extra_item_done_does_not_emit() {
        let mut acc = TurnAccumulator::new();
        feed(&mut acc, added("fc_1", "first"));
        feed(&mut acc, added("fc_2", "second"));
        feed(&mut acc, delta("fc_1", "{}"));
        let closed = feed(
            &mut acc,
            json!({
                "type": "response.output_item.done",
                "item": {"type": "function_call", "id": "fc_2", "name": "second", "arguments": "{}"}
            }),
        );
        assert!(closed.is_none());
        assert!(acc.phase("fc_2").is_none());
        assert_eq!(acc.adopted(), Some("fc_1"));
    }

    #[test]
    fn test_terminal_fallback_uses_embedded_response() {
        let mut acc = TurnAccumulator::new();
        let tool = feed(
            &mut acc,
            json!({
                "type": "response.completed",
                "output_index": 1,
                "response": {"output": [
                    {"type": "function_call", "id": "fc_9", "call_id": "call_9", "name": "g", "arguments": ""}
                ]}
            }),
        )
        .unwrap();
        assert_eq!(tool.index, 1);
        assert_eq!(tool.id.as_deref(), Some("call_9"));
        assert_eq!(tool.function.arguments.as_deref(), Some("{}"));
        assert!(acc.is_idle());
    }

    #[test]
    fn test_terminal_fallback_skipped_after_emission() {
        let mut acc = TurnAccumulator::new();
        feed(&mut acc, added("fc_1", "f"));
        assert!(feed(&mut acc, done("fc_1")).is_some());
        let terminal = feed(
            &mut acc,
            json!({
                "type": "response.completed",
                "response": {"output": [{"type": "function_call", "id": "fc_1", "name": "f"}]}
            }),
        );
        assert!(terminal.is_none());
        assert!(acc.is_idle());
    }

    #[test]
    fn test_telemetry_counts_extra_items() {
        let mut acc = TurnAccumulator::new();
        feed(&mut acc, delta("fc_1", "{}"));
        feed(&mut acc, added("fc_1", "f"));
        feed(&mut acc, added("fc_2", "g"));
        let telemetry = acc.take_telemetry();
        assert_eq!(telemetry.tool_items_seen, 2);
        assert_eq!(telemetry.extra_items_ignored, 1);
        assert_eq!(telemetry.adopted_item_id.as_deref(), Some("fc_1"));
        assert_eq!(acc.telemetry(), &TurnTelemetry::default());
    }
}
