use futures_util::StreamExt;
use respbridge::error::ProxyError;
use respbridge::protocol::canonical::GenericChunk;
use respbridge::protocol::openai_responses::ResponsesStreamEvent;
use respbridge::stream::{
    NormalizedIter, NormalizedStream, StreamNormalizer, ToolCallPhase, EOF_ARGUMENTS_ERROR,
};
use serde_json::{json, Value};

fn added(item_id: &str, output_index: u64, name: &str) -> Value {
    json!({
        "type": "response.output_item.added",
        "output_index": output_index,
        "item": {
            "type": "function_call",
            "id": item_id,
            "call_id": format!("call_{item_id}"),
            "name": name,
            "arguments": ""
        }
    })
}

fn delta(item_id: &str, output_index: u64, fragment: &str) -> Value {
    json!({
        "type": "response.function_call_arguments.delta",
        "item_id": item_id,
        "output_index": output_index,
        "delta": fragment
    })
}

fn args_done(item_id: &str, arguments: &str) -> Value {
    json!({
        "type": "response.function_call_arguments.done",
        "item_id": item_id,
        "arguments": arguments
    })
}

fn item_done(item_id: &str, name: &str, arguments: &str) -> Value {
    json!({
        "type": "response.output_item.done",
        "item": {
            "type": "function_call",
            "id": item_id,
            "call_id": format!("call_{item_id}"),
            "name": name,
            "arguments": arguments
        }
    })
}

fn completed(output: Value) -> Value {
    json!({
        "type": "response.completed",
        "response": {"id": "resp_1", "status": "completed", "output": output}
    })
}

fn run(events: &[Value]) -> Vec<GenericChunk> {
    NormalizedIter::new(events.iter(), StreamNormalizer::new()).collect()
}

fn tool_chunks(chunks: &[GenericChunk]) -> Vec<&GenericChunk> {
    chunks.iter().filter(|c| c.tool_use.is_some()).collect()
}

fn responses_type(chunk: &GenericChunk) -> &str {
    chunk
        .provider_specific_fields
        .as_ref()
        .and_then(|fields| fields.get("responses_type"))
        .and_then(Value::as_str)
        .unwrap_or_default()
}

#[test]
fn tool_call_is_emitted_at_most_once() {
    let final_item = item_done("fc_1", "get_weather", "{\"city\":\"SF\"}")["item"].clone();
    let chunks = run(&[
        added("fc_1", 0, "get_weather"),
        delta("fc_1", 0, "{\"city\":"),
        delta("fc_1", 0, "\"SF\"}"),
        args_done("fc_1", "{\"city\":\"SF\"}"),
        item_done("fc_1", "get_weather", "{\"city\":\"SF\"}"),
        completed(json!([final_item])),
    ]);

    let tools = tool_chunks(&chunks);
    assert_eq!(tools.len(), 1);
    let tool = tools[0].tool_use.as_ref().expect("tool_use");
    assert_eq!(tool.id.as_deref(), Some("call_fc_1"));
    assert_eq!(tool.kind, "function");
    assert_eq!(tool.function.name.as_deref(), Some("get_weather"));
    assert_eq!(tool.function.arguments.as_deref(), Some("{\"city\":\"SF\"}"));
    assert_eq!(responses_type(tools[0]), "response.function_call_arguments.done");

    let last = chunks.last().expect("terminal chunk");
    assert!(last.is_finished);
    assert_eq!(last.finish_reason, "stop");
}

#[test]
fn first_argument_fragment_decides_adoption() {
    let events = [
        added("fc_1", 0, "first"),
        added("fc_2", 1, "second"),
        delta("fc_2", 1, "{\"b\":2}"),
        delta("fc_1", 0, "{\"a\":1}"),
        args_done("fc_1", "{\"a\":1}"),
        item_done("fc_1", "first", "{\"a\":1}"),
        args_done("fc_2", "{\"b\":2}"),
        item_done("fc_2", "second", "{\"b\":2}"),
    ];
    let mut normalizer = StreamNormalizer::new();
    let mut emitted = Vec::new();
    for (idx, event) in events.iter().enumerate() {
        let chunk = normalizer.normalize(event).expect("responses chunk");
        if idx == 2 {
            assert_eq!(normalizer.accumulator().adopted(), Some("fc_2"));
            assert_eq!(
                normalizer.accumulator().phase("fc_1"),
                Some(ToolCallPhase::Announced)
            );
        }
        if let Some(tool) = chunk.tool_use {
            emitted.push(tool);
        }
    }
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].id.as_deref(), Some("call_fc_2"));
    assert_eq!(emitted[0].index, 1);
    assert_eq!(normalizer.accumulator().telemetry().extra_items_ignored, 0);
    assert!(normalizer.finish().is_none());
}

#[test]
fn finalize_after_emission_is_a_no_op() {
    let mut normalizer = StreamNormalizer::new();
    for event in [
        added("fc_1", 0, "f"),
        delta("fc_1", 0, "{}"),
        args_done("fc_1", "{}"),
    ] {
        normalizer.normalize(&event);
    }
    assert_eq!(
        normalizer.accumulator().phase("fc_1"),
        Some(ToolCallPhase::Emitted)
    );
    assert!(normalizer.finish().is_none());
    assert!(normalizer.finish().is_none());
    assert!(normalizer.accumulator().is_idle());
}

#[test]
fn eof_with_valid_buffer_recovers_tool_call() {
    let chunks = run(&[added("fc_1", 0, "f"), delta("fc_1", 0, "{\"a\":"), delta("fc_1", 0, "1}")]);
    let eof = chunks.last().expect("eof chunk");
    let tool = eof.tool_use.as_ref().expect("recovered tool_use");
    assert_eq!(tool.function.name.as_deref(), Some("f"));
    assert_eq!(tool.function.arguments.as_deref(), Some("{\"a\":1}"));
    assert!(!eof.is_finished);
    assert_eq!(responses_type(eof), "eof_fallback");
    assert_eq!(tool_chunks(&chunks).len(), 1);
}

#[test]
fn eof_with_invalid_buffer_reports_error() {
    let chunks = run(&[added("fc_1", 0, "f"), delta("fc_1", 0, "{not json")]);
    let eof = chunks.last().expect("eof chunk");
    assert!(eof.tool_use.is_none());
    assert_eq!(eof.finish_reason, "error");
    assert!(eof.is_error());
    assert_eq!(eof.text, EOF_ARGUMENTS_ERROR);
    assert_eq!(responses_type(eof), "eof_fallback_error");
}

#[test]
fn terminal_event_clears_turn_state() {
    let mut normalizer = StreamNormalizer::new();
    normalizer.normalize(&added("fc_1", 0, "f"));
    normalizer.normalize(&delta("fc_1", 0, "{\"partial\":"));
    assert!(!normalizer.accumulator().is_idle());

    let chunk = normalizer
        .normalize(&json!({"type": "response.failed", "response": {"output": []}}))
        .expect("terminal chunk");
    assert!(chunk.is_finished);
    assert!(chunk.tool_use.is_none());
    assert!(normalizer.accumulator().is_idle());
    assert!(normalizer.finish().is_none());
}

#[test]
fn terminal_event_synthesizes_missing_tool_call() {
    let chunks = run(&[completed(json!([
        {"type": "message", "content": [{"type": "output_text", "text": "checking"}]},
        {"type": "function_call", "id": "fc_9", "call_id": "call_9", "name": "lookup", "arguments": "{\"q\":1}"}
    ]))]);
    assert_eq!(chunks.len(), 1);
    let tool = chunks[0].tool_use.as_ref().expect("synthesized tool_use");
    assert_eq!(tool.id.as_deref(), Some("call_9"));
    assert_eq!(tool.function.arguments.as_deref(), Some("{\"q\":1}"));
    assert!(chunks[0].is_finished);
}

#[test]
fn zero_argument_tool_call_gets_empty_object() {
    let chunks = run(&[added("fc_1", 0, "list_files"), args_done("fc_1", "")]);
    let tools = tool_chunks(&chunks);
    assert_eq!(tools.len(), 1);
    assert_eq!(
        tools[0].tool_use.as_ref().expect("tool_use").function.arguments.as_deref(),
        Some("{}")
    );
}

#[test]
fn typed_events_follow_the_same_path() {
    let events: Vec<ResponsesStreamEvent> = [
        added("fc_1", 3, "f"),
        delta("fc_1", 3, "{\"x\":true}"),
        args_done("fc_1", "{\"x\":true}"),
    ]
    .into_iter()
    .map(|raw| serde_json::from_value(raw).expect("typed event"))
    .collect();
    let chunks: Vec<_> = NormalizedIter::new(events.iter(), StreamNormalizer::new()).collect();
    let tools = tool_chunks(&chunks);
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].index, 3);
    assert_eq!(tools[0].tool_use.as_ref().expect("tool_use").index, 3);
}

#[test]
fn wrong_typed_fields_fall_back_on_both_event_shapes() {
    let raw = json!({"type": "response.output_text.delta", "output_index": "0", "delta": "hi"});
    let typed: ResponsesStreamEvent = serde_json::from_value(raw.clone()).expect("typed event");

    let mut normalizer = StreamNormalizer::new();
    let from_value = normalizer.normalize(&raw).expect("value chunk");
    let from_typed = normalizer.normalize(&typed).expect("typed chunk");
    for chunk in [&from_value, &from_typed] {
        assert_eq!(chunk.text, "hi");
        assert_eq!(chunk.index, 0);
    }
}

#[tokio::test]
async fn stream_adapter_yields_eof_chunk_last() {
    let events = vec![
        Ok::<_, ProxyError>(json!({"type": "response.output_text.delta", "delta": "Hi"})),
        Ok(json!({"type": "response.in_progress"})),
        Ok(json!({"ping": true})),
        Ok(added("fc_1", 0, "f")),
        Ok(delta("fc_1", 0, "{}")),
    ];
    let chunks: Vec<_> =
        NormalizedStream::new(futures_util::stream::iter(events), StreamNormalizer::new())
            .collect()
            .await;
    assert_eq!(chunks.len(), 5);
    let chunks: Vec<GenericChunk> = chunks.into_iter().map(|c| c.expect("chunk")).collect();
    assert_eq!(chunks[0].text, "Hi");
    assert_eq!(responses_type(&chunks[4]), "eof_fallback");
}
