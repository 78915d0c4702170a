use respbridge::error::CanonicalError;
use respbridge::protocol::openai_responses::translate_response;
use serde_json::{json, Value};

fn responses_result() -> Value {
    json!({
        "id": "resp_123",
        "object": "response",
        "created_at": 1_700_000_000,
        "model": "gpt-5-codex",
        "status": "completed",
        "metadata": {"trace_name": "t"},
        "previous_response_id": "resp_122",
        "usage": {"input_tokens": 12, "output_tokens": 30},
        "output": [
            {"type": "reasoning", "summary": []},
            {"type": "message", "role": "assistant", "content": [
                {"type": "output_text", "text": "Let me check. "},
                {"type": "output_text", "text": "One moment."}
            ]},
            {"type": "function_call", "id": "fc_1", "call_id": "call_1", "name": "get_weather", "arguments": "{\"city\":\"SF\"}"},
            {"type": "function_call", "id": "fc_2", "call_id": "call_2", "name": "get_time", "arguments": "{}"}
        ]
    })
}

#[test]
fn completed_response_maps_to_chat_completion() {
    let completion = translate_response(&responses_result()).expect("translate");
    assert_eq!(completion.id.as_deref(), Some("resp_123"));
    assert_eq!(completion.object, "chat.completion");
    assert_eq!(completion.created, Some(1_700_000_000));
    assert_eq!(completion.model.as_deref(), Some("gpt-5-codex"));
    assert_eq!(completion.metadata, Some(json!({"trace_name": "t"})));

    let usage = completion.usage.as_ref().expect("usage");
    assert_eq!(usage.prompt_tokens, Some(12));
    assert_eq!(usage.completion_tokens, Some(30));
    assert_eq!(usage.total_tokens, Some(42));

    let choice = &completion.choices[0];
    assert_eq!(choice.finish_reason.as_deref(), Some("stop"));
    let message = completion.message().expect("message");
    assert_eq!(message.role, "assistant");
    assert_eq!(message.content, "Let me check. One moment.");

    let calls = message.tool_calls.as_ref().expect("tool_calls");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].function.name.as_deref(), Some("get_weather"));
    assert_eq!(calls[0].function.arguments.as_deref(), Some("{\"city\":\"SF\"}"));
    assert_eq!(message.function_call.as_ref(), Some(&calls[0].function));

    let fields = completion.provider_specific_fields.as_ref().expect("fields");
    assert_eq!(fields["previous_response_id"], "resp_122");
}

#[test]
fn status_maps_to_finish_reason() {
    for (status, expected) in [
        ("failed", Some("error")),
        ("cancelled", Some("cancelled")),
        ("canceled", Some("cancelled")),
        ("in_progress", None),
    ] {
        let completion =
            translate_response(&json!({"status": status, "output": []})).expect("translate");
        assert_eq!(
            completion.choices[0].finish_reason.as_deref(),
            expected,
            "{status}"
        );
        assert!(completion.message().expect("message").tool_calls.is_none());
    }
}

#[test]
fn structured_arguments_are_encoded() {
    let completion = translate_response(&json!({
        "output": [{"type": "tool_call", "name": "search", "input": {"q": "rust"}}]
    }))
    .expect("translate");
    let calls = completion
        .message()
        .and_then(|m| m.tool_calls.as_ref())
        .expect("tool_calls");
    assert_eq!(calls[0].function.arguments.as_deref(), Some("{\"q\":\"rust\"}"));
}

#[test]
fn null_response_is_invalid() {
    let err = translate_response(&Value::Null).expect_err("null");
    assert!(matches!(err.canonical(), Some(CanonicalError::InvalidRequest(_))));
    assert!(translate_response(&json!([1, 2])).is_err());
}
