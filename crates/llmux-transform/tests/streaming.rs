use llmux_protocol::{claude, gemini};
use llmux_transform::{Proto, StreamEvent, StreamTransformer};

fn gemini_text_chunk(text: &str, finish: Option<&str>) -> gemini::GenerateContentResponse {
    serde_json::from_value(serde_json::json!({
        "candidates": [{
            "content": {"role": "model", "parts": [{"text": text}]},
            "finishReason": finish,
            "index": 0
        }],
        "usageMetadata": if finish.is_some() {
            serde_json::json!({"promptTokenCount": 5, "candidatesTokenCount": 3, "totalTokenCount": 8})
        } else {
            serde_json::Value::Null
        }
    }))
    .unwrap()
}

#[test]
fn gemini_stream_becomes_openai_chunks_with_finish() {
    let mut state = StreamTransformer::new(Proto::OpenAiChat, Proto::Gemini, "gemini-2.5-flash")
        .unwrap();

    let first = state
        .push(StreamEvent::Gemini(gemini_text_chunk("Hel", None)))
        .unwrap();
    assert_eq!(first.len(), 1);
    let StreamEvent::OpenAiChat(chunk) = &first[0] else {
        panic!("expected openai chunk");
    };
    assert_eq!(chunk.choices[0].delta.role.as_deref(), Some("assistant"));
    assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("Hel"));

    let last = state
        .push(StreamEvent::Gemini(gemini_text_chunk("lo", Some("STOP"))))
        .unwrap();
    // One content chunk plus one finish chunk carrying usage.
    assert_eq!(last.len(), 2);
    let StreamEvent::OpenAiChat(done) = &last[1] else {
        panic!("expected openai chunk");
    };
    assert_eq!(done.choices[0].finish_reason.as_deref(), Some("stop"));
    assert_eq!(done.usage.as_ref().unwrap().total_tokens, 8);
}

#[test]
fn gemini_stream_becomes_wellformed_claude_events() {
    let mut state =
        StreamTransformer::new(Proto::Claude, Proto::Gemini, "gemini-2.5-flash").unwrap();

    let mut events = Vec::new();
    events.extend(
        state
            .push(StreamEvent::Gemini(gemini_text_chunk("Hello", None)))
            .unwrap(),
    );
    events.extend(
        state
            .push(StreamEvent::Gemini(gemini_text_chunk(" world", Some("STOP"))))
            .unwrap(),
    );

    let names: Vec<&str> = events
        .iter()
        .map(|event| match event {
            StreamEvent::Claude(event) => event.event_name(),
            _ => panic!("expected claude event"),
        })
        .collect();
    assert_eq!(
        names,
        vec![
            "message_start",
            "content_block_start",
            "content_block_delta",
            "content_block_delta",
            "content_block_stop",
            "message_delta",
            "message_stop",
        ]
    );
}

/// Disconnected upstreams still close the Claude message envelope.
#[test]
fn truncated_gemini_stream_is_closed_on_finish() {
    let mut state =
        StreamTransformer::new(Proto::Claude, Proto::Gemini, "gemini-2.5-flash").unwrap();
    state
        .push(StreamEvent::Gemini(gemini_text_chunk("partial", None)))
        .unwrap();

    let tail = state.finish();
    let names: Vec<&str> = tail
        .iter()
        .map(|event| match event {
            StreamEvent::Claude(event) => event.event_name(),
            _ => panic!("expected claude event"),
        })
        .collect();
    assert_eq!(names, vec!["content_block_stop", "message_delta", "message_stop"]);
}

#[test]
fn claude_tool_stream_becomes_openai_tool_chunks() {
    let mut state =
        StreamTransformer::new(Proto::OpenAiChat, Proto::Claude, "claude-sonnet-4-5").unwrap();

    let start: claude::StreamEvent = serde_json::from_value(serde_json::json!({
        "type": "message_start",
        "message": {
            "id": "msg_1", "type": "message", "role": "assistant",
            "model": "claude-sonnet-4-5", "content": [],
            "usage": {"input_tokens": 10, "output_tokens": 0}
        }
    }))
    .unwrap();
    state.push(StreamEvent::Claude(start)).unwrap();

    let tool_start: claude::StreamEvent = serde_json::from_value(serde_json::json!({
        "type": "content_block_start",
        "index": 0,
        "content_block": {"type": "tool_use", "id": "toolu_9", "name": "get_weather", "input": {}}
    }))
    .unwrap();
    let chunks = state.push(StreamEvent::Claude(tool_start)).unwrap();
    let StreamEvent::OpenAiChat(chunk) = &chunks[0] else {
        panic!("expected openai chunk");
    };
    let call = &chunk.choices[0].delta.tool_calls.as_ref().unwrap()[0];
    assert_eq!(call.id.as_deref(), Some("toolu_9"));
    assert_eq!(
        call.function.as_ref().unwrap().name.as_deref(),
        Some("get_weather")
    );

    let json_delta: claude::StreamEvent = serde_json::from_value(serde_json::json!({
        "type": "content_block_delta",
        "index": 0,
        "delta": {"type": "input_json_delta", "partial_json": "{\"city\":\"Berlin\"}"}
    }))
    .unwrap();
    let chunks = state.push(StreamEvent::Claude(json_delta)).unwrap();
    let StreamEvent::OpenAiChat(chunk) = &chunks[0] else {
        panic!("expected openai chunk");
    };
    let call = &chunk.choices[0].delta.tool_calls.as_ref().unwrap()[0];
    assert_eq!(
        call.function.as_ref().unwrap().arguments.as_deref(),
        Some("{\"city\":\"Berlin\"}")
    );
}

/// Accumulated tool-call fragments surface as one complete Gemini
/// functionCall on the finish chunk.
#[test]
fn openai_tool_fragments_assemble_for_gemini() {
    let mut state =
        StreamTransformer::new(Proto::Gemini, Proto::OpenAiChat, "gpt-test").unwrap();

    let fragment = |id: Option<&str>, name: Option<&str>, args: &str, finish: Option<&str>| {
        let chunk: llmux_protocol::openai_chat::ChatCompletionChunk =
            serde_json::from_value(serde_json::json!({
                "id": "chatcmpl-1", "object": "chat.completion.chunk",
                "created": 1, "model": "gpt-test",
                "choices": [{
                    "index": 0,
                    "delta": {"tool_calls": [{
                        "index": 0, "id": id, "type": "function",
                        "function": {"name": name, "arguments": args}
                    }]},
                    "finish_reason": finish
                }]
            }))
            .unwrap();
        StreamEvent::OpenAiChat(chunk)
    };

    assert!(state
        .push(fragment(Some("call_1"), Some("get_weather"), "{\"ci", None))
        .unwrap()
        .is_empty());
    let done = state
        .push(fragment(None, None, "ty\":\"Berlin\"}", Some("tool_calls")))
        .unwrap();
    assert_eq!(done.len(), 1);
    let StreamEvent::Gemini(chunk) = &done[0] else {
        panic!("expected gemini chunk");
    };
    let call = chunk.candidates[0].content.as_ref().unwrap().parts[0]
        .function_call
        .as_ref()
        .unwrap();
    assert_eq!(call.name, "get_weather");
    assert_eq!(call.args.as_ref().unwrap()["city"], "Berlin");
}
