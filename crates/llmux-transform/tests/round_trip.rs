use llmux_protocol::{claude, gemini, openai_chat as oai};
use llmux_transform::{Proto, TranslatorRegistry};

fn chat_request() -> serde_json::Value {
    serde_json::json!({
        "model": "test-model",
        "messages": [
            {"role": "system", "content": "be terse"},
            {"role": "user", "content": "what is the weather in Berlin?"},
            {"role": "assistant", "tool_calls": [{
                "id": "call_weather_1",
                "type": "function",
                "function": {"name": "get_weather", "arguments": "{\"city\":\"Berlin\"}"}
            }]},
            {"role": "tool", "tool_call_id": "call_weather_1", "content": "sunny, 21C"}
        ],
        "tools": [{
            "type": "function",
            "function": {
                "name": "get_weather",
                "description": "Look up current weather",
                "parameters": {"type": "object", "properties": {"city": {"type": "string"}}}
            }
        }],
        "max_tokens": 256,
        "temperature": 0.5
    })
}

/// A→B→A on the request side keeps messages, the tool call id, and the tool
/// definition intact.
#[test]
fn chat_request_survives_claude_round_trip() {
    let registry = TranslatorRegistry::new();
    let body = serde_json::to_vec(&chat_request()).unwrap();

    let to_claude = registry
        .lookup(Proto::OpenAiChat, Proto::Claude)
        .unwrap()
        .convert_request("claude-sonnet-4-5", &body)
        .unwrap();
    let claude_req: claude::CreateMessageRequest = serde_json::from_slice(&to_claude).unwrap();
    assert_eq!(claude_req.model, "claude-sonnet-4-5");
    assert_eq!(claude_req.system.as_ref().unwrap().flat_text(), "be terse");

    let back = registry
        .lookup(Proto::Claude, Proto::OpenAiChat)
        .unwrap()
        .convert_request("test-model", &to_claude)
        .unwrap();
    let openai_req: oai::ChatCompletionRequest = serde_json::from_slice(&back).unwrap();

    let user_text: Vec<String> = openai_req
        .messages
        .iter()
        .filter(|message| message.role == "user")
        .filter_map(|message| message.content.as_ref().map(|content| content.flat_text()))
        .collect();
    assert_eq!(user_text, vec!["what is the weather in Berlin?"]);

    let assistant = openai_req
        .messages
        .iter()
        .find(|message| message.role == "assistant")
        .expect("assistant turn survives");
    let calls = assistant.tool_calls.as_ref().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].id, "call_weather_1");
    assert_eq!(calls[0].function.name, "get_weather");
    let args: serde_json::Value = serde_json::from_str(&calls[0].function.arguments).unwrap();
    assert_eq!(args["city"], "Berlin");

    let tool_msg = openai_req
        .messages
        .iter()
        .find(|message| message.role == "tool")
        .expect("tool result survives");
    assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_weather_1"));

    let tools = openai_req.tools.as_ref().unwrap();
    assert_eq!(tools[0].function.name, "get_weather");
}

#[test]
fn chat_request_survives_gemini_round_trip() {
    let registry = TranslatorRegistry::new();
    let body = serde_json::to_vec(&chat_request()).unwrap();

    let to_gemini = registry
        .lookup(Proto::OpenAiChat, Proto::Gemini)
        .unwrap()
        .convert_request("gemini-2.5-flash", &body)
        .unwrap();
    let gemini_req: gemini::GenerateContentRequest = serde_json::from_slice(&to_gemini).unwrap();
    assert!(gemini_req.system_instruction.is_some());
    assert_eq!(gemini_req.contents.len(), 3);

    let back = registry
        .lookup(Proto::Gemini, Proto::OpenAiChat)
        .unwrap()
        .convert_request("test-model", &to_gemini)
        .unwrap();
    let openai_req: oai::ChatCompletionRequest = serde_json::from_slice(&back).unwrap();

    let assistant = openai_req
        .messages
        .iter()
        .find(|message| message.role == "assistant")
        .expect("assistant turn survives");
    let calls = assistant.tool_calls.as_ref().unwrap();
    assert_eq!(calls[0].id, "call_weather_1");
    assert_eq!(calls[0].function.name, "get_weather");

    let tool_msg = openai_req
        .messages
        .iter()
        .find(|message| message.role == "tool")
        .expect("tool result survives");
    assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_weather_1"));
}

/// Response direction: usage and tool calls survive Gemini→OpenAI.
#[test]
fn gemini_response_maps_usage_and_tool_calls() {
    let registry = TranslatorRegistry::new();
    let upstream = serde_json::json!({
        "candidates": [{
            "content": {
                "role": "model",
                "parts": [
                    {"text": "Checking the weather."},
                    {"functionCall": {"id": "call_weather_1", "name": "get_weather",
                                      "args": {"city": "Berlin"}}}
                ]
            },
            "finishReason": "STOP",
            "index": 0
        }],
        "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 7, "totalTokenCount": 19},
        "modelVersion": "gemini-2.5-flash"
    });

    let out = registry
        .lookup(Proto::OpenAiChat, Proto::Gemini)
        .unwrap()
        .convert_response("gemini-2.5-flash", &serde_json::to_vec(&upstream).unwrap())
        .unwrap();
    let resp: oai::ChatCompletionResponse = serde_json::from_slice(&out).unwrap();

    assert_eq!(resp.model, "gemini-2.5-flash");
    let usage = resp.usage.unwrap();
    assert_eq!(usage.prompt_tokens, 12);
    assert_eq!(usage.completion_tokens, 7);
    assert_eq!(usage.total_tokens, 19);

    let choice = &resp.choices[0];
    assert_eq!(choice.message.content.as_deref(), Some("Checking the weather."));
    let calls = choice.message.tool_calls.as_ref().unwrap();
    assert_eq!(calls[0].id, "call_weather_1");
    assert_eq!(choice.finish_reason.as_deref(), Some("tool_calls"));
}

#[test]
fn claude_response_survives_openai_round_trip() {
    let registry = TranslatorRegistry::new();
    let upstream = serde_json::json!({
        "id": "msg_abc",
        "type": "message",
        "role": "assistant",
        "model": "claude-sonnet-4-5",
        "content": [
            {"type": "text", "text": "It is sunny."},
            {"type": "tool_use", "id": "toolu_1", "name": "get_weather",
             "input": {"city": "Berlin"}}
        ],
        "stop_reason": "tool_use",
        "usage": {"input_tokens": 30, "output_tokens": 9}
    });

    // claude upstream -> openai_chat client
    let out = registry
        .lookup(Proto::OpenAiChat, Proto::Claude)
        .unwrap()
        .convert_response("claude-sonnet-4-5", &serde_json::to_vec(&upstream).unwrap())
        .unwrap();
    let openai_resp: oai::ChatCompletionResponse = serde_json::from_slice(&out).unwrap();
    assert_eq!(openai_resp.choices[0].finish_reason.as_deref(), Some("tool_calls"));

    // openai upstream -> claude client brings it back
    let back = registry
        .lookup(Proto::Claude, Proto::OpenAiChat)
        .unwrap()
        .convert_response("claude-sonnet-4-5", &out)
        .unwrap();
    let claude_resp: claude::MessageResponse = serde_json::from_slice(&back).unwrap();

    assert_eq!(claude_resp.usage.input_tokens, 30);
    assert_eq!(claude_resp.usage.output_tokens, 9);
    assert_eq!(claude_resp.stop_reason.as_deref(), Some("tool_use"));
    let tool_use = claude_resp
        .content
        .iter()
        .find_map(|block| match block {
            claude::ContentBlock::ToolUse { id, name, input } => Some((id, name, input)),
            _ => None,
        })
        .expect("tool use survives");
    assert_eq!(tool_use.0, "toolu_1");
    assert_eq!(tool_use.1, "get_weather");
    assert_eq!(tool_use.2["city"], "Berlin");
}
