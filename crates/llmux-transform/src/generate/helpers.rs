use llmux_protocol::{claude, gemini, openai_chat, openai_responses};
use serde_json::Value as JsonValue;

pub fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

/// Tool-call ids must correlate across request and streamed response. When an
/// upstream omits one, synthesize a stable id from a per-conversion counter.
pub fn synth_tool_id(counter: &mut usize) -> String {
    let id = format!("call_{counter}");
    *counter += 1;
    id
}

/// Unknown inbound roles collapse onto `user`; only roles the target protocol
/// knows survive the trip.
pub fn coerce_chat_role(role: &str) -> &str {
    match role {
        "user" | "assistant" | "system" | "developer" | "tool" => role,
        _ => "user",
    }
}

pub fn gemini_role(role: &str) -> &'static str {
    match role {
        "assistant" | "model" => "model",
        _ => "user",
    }
}

pub fn claude_role(role: &str) -> &'static str {
    match role {
        "assistant" | "model" => "assistant",
        _ => "user",
    }
}

// ---- finish / stop reason maps ----

pub fn gemini_finish_to_openai(reason: &str) -> &'static str {
    match reason {
        "MAX_TOKENS" => "length",
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" => "content_filter",
        _ => "stop",
    }
}

pub fn gemini_finish_to_claude(reason: &str) -> &'static str {
    match reason {
        "MAX_TOKENS" => "max_tokens",
        _ => "end_turn",
    }
}

pub fn openai_finish_to_claude(reason: &str) -> &'static str {
    match reason {
        "length" => "max_tokens",
        "tool_calls" | "function_call" => "tool_use",
        _ => "end_turn",
    }
}

pub fn openai_finish_to_gemini(reason: &str) -> &'static str {
    match reason {
        "length" => "MAX_TOKENS",
        "content_filter" => "SAFETY",
        _ => "STOP",
    }
}

pub fn claude_stop_to_openai(reason: &str) -> &'static str {
    match reason {
        "max_tokens" => "length",
        "tool_use" => "tool_calls",
        _ => "stop",
    }
}

pub fn claude_stop_to_gemini(reason: &str) -> &'static str {
    match reason {
        "max_tokens" => "MAX_TOKENS",
        _ => "STOP",
    }
}

// ---- multimodal ----

pub fn parse_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (meta, data) = rest.split_once(',')?;
    let (mime, encoding) = meta.split_once(';')?;
    if encoding != "base64" {
        return None;
    }
    Some((mime.to_string(), data.to_string()))
}

pub fn to_data_url(mime: &str, data: &str) -> String {
    format!("data:{mime};base64,{data}")
}

// ---- tool-call arguments ----

/// OpenAI carries arguments as a JSON string, Gemini/Claude as an object.
pub fn args_to_value(arguments: &str) -> JsonValue {
    serde_json::from_str(arguments).unwrap_or(JsonValue::String(arguments.to_string()))
}

pub fn value_to_args(value: Option<&JsonValue>) -> String {
    match value {
        Some(value) => serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string()),
        None => "{}".to_string(),
    }
}

// ---- usage ----

pub fn gemini_usage_to_openai(usage: &gemini::UsageMetadata) -> openai_chat::Usage {
    let prompt = usage.prompt_token_count.unwrap_or(0);
    let completion =
        usage.candidates_token_count.unwrap_or(0) + usage.thoughts_token_count.unwrap_or(0);
    openai_chat::Usage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: usage.total_token_count.unwrap_or(prompt + completion),
    }
}

pub fn gemini_usage_to_claude(usage: &gemini::UsageMetadata) -> claude::Usage {
    claude::Usage {
        input_tokens: usage.prompt_token_count.unwrap_or(0),
        output_tokens: usage.candidates_token_count.unwrap_or(0)
            + usage.thoughts_token_count.unwrap_or(0),
        cache_creation_input_tokens: None,
        cache_read_input_tokens: None,
    }
}

pub fn gemini_usage_to_responses(usage: &gemini::UsageMetadata) -> openai_responses::ResponseUsage {
    let input = usage.prompt_token_count.unwrap_or(0);
    let output =
        usage.candidates_token_count.unwrap_or(0) + usage.thoughts_token_count.unwrap_or(0);
    openai_responses::ResponseUsage {
        input_tokens: input,
        output_tokens: output,
        total_tokens: usage.total_token_count.unwrap_or(input + output),
    }
}

pub fn claude_usage_to_openai(usage: &claude::Usage) -> openai_chat::Usage {
    openai_chat::Usage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: usage.input_tokens + usage.output_tokens,
    }
}

pub fn claude_usage_to_gemini(usage: &claude::Usage) -> gemini::UsageMetadata {
    gemini::UsageMetadata {
        prompt_token_count: Some(usage.input_tokens),
        candidates_token_count: Some(usage.output_tokens),
        thoughts_token_count: None,
        total_token_count: Some(usage.input_tokens + usage.output_tokens),
    }
}

pub fn claude_usage_to_responses(usage: &claude::Usage) -> openai_responses::ResponseUsage {
    openai_responses::ResponseUsage {
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        total_tokens: usage.input_tokens + usage.output_tokens,
    }
}

pub fn openai_usage_to_claude(usage: &openai_chat::Usage) -> claude::Usage {
    claude::Usage {
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        cache_creation_input_tokens: None,
        cache_read_input_tokens: None,
    }
}

pub fn openai_usage_to_gemini(usage: &openai_chat::Usage) -> gemini::UsageMetadata {
    gemini::UsageMetadata {
        prompt_token_count: Some(usage.prompt_tokens),
        candidates_token_count: Some(usage.completion_tokens),
        thoughts_token_count: None,
        total_token_count: Some(usage.total_tokens),
    }
}

pub fn openai_usage_to_responses(usage: &openai_chat::Usage) -> openai_responses::ResponseUsage {
    openai_responses::ResponseUsage {
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
    }
}

pub fn responses_usage_to_openai(usage: &openai_responses::ResponseUsage) -> openai_chat::Usage {
    openai_chat::Usage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: usage.total_tokens,
    }
}

pub fn responses_usage_to_claude(usage: &openai_responses::ResponseUsage) -> claude::Usage {
    claude::Usage {
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        cache_creation_input_tokens: None,
        cache_read_input_tokens: None,
    }
}

pub fn responses_usage_to_gemini(usage: &openai_responses::ResponseUsage) -> gemini::UsageMetadata {
    gemini::UsageMetadata {
        prompt_token_count: Some(usage.input_tokens),
        candidates_token_count: Some(usage.output_tokens),
        thoughts_token_count: None,
        total_token_count: Some(usage.total_tokens),
    }
}
