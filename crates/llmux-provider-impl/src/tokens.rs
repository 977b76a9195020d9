//! Accurate token counting for OpenAI-shaped requests, used when a client
//! asks for a count and the selected upstream cannot answer server-side.

use tiktoken_rs::o200k_base;

use llmux_protocol::claude;

/// Count an Anthropic count-tokens request with the o200k BPE. Close enough
/// for the counting endpoint; real usage always comes from the upstream.
pub fn count_claude_request(req: &claude::CountTokensRequest) -> i64 {
    let Ok(bpe) = o200k_base() else {
        return heuristic(req);
    };

    let mut total: usize = 0;
    if let Some(system) = &req.system {
        total += bpe.encode_with_special_tokens(&system.flat_text()).len();
    }
    for message in &req.messages {
        total += 4;
        for block in message.content.clone().into_blocks() {
            match block {
                claude::ContentBlock::Text { text } => {
                    total += bpe.encode_with_special_tokens(&text).len();
                }
                claude::ContentBlock::ToolUse { name, input, .. } => {
                    total += bpe.encode_with_special_tokens(&name).len();
                    total += bpe
                        .encode_with_special_tokens(&input.to_string())
                        .len();
                }
                claude::ContentBlock::ToolResult { content, .. } => {
                    if let Some(content) = content {
                        total += bpe.encode_with_special_tokens(&content.flat_text()).len();
                    }
                }
                // Images are billed by dimensions upstream; approximate.
                claude::ContentBlock::Image { .. } => total += 1600,
                claude::ContentBlock::Thinking { thinking, .. } => {
                    total += bpe.encode_with_special_tokens(&thinking).len();
                }
            }
        }
    }
    for tool in req.tools.as_deref().unwrap_or(&[]) {
        total += bpe.encode_with_special_tokens(&tool.name).len();
        total += bpe
            .encode_with_special_tokens(&tool.input_schema.to_string())
            .len();
    }
    total as i64
}

fn heuristic(req: &claude::CountTokensRequest) -> i64 {
    let bytes = serde_json::to_vec(req).map(|b| b.len()).unwrap_or(0);
    (bytes / 4) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_grow_with_input() {
        let small: claude::CountTokensRequest = serde_json::from_value(serde_json::json!({
            "model": "claude-sonnet-4-5",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();
        let big: claude::CountTokensRequest = serde_json::from_value(serde_json::json!({
            "model": "claude-sonnet-4-5",
            "messages": [{"role": "user", "content": "hello ".repeat(200)}]
        }))
        .unwrap();
        assert!(count_claude_request(&big) > count_claude_request(&small));
    }
}
