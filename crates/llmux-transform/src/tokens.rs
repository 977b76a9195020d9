//! Fallback input-token estimation for upstreams that do not report usage and
//! cannot count tokens server-side.

use serde_json::Value as JsonValue;

/// Rough chars/4 heuristic over every string in the request body, plus a
/// small per-message overhead. Good enough for quota accounting; never used
/// when the upstream supplies real usage.
pub fn estimate_request_tokens(body: &[u8]) -> i64 {
    let Ok(value) = serde_json::from_slice::<JsonValue>(body) else {
        return 0;
    };
    let mut chars = 0usize;
    let mut messages = 0usize;
    walk(&value, &mut chars, &mut messages);
    (chars / 4 + messages * 4) as i64
}

fn walk(value: &JsonValue, chars: &mut usize, messages: &mut usize) {
    match value {
        JsonValue::String(text) => *chars += text.chars().count(),
        JsonValue::Array(items) => {
            for item in items {
                walk(item, chars, messages);
            }
        }
        JsonValue::Object(object) => {
            if object.contains_key("role") {
                *messages += 1;
            }
            for item in object.values() {
                walk(item, chars, messages);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_scale_with_text_length() {
        let short = serde_json::to_vec(&serde_json::json!({
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();
        let long = serde_json::to_vec(&serde_json::json!({
            "messages": [{"role": "user", "content": "a".repeat(400)}]
        }))
        .unwrap();
        assert!(estimate_request_tokens(&long) > estimate_request_tokens(&short));
    }

    #[test]
    fn malformed_body_counts_zero() {
        assert_eq!(estimate_request_tokens(b"not json"), 0);
    }
}
