//! Byte-level stream framing: decode upstream chunks into typed events and
//! encode translated events in the client protocol's framing.

use bytes::Bytes;

use llmux_protocol::sse::{SseEvent, SseParser};
use llmux_transform::{Proto, StreamEvent, StreamFormat, stream_format};

#[derive(Debug)]
pub struct StreamDecoder {
    proto: Proto,
    format: StreamFormat,
    sse: SseParser,
    json_buf: String,
}

impl StreamDecoder {
    pub fn new(proto: Proto) -> Self {
        Self {
            proto,
            format: stream_format(proto),
            sse: SseParser::new(),
            json_buf: String::new(),
        }
    }

    pub fn push_bytes(&mut self, chunk: &Bytes) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        match self.format {
            StreamFormat::SseNamedEvent | StreamFormat::SseDataOnly => {
                for event in self.sse.push_bytes(chunk) {
                    if let Some(item) = decode_sse_event(self.proto, &event) {
                        out.push(item);
                    }
                }
            }
            StreamFormat::JsonStream => {
                // Gemini upstreams speak SSE when asked (`alt=sse`) and
                // newline-delimited JSON otherwise; accept both.
                for event in self.sse.push_bytes(chunk) {
                    if let Some(item) = decode_sse_event(self.proto, &event) {
                        out.push(item);
                    }
                }
                if let Ok(text) = std::str::from_utf8(chunk) {
                    self.json_buf.push_str(text);
                    while let Some(pos) = self.json_buf.find('\n') {
                        let mut line = self.json_buf[..pos].to_string();
                        self.json_buf.drain(..=pos);
                        if line.ends_with('\r') {
                            line.pop();
                        }
                        let line = line.trim();
                        if line.is_empty() || !(line.starts_with('{') || line.starts_with('[')) {
                            continue;
                        }
                        if let Some(item) = decode_json_line(self.proto, line) {
                            out.push(item);
                        }
                    }
                }
            }
        }
        out
    }

    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        for event in self.sse.finish() {
            if let Some(item) = decode_sse_event(self.proto, &event) {
                out.push(item);
            }
        }
        if self.format == StreamFormat::JsonStream {
            let line = self.json_buf.trim();
            if !line.is_empty()
                && (line.starts_with('{') || line.starts_with('['))
                && let Some(item) = decode_json_line(self.proto, line)
            {
                out.push(item);
            }
            self.json_buf.clear();
        }
        out
    }
}

fn decode_sse_event(proto: Proto, event: &SseEvent) -> Option<StreamEvent> {
    let data = event.data.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    match proto {
        Proto::Claude => serde_json::from_str(data).ok().map(StreamEvent::Claude),
        Proto::OpenAiChat => serde_json::from_str(data).ok().map(StreamEvent::OpenAiChat),
        Proto::OpenAiResponses => serde_json::from_str(data)
            .ok()
            .map(StreamEvent::OpenAiResponses),
        Proto::Gemini => serde_json::from_str(data).ok().map(StreamEvent::Gemini),
    }
}

fn decode_json_line(proto: Proto, line: &str) -> Option<StreamEvent> {
    match proto {
        Proto::Gemini => serde_json::from_str(line).ok().map(StreamEvent::Gemini),
        _ => None,
    }
}

/// Frame one translated event for the client.
pub fn encode_stream_event(proto: Proto, event: &StreamEvent) -> Option<Bytes> {
    match (proto, event) {
        (Proto::Claude, StreamEvent::Claude(event)) => {
            let data = serde_json::to_string(event).ok()?;
            Some(encode_sse(Some(event.event_name()), &data))
        }
        (Proto::OpenAiChat, StreamEvent::OpenAiChat(event)) => {
            let data = serde_json::to_string(event).ok()?;
            Some(encode_sse(None, &data))
        }
        (Proto::OpenAiResponses, StreamEvent::OpenAiResponses(event)) => {
            let data = serde_json::to_string(event).ok()?;
            Some(encode_sse(Some(event.event_name()), &data))
        }
        (Proto::Gemini, StreamEvent::Gemini(event)) => {
            let mut data = serde_json::to_vec(event).ok()?;
            data.push(b'\n');
            Some(Bytes::from(data))
        }
        _ => None,
    }
}

/// Explicit done marker, where the protocol has one.
pub fn done_marker(proto: Proto) -> Option<Bytes> {
    match proto {
        Proto::OpenAiChat => Some(Bytes::from_static(b"data: [DONE]\n\n")),
        _ => None,
    }
}

pub fn content_type_for_stream(proto: Proto) -> &'static str {
    match proto {
        Proto::Gemini => "application/json",
        _ => "text/event-stream",
    }
}

pub const HEARTBEAT_FRAME: &[u8] = b": keep-alive\n\n";

fn encode_sse(event: Option<&str>, data: &str) -> Bytes {
    let mut out = String::new();
    if let Some(event) = event {
        out.push_str("event: ");
        out.push_str(event);
        out.push('\n');
    }
    for line in data.split('\n') {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    Bytes::from(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_chunks_frame_as_bare_data() {
        let chunk: llmux_protocol::openai_chat::ChatCompletionChunk =
            serde_json::from_value(serde_json::json!({
                "id": "chatcmpl-1", "object": "chat.completion.chunk",
                "created": 1, "model": "m",
                "choices": [{"index": 0, "delta": {"content": "hi"}}]
            }))
            .unwrap();
        let framed = encode_stream_event(Proto::OpenAiChat, &StreamEvent::OpenAiChat(chunk)).unwrap();
        let text = std::str::from_utf8(&framed).unwrap();
        assert!(text.starts_with("data: {"));
        assert!(text.ends_with("\n\n"));
        assert!(!text.contains("event:"));
    }

    #[test]
    fn claude_events_carry_event_names() {
        let event: llmux_protocol::claude::StreamEvent =
            serde_json::from_value(serde_json::json!({"type": "message_stop"})).unwrap();
        let framed = encode_stream_event(Proto::Claude, &StreamEvent::Claude(event)).unwrap();
        let text = std::str::from_utf8(&framed).unwrap();
        assert!(text.starts_with("event: message_stop\n"));
    }

    #[test]
    fn gemini_sse_and_json_lines_both_decode() {
        let mut decoder = StreamDecoder::new(Proto::Gemini);
        let sse = Bytes::from_static(b"data: {\"candidates\":[]}\n\n");
        assert_eq!(decoder.push_bytes(&sse).len(), 1);

        let mut decoder = StreamDecoder::new(Proto::Gemini);
        let line = Bytes::from_static(b"{\"candidates\":[]}\n");
        assert_eq!(decoder.push_bytes(&line).len(), 1);
    }

    #[test]
    fn done_marker_only_for_openai_chat() {
        assert!(done_marker(Proto::OpenAiChat).is_some());
        assert!(done_marker(Proto::Claude).is_none());
        assert!(done_marker(Proto::Gemini).is_none());
    }
}
