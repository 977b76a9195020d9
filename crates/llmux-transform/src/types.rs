use serde::{Deserialize, Serialize};

use llmux_protocol::{claude, gemini, openai_chat, openai_responses};

/// Canonical wire protocols the translator registry enumerates.
///
/// Provider families that speak an enveloped or dialect form of one of these
/// (gemini-cli, antigravity, codex, qwen, iflow, kiro) resolve to the base
/// protocol here; the envelope is applied by the owning executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Proto {
    OpenAiChat,
    OpenAiResponses,
    Claude,
    Gemini,
}

impl Proto {
    pub const ALL: [Proto; 4] = [
        Proto::OpenAiChat,
        Proto::OpenAiResponses,
        Proto::Claude,
        Proto::Gemini,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Proto::OpenAiChat => "openai_chat",
            Proto::OpenAiResponses => "openai_responses",
            Proto::Claude => "claude",
            Proto::Gemini => "gemini",
        }
    }
}

/// How a protocol frames its streamed responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamFormat {
    /// `event: <name>` + `data:` frames (Claude, OpenAI Responses).
    SseNamedEvent,
    /// Bare `data:` frames terminated by `data: [DONE]` (OpenAI Chat).
    SseDataOnly,
    /// Newline-delimited JSON objects (Gemini).
    JsonStream,
}

pub fn stream_format(proto: Proto) -> StreamFormat {
    match proto {
        Proto::Claude => StreamFormat::SseNamedEvent,
        Proto::OpenAiResponses => StreamFormat::SseNamedEvent,
        Proto::OpenAiChat => StreamFormat::SseDataOnly,
        Proto::Gemini => StreamFormat::JsonStream,
    }
}

/// One decoded stream event in whichever protocol produced it.
#[allow(clippy::large_enum_variant)]
#[derive(Debug, Clone)]
pub enum StreamEvent {
    OpenAiChat(openai_chat::ChatCompletionChunk),
    OpenAiResponses(openai_responses::ResponseStreamEvent),
    Claude(claude::StreamEvent),
    Gemini(gemini::GenerateContentResponse),
}

impl StreamEvent {
    pub fn proto(&self) -> Proto {
        match self {
            StreamEvent::OpenAiChat(_) => Proto::OpenAiChat,
            StreamEvent::OpenAiResponses(_) => Proto::OpenAiResponses,
            StreamEvent::Claude(_) => Proto::Claude,
            StreamEvent::Gemini(_) => Proto::Gemini,
        }
    }
}

#[derive(Debug, Clone)]
pub enum TransformError {
    /// Missing registration; a configuration bug, never retried.
    UnsupportedPair { from: Proto, to: Proto },
    /// A stream event arrived in a protocol the transformer does not expect.
    ProtoMismatch,
    Decode(String),
    Encode(String),
}

impl std::fmt::Display for TransformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransformError::UnsupportedPair { from, to } => write!(
                f,
                "no translator registered for {}->{}",
                from.as_str(),
                to.as_str()
            ),
            TransformError::ProtoMismatch => write!(f, "stream event protocol mismatch"),
            TransformError::Decode(msg) => write!(f, "decode: {msg}"),
            TransformError::Encode(msg) => write!(f, "encode: {msg}"),
        }
    }
}

impl std::error::Error for TransformError {}
