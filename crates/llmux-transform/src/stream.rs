use crate::generate;
use crate::types::{Proto, StreamEvent, TransformError};

/// Per-stream conversion state.
///
/// One value is allocated before the first upstream chunk and dropped after
/// the last; it is owned by exactly one task for the stream's lifetime.
/// `push` accepts events in the upstream protocol and yields zero or more
/// events in the client protocol; `finish` flushes anything pending when the
/// upstream ends without a terminal event.
pub enum StreamTransformer {
    Passthrough(Proto),
    OpenAiChatFromGemini(generate::openai_chat2gemini::StreamState),
    OpenAiChatFromClaude(generate::openai_chat2claude::StreamState),
    OpenAiChatFromResponses(generate::openai_chat2openai_responses::StreamState),
    ClaudeFromGemini(generate::claude2gemini::StreamState),
    ClaudeFromOpenAiChat(generate::claude2openai_chat::StreamState),
    ClaudeFromResponses(generate::claude2openai_responses::StreamState),
    GeminiFromOpenAiChat(generate::gemini2openai_chat::StreamState),
    GeminiFromClaude(generate::gemini2claude::StreamState),
    GeminiFromResponses(generate::gemini2openai_responses::StreamState),
    ResponsesFromGemini(generate::openai_responses2gemini::StreamState),
    ResponsesFromClaude(generate::openai_responses2claude::StreamState),
    ResponsesFromOpenAiChat(generate::openai_responses2openai_chat::StreamState),
}

impl StreamTransformer {
    /// `from` is the client protocol, `to` the upstream protocol; events flow
    /// upstream→client, i.e. to→from.
    pub fn new(from: Proto, to: Proto, model: &str) -> Result<Self, TransformError> {
        if from == to {
            return Ok(StreamTransformer::Passthrough(from));
        }
        let state = match (from, to) {
            (Proto::OpenAiChat, Proto::Gemini) => StreamTransformer::OpenAiChatFromGemini(
                generate::openai_chat2gemini::StreamState::new(model),
            ),
            (Proto::OpenAiChat, Proto::Claude) => StreamTransformer::OpenAiChatFromClaude(
                generate::openai_chat2claude::StreamState::new(model),
            ),
            (Proto::OpenAiChat, Proto::OpenAiResponses) => {
                StreamTransformer::OpenAiChatFromResponses(
                    generate::openai_chat2openai_responses::StreamState::new(model),
                )
            }
            (Proto::Claude, Proto::Gemini) => {
                StreamTransformer::ClaudeFromGemini(generate::claude2gemini::StreamState::new(model))
            }
            (Proto::Claude, Proto::OpenAiChat) => StreamTransformer::ClaudeFromOpenAiChat(
                generate::claude2openai_chat::StreamState::new(model),
            ),
            (Proto::Claude, Proto::OpenAiResponses) => StreamTransformer::ClaudeFromResponses(
                generate::claude2openai_responses::StreamState::new(model),
            ),
            (Proto::Gemini, Proto::OpenAiChat) => StreamTransformer::GeminiFromOpenAiChat(
                generate::gemini2openai_chat::StreamState::new(model),
            ),
            (Proto::Gemini, Proto::Claude) => StreamTransformer::GeminiFromClaude(
                generate::gemini2claude::StreamState::new(model),
            ),
            (Proto::Gemini, Proto::OpenAiResponses) => StreamTransformer::GeminiFromResponses(
                generate::gemini2openai_responses::StreamState::new(model),
            ),
            (Proto::OpenAiResponses, Proto::Gemini) => StreamTransformer::ResponsesFromGemini(
                generate::openai_responses2gemini::StreamState::new(model),
            ),
            (Proto::OpenAiResponses, Proto::Claude) => StreamTransformer::ResponsesFromClaude(
                generate::openai_responses2claude::StreamState::new(model),
            ),
            (Proto::OpenAiResponses, Proto::OpenAiChat) => {
                StreamTransformer::ResponsesFromOpenAiChat(
                    generate::openai_responses2openai_chat::StreamState::new(model),
                )
            }
            _ => return Err(TransformError::UnsupportedPair { from, to }),
        };
        Ok(state)
    }

    pub fn push(&mut self, event: StreamEvent) -> Result<Vec<StreamEvent>, TransformError> {
        match (self, event) {
            (StreamTransformer::Passthrough(proto), event) => {
                if event.proto() == *proto {
                    Ok(vec![event])
                } else {
                    Err(TransformError::ProtoMismatch)
                }
            }
            (StreamTransformer::OpenAiChatFromGemini(state), StreamEvent::Gemini(event)) => {
                Ok(state.push(event).into_iter().map(StreamEvent::OpenAiChat).collect())
            }
            (StreamTransformer::OpenAiChatFromClaude(state), StreamEvent::Claude(event)) => {
                Ok(state.push(event).into_iter().map(StreamEvent::OpenAiChat).collect())
            }
            (
                StreamTransformer::OpenAiChatFromResponses(state),
                StreamEvent::OpenAiResponses(event),
            ) => Ok(state.push(event).into_iter().map(StreamEvent::OpenAiChat).collect()),
            (StreamTransformer::ClaudeFromGemini(state), StreamEvent::Gemini(event)) => {
                Ok(state.push(event).into_iter().map(StreamEvent::Claude).collect())
            }
            (StreamTransformer::ClaudeFromOpenAiChat(state), StreamEvent::OpenAiChat(event)) => {
                Ok(state.push(event).into_iter().map(StreamEvent::Claude).collect())
            }
            (
                StreamTransformer::ClaudeFromResponses(state),
                StreamEvent::OpenAiResponses(event),
            ) => Ok(state.push(event).into_iter().map(StreamEvent::Claude).collect()),
            (StreamTransformer::GeminiFromOpenAiChat(state), StreamEvent::OpenAiChat(event)) => {
                Ok(state.push(event).into_iter().map(StreamEvent::Gemini).collect())
            }
            (StreamTransformer::GeminiFromClaude(state), StreamEvent::Claude(event)) => {
                Ok(state.push(event).into_iter().map(StreamEvent::Gemini).collect())
            }
            (
                StreamTransformer::GeminiFromResponses(state),
                StreamEvent::OpenAiResponses(event),
            ) => Ok(state.push(event).into_iter().map(StreamEvent::Gemini).collect()),
            (StreamTransformer::ResponsesFromGemini(state), StreamEvent::Gemini(event)) => Ok(state
                .push(event)
                .into_iter()
                .map(StreamEvent::OpenAiResponses)
                .collect()),
            (StreamTransformer::ResponsesFromClaude(state), StreamEvent::Claude(event)) => Ok(state
                .push(event)
                .into_iter()
                .map(StreamEvent::OpenAiResponses)
                .collect()),
            (
                StreamTransformer::ResponsesFromOpenAiChat(state),
                StreamEvent::OpenAiChat(event),
            ) => Ok(state
                .push(event)
                .into_iter()
                .map(StreamEvent::OpenAiResponses)
                .collect()),
            _ => Err(TransformError::ProtoMismatch),
        }
    }

    pub fn finish(&mut self) -> Vec<StreamEvent> {
        match self {
            StreamTransformer::Passthrough(_) => Vec::new(),
            StreamTransformer::OpenAiChatFromGemini(state) => {
                state.finish().into_iter().map(StreamEvent::OpenAiChat).collect()
            }
            StreamTransformer::OpenAiChatFromClaude(state) => {
                state.finish().into_iter().map(StreamEvent::OpenAiChat).collect()
            }
            StreamTransformer::OpenAiChatFromResponses(state) => {
                state.finish().into_iter().map(StreamEvent::OpenAiChat).collect()
            }
            StreamTransformer::ClaudeFromGemini(state) => {
                state.finish().into_iter().map(StreamEvent::Claude).collect()
            }
            StreamTransformer::ClaudeFromOpenAiChat(state) => {
                state.finish().into_iter().map(StreamEvent::Claude).collect()
            }
            StreamTransformer::ClaudeFromResponses(state) => {
                state.finish().into_iter().map(StreamEvent::Claude).collect()
            }
            StreamTransformer::GeminiFromOpenAiChat(state) => {
                state.finish().into_iter().map(StreamEvent::Gemini).collect()
            }
            StreamTransformer::GeminiFromClaude(state) => {
                state.finish().into_iter().map(StreamEvent::Gemini).collect()
            }
            StreamTransformer::GeminiFromResponses(state) => {
                state.finish().into_iter().map(StreamEvent::Gemini).collect()
            }
            StreamTransformer::ResponsesFromGemini(state) => state
                .finish()
                .into_iter()
                .map(StreamEvent::OpenAiResponses)
                .collect(),
            StreamTransformer::ResponsesFromClaude(state) => state
                .finish()
                .into_iter()
                .map(StreamEvent::OpenAiResponses)
                .collect(),
            StreamTransformer::ResponsesFromOpenAiChat(state) => state
                .finish()
                .into_iter()
                .map(StreamEvent::OpenAiResponses)
                .collect(),
        }
    }
}
