use std::collections::HashMap;

use serde_json::Value as JsonValue;

use crate::generate;
use crate::stream::StreamTransformer;
use crate::tokens;
use crate::types::{Proto, TransformError};

type RequestFn = fn(&[u8]) -> Result<Vec<u8>, TransformError>;
type ResponseFn = fn(&[u8], &str) -> Result<Vec<u8>, TransformError>;
type TokenCounterFn = fn(&[u8]) -> i64;

/// One registered `(from, to)` conversion: inbound requests from→to, upstream
/// responses and stream events to→from.
#[derive(Debug)]
pub struct Translator {
    pub from: Proto,
    pub to: Proto,
    request: RequestFn,
    response: ResponseFn,
    pub token_counter: Option<TokenCounterFn>,
}

impl Translator {
    /// Convert an inbound request body and pin it to `model` (the upstream
    /// model id, prefix-stripped by the router).
    pub fn convert_request(&self, model: &str, body: &[u8]) -> Result<Vec<u8>, TransformError> {
        let converted = (self.request)(body)?;
        set_model(self.to, converted, model)
    }

    /// Convert a non-streaming upstream response body.
    pub fn convert_response(&self, model: &str, body: &[u8]) -> Result<Vec<u8>, TransformError> {
        (self.response)(body, model)
    }

    pub fn stream_state(&self, model: &str) -> Result<StreamTransformer, TransformError> {
        StreamTransformer::new(self.from, self.to, model)
    }
}

/// Flat registry keyed by ordered protocol pair, populated exactly once at
/// startup. A missing entry at request time is a configuration bug, not a
/// client error.
pub struct TranslatorRegistry {
    entries: HashMap<(Proto, Proto), Translator>,
}

impl Default for TranslatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TranslatorRegistry {
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        for translator in build_translators() {
            entries.insert((translator.from, translator.to), translator);
        }
        Self { entries }
    }

    pub fn lookup(&self, from: Proto, to: Proto) -> Result<&Translator, TransformError> {
        self.entries
            .get(&(from, to))
            .ok_or(TransformError::UnsupportedPair { from, to })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn build_translators() -> Vec<Translator> {
    let mut out = Vec::new();

    // Identity entries keep the pipeline uniform: the request is reparsed and
    // repinned to the routed model, everything else passes through.
    for proto in Proto::ALL {
        out.push(Translator {
            from: proto,
            to: proto,
            request: identity_request,
            response: identity_response,
            token_counter: Some(tokens::estimate_request_tokens),
        });
    }

    macro_rules! pair {
        ($from:expr, $to:expr, $module:ident, req_model) => {
            out.push(Translator {
                from: $from,
                to: $to,
                request: |body| {
                    let req = decode(body)?;
                    encode(&generate::$module::request(req))
                },
                response: |body, model| {
                    let resp = decode(body)?;
                    encode(&generate::$module::response(resp, model))
                },
                token_counter: Some(tokens::estimate_request_tokens),
            });
        };
        ($from:expr, $to:expr, $module:ident, req_with_model) => {
            out.push(Translator {
                from: $from,
                to: $to,
                request: |body| {
                    let req = decode(body)?;
                    // Model is pinned afterwards by `convert_request`.
                    encode(&generate::$module::request(req, ""))
                },
                response: |body, model| {
                    let resp = decode(body)?;
                    encode(&generate::$module::response(resp, model))
                },
                token_counter: Some(tokens::estimate_request_tokens),
            });
        };
    }

    pair!(Proto::OpenAiChat, Proto::Gemini, openai_chat2gemini, req_model);
    pair!(Proto::OpenAiChat, Proto::Claude, openai_chat2claude, req_model);
    pair!(
        Proto::OpenAiChat,
        Proto::OpenAiResponses,
        openai_chat2openai_responses,
        req_model
    );
    pair!(Proto::Claude, Proto::Gemini, claude2gemini, req_model);
    pair!(Proto::Claude, Proto::OpenAiChat, claude2openai_chat, req_model);
    pair!(
        Proto::Claude,
        Proto::OpenAiResponses,
        claude2openai_responses,
        req_model
    );
    pair!(Proto::Gemini, Proto::OpenAiChat, gemini2openai_chat, req_with_model);
    pair!(Proto::Gemini, Proto::Claude, gemini2claude, req_with_model);
    pair!(
        Proto::Gemini,
        Proto::OpenAiResponses,
        gemini2openai_responses,
        req_with_model
    );
    pair!(
        Proto::OpenAiResponses,
        Proto::OpenAiChat,
        openai_responses2openai_chat,
        req_model
    );
    pair!(Proto::OpenAiResponses, Proto::Claude, openai_responses2claude, req_model);
    pair!(Proto::OpenAiResponses, Proto::Gemini, openai_responses2gemini, req_model);

    out
}

fn decode<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, TransformError> {
    serde_json::from_slice(body).map_err(|err| TransformError::Decode(err.to_string()))
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, TransformError> {
    serde_json::to_vec(value).map_err(|err| TransformError::Encode(err.to_string()))
}

fn identity_request(body: &[u8]) -> Result<Vec<u8>, TransformError> {
    Ok(body.to_vec())
}

fn identity_response(body: &[u8], _model: &str) -> Result<Vec<u8>, TransformError> {
    Ok(body.to_vec())
}

/// Pin the upstream model id onto the converted body. Gemini carries the
/// model in the URL path, so its bodies are left alone.
fn set_model(to: Proto, body: Vec<u8>, model: &str) -> Result<Vec<u8>, TransformError> {
    if to == Proto::Gemini || model.is_empty() {
        return Ok(body);
    }
    let mut value: JsonValue =
        serde_json::from_slice(&body).map_err(|err| TransformError::Decode(err.to_string()))?;
    if let Some(object) = value.as_object_mut() {
        object.insert("model".to_string(), JsonValue::String(model.to_string()));
    }
    serde_json::to_vec(&value).map_err(|err| TransformError::Encode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_ordered_pair_is_registered() {
        let registry = TranslatorRegistry::new();
        for from in Proto::ALL {
            for to in Proto::ALL {
                assert!(
                    registry.lookup(from, to).is_ok(),
                    "missing translator {}->{}",
                    from.as_str(),
                    to.as_str()
                );
            }
        }
        assert_eq!(registry.len(), 16);
    }

    #[test]
    fn lookup_reports_pair_in_error() {
        let registry = TranslatorRegistry {
            entries: HashMap::new(),
        };
        let err = registry.lookup(Proto::Claude, Proto::Gemini).unwrap_err();
        assert!(matches!(
            err,
            TransformError::UnsupportedPair {
                from: Proto::Claude,
                to: Proto::Gemini
            }
        ));
    }

    #[test]
    fn convert_request_pins_model() {
        let registry = TranslatorRegistry::new();
        let translator = registry.lookup(Proto::OpenAiChat, Proto::Claude).unwrap();
        let body = serde_json::json!({
            "model": "inbound-name",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 10
        });
        let out = translator
            .convert_request("claude-sonnet-4-5", &serde_json::to_vec(&body).unwrap())
            .unwrap();
        let value: JsonValue = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["model"], "claude-sonnet-4-5");
    }
}
