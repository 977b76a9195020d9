//! Gemini inbound, OpenAI Chat Completions upstream.

use llmux_protocol::gemini;
use llmux_protocol::openai_chat as oai;

use super::helpers;

pub fn request(req: gemini::GenerateContentRequest, model: &str) -> oai::ChatCompletionRequest {
    let mut messages = Vec::new();
    let mut tool_counter = 0usize;

    if let Some(system) = &req.system_instruction {
        let text = flat_text(system);
        if !text.is_empty() {
            messages.push(oai::ChatMessage {
                role: "system".to_string(),
                content: Some(oai::MessageContent::Text(text)),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            });
        }
    }

    for content in &req.contents {
        let role = content.role.as_deref().unwrap_or("user");
        let mut parts = Vec::new();
        let mut tool_calls = Vec::new();
        let mut tool_results: Vec<(String, String)> = Vec::new();

        for part in &content.parts {
            if let Some(text) = &part.text {
                parts.push(oai::ContentPart::Text { text: text.clone() });
            }
            if let Some(blob) = &part.inline_data {
                parts.push(oai::ContentPart::ImageUrl {
                    image_url: oai::ImageUrl {
                        url: helpers::to_data_url(&blob.mime_type, &blob.data),
                        detail: None,
                    },
                });
            }
            if let Some(file) = &part.file_data {
                parts.push(oai::ContentPart::ImageUrl {
                    image_url: oai::ImageUrl {
                        url: file.file_uri.clone(),
                        detail: None,
                    },
                });
            }
            if let Some(call) = &part.function_call {
                tool_calls.push(oai::ToolCall {
                    id: call
                        .id
                        .clone()
                        .unwrap_or_else(|| helpers::synth_tool_id(&mut tool_counter)),
                    kind: "function".to_string(),
                    function: oai::FunctionCall {
                        name: call.name.clone(),
                        arguments: helpers::value_to_args(call.args.as_ref()),
                    },
                });
            }
            if let Some(resp) = &part.function_response {
                let output = resp
                    .response
                    .get("output")
                    .and_then(|value| value.as_str())
                    .map(|value| value.to_string())
                    .unwrap_or_else(|| resp.response.to_string());
                tool_results.push((resp.id.clone().unwrap_or_else(|| resp.name.clone()), output));
            }
        }

        for (call_id, output) in tool_results {
            messages.push(oai::ChatMessage {
                role: "tool".to_string(),
                content: Some(oai::MessageContent::Text(output)),
                tool_calls: None,
                tool_call_id: Some(call_id),
                name: None,
            });
        }

        if parts.is_empty() && tool_calls.is_empty() {
            continue;
        }
        messages.push(oai::ChatMessage {
            role: if role == "model" { "assistant" } else { "user" }.to_string(),
            content: (!parts.is_empty()).then_some(oai::MessageContent::Parts(parts)),
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            tool_call_id: None,
            name: None,
        });
    }

    let tools = req.tools.as_ref().map(|tools| {
        tools
            .iter()
            .flat_map(|tool| tool.function_declarations.clone().unwrap_or_default())
            .map(|decl| oai::ToolDefinition {
                kind: "function".to_string(),
                function: oai::FunctionDefinition {
                    name: decl.name,
                    description: decl.description,
                    parameters: decl.parameters,
                },
            })
            .collect::<Vec<_>>()
    });

    let config = req.generation_config.as_ref();
    oai::ChatCompletionRequest {
        model: model.to_string(),
        messages,
        temperature: config.and_then(|c| c.temperature),
        top_p: config.and_then(|c| c.top_p),
        max_tokens: None,
        max_completion_tokens: config.and_then(|c| c.max_output_tokens),
        stop: config
            .and_then(|c| c.stop_sequences.clone())
            .map(oai::StopSequences::Many),
        stream: None,
        stream_options: None,
        tools: tools.filter(|tools| !tools.is_empty()),
        tool_choice: tool_choice(req.tool_config.as_ref()),
        reasoning_effort: None,
        metadata: None,
        user: None,
    }
}

fn flat_text(content: &gemini::Content) -> String {
    content
        .parts
        .iter()
        .filter_map(|part| part.text.as_deref())
        .collect::<Vec<_>>()
        .join("\n")
}

fn tool_choice(config: Option<&gemini::ToolConfig>) -> Option<oai::ToolChoice> {
    let calling = config?.function_calling_config.as_ref()?;
    if let Some(names) = &calling.allowed_function_names
        && let Some(name) = names.first()
    {
        return Some(oai::ToolChoice::Named {
            kind: "function".to_string(),
            function: oai::NamedFunction { name: name.clone() },
        });
    }
    let mode = match calling.mode.as_deref()? {
        "NONE" => "none",
        "ANY" => "required",
        _ => "auto",
    };
    Some(oai::ToolChoice::Mode(mode.to_string()))
}

pub fn response(resp: oai::ChatCompletionResponse, _model: &str) -> gemini::GenerateContentResponse {
    let candidates = resp
        .choices
        .iter()
        .map(|choice| {
            let mut parts = Vec::new();
            if let Some(text) = &choice.message.content
                && !text.is_empty()
            {
                parts.push(gemini::Part::text(text.clone()));
            }
            for call in choice.message.tool_calls.clone().unwrap_or_default() {
                parts.push(gemini::Part {
                    function_call: Some(gemini::FunctionCall {
                        id: Some(call.id),
                        name: call.function.name,
                        args: Some(helpers::args_to_value(&call.function.arguments)),
                    }),
                    ..Default::default()
                });
            }
            gemini::Candidate {
                content: Some(gemini::Content {
                    role: Some("model".to_string()),
                    parts,
                }),
                finish_reason: choice
                    .finish_reason
                    .as_deref()
                    .map(|reason| helpers::openai_finish_to_gemini(reason).to_string()),
                index: Some(choice.index),
            }
        })
        .collect();

    gemini::GenerateContentResponse {
        candidates,
        usage_metadata: resp.usage.as_ref().map(helpers::openai_usage_to_gemini),
        model_version: Some(resp.model.clone()),
        response_id: Some(resp.id.clone()),
    }
}

/// OpenAI chat chunks to Gemini stream chunks.
///
/// Tool-call arguments may arrive in fragments but Gemini emits complete
/// `functionCall` parts, so fragments accumulate until the finish chunk.
pub struct StreamState {
    model: String,
    calls: Vec<PendingCall>,
    tool_counter: usize,
}

struct PendingCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

impl StreamState {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            calls: Vec::new(),
            tool_counter: 0,
        }
    }

    pub fn push(&mut self, chunk: oai::ChatCompletionChunk) -> Vec<gemini::GenerateContentResponse> {
        let mut out = Vec::new();
        let Some(choice) = chunk.choices.first() else {
            // Usage-only trailer.
            if let Some(usage) = &chunk.usage {
                out.push(self.trailer(None, usage));
            }
            return out;
        };

        let mut parts = Vec::new();
        if let Some(text) = &choice.delta.content
            && !text.is_empty()
        {
            parts.push(gemini::Part::text(text.clone()));
        }
        if let Some(text) = &choice.delta.reasoning_content
            && !text.is_empty()
        {
            parts.push(gemini::Part {
                text: Some(text.clone()),
                thought: Some(true),
                ..Default::default()
            });
        }
        for call in choice.delta.tool_calls.clone().unwrap_or_default() {
            let index = call.index as usize;
            while self.calls.len() <= index {
                self.calls.push(PendingCall {
                    id: None,
                    name: String::new(),
                    arguments: String::new(),
                });
            }
            let slot = &mut self.calls[index];
            if let Some(id) = call.id {
                slot.id = Some(id);
            }
            if let Some(function) = call.function {
                if let Some(name) = function.name {
                    slot.name = name;
                }
                if let Some(arguments) = function.arguments {
                    slot.arguments.push_str(&arguments);
                }
            }
        }

        if !parts.is_empty() {
            out.push(gemini::GenerateContentResponse {
                candidates: vec![gemini::Candidate {
                    content: Some(gemini::Content {
                        role: Some("model".to_string()),
                        parts,
                    }),
                    finish_reason: None,
                    index: Some(0),
                }],
                usage_metadata: None,
                model_version: Some(self.model.clone()),
                response_id: None,
            });
        }

        if let Some(reason) = choice.finish_reason.as_deref() {
            let mut final_parts = Vec::new();
            for call in self.calls.drain(..) {
                if call.name.is_empty() {
                    continue;
                }
                final_parts.push(gemini::Part {
                    function_call: Some(gemini::FunctionCall {
                        id: call
                            .id
                            .or_else(|| Some(helpers::synth_tool_id(&mut self.tool_counter))),
                        name: call.name,
                        args: Some(helpers::args_to_value(&call.arguments)),
                    }),
                    ..Default::default()
                });
            }
            out.push(gemini::GenerateContentResponse {
                candidates: vec![gemini::Candidate {
                    content: (!final_parts.is_empty()).then(|| gemini::Content {
                        role: Some("model".to_string()),
                        parts: final_parts,
                    }),
                    finish_reason: Some(helpers::openai_finish_to_gemini(reason).to_string()),
                    index: Some(0),
                }],
                usage_metadata: chunk.usage.as_ref().map(helpers::openai_usage_to_gemini),
                model_version: Some(self.model.clone()),
                response_id: None,
            });
        }

        out
    }

    pub fn finish(&mut self) -> Vec<gemini::GenerateContentResponse> {
        Vec::new()
    }

    fn trailer(
        &self,
        finish_reason: Option<String>,
        usage: &oai::Usage,
    ) -> gemini::GenerateContentResponse {
        gemini::GenerateContentResponse {
            candidates: finish_reason
                .map(|reason| {
                    vec![gemini::Candidate {
                        content: None,
                        finish_reason: Some(reason),
                        index: Some(0),
                    }]
                })
                .unwrap_or_default(),
            usage_metadata: Some(helpers::openai_usage_to_gemini(usage)),
            model_version: Some(self.model.clone()),
            response_id: None,
        }
    }
}
