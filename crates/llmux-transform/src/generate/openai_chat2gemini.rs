//! OpenAI Chat Completions inbound, Gemini upstream.

use std::collections::HashMap;

use llmux_protocol::gemini;
use llmux_protocol::openai_chat as oai;

use super::helpers;

pub fn request(req: oai::ChatCompletionRequest) -> gemini::GenerateContentRequest {
    let mut system_texts = Vec::new();
    let mut contents: Vec<gemini::Content> = Vec::new();
    let mut call_names: HashMap<String, String> = HashMap::new();

    for message in req.messages {
        match helpers::coerce_chat_role(&message.role) {
            "system" | "developer" => {
                if let Some(content) = message.content {
                    let text = content.flat_text();
                    if !text.is_empty() {
                        system_texts.push(text);
                    }
                }
            }
            "assistant" => {
                let mut parts = Vec::new();
                if let Some(content) = message.content {
                    parts.extend(content_to_parts(content));
                }
                for call in message.tool_calls.unwrap_or_default() {
                    call_names.insert(call.id.clone(), call.function.name.clone());
                    parts.push(gemini::Part {
                        function_call: Some(gemini::FunctionCall {
                            id: Some(call.id),
                            name: call.function.name,
                            args: Some(helpers::args_to_value(&call.function.arguments)),
                        }),
                        ..Default::default()
                    });
                }
                if !parts.is_empty() {
                    contents.push(gemini::Content {
                        role: Some("model".to_string()),
                        parts,
                    });
                }
            }
            "tool" => {
                let call_id = message.tool_call_id.unwrap_or_default();
                let name = call_names
                    .get(&call_id)
                    .cloned()
                    .or(message.name)
                    .unwrap_or_else(|| call_id.clone());
                let output = message
                    .content
                    .map(|content| content.flat_text())
                    .unwrap_or_default();
                contents.push(gemini::Content {
                    role: Some("user".to_string()),
                    parts: vec![gemini::Part {
                        function_response: Some(gemini::FunctionResponse {
                            id: Some(call_id),
                            name,
                            response: serde_json::json!({ "output": output }),
                        }),
                        ..Default::default()
                    }],
                });
            }
            _ => {
                let parts = message.content.map(content_to_parts).unwrap_or_default();
                if !parts.is_empty() {
                    contents.push(gemini::Content {
                        role: Some("user".to_string()),
                        parts,
                    });
                }
            }
        }
    }

    let system_instruction = (!system_texts.is_empty()).then(|| gemini::Content {
        role: None,
        parts: vec![gemini::Part::text(system_texts.join("\n"))],
    });

    let tools = req.tools.filter(|tools| !tools.is_empty()).map(|tools| {
        vec![gemini::Tool {
            function_declarations: Some(
                tools
                    .into_iter()
                    .map(|tool| gemini::FunctionDeclaration {
                        name: tool.function.name,
                        description: tool.function.description,
                        parameters: tool.function.parameters,
                    })
                    .collect(),
            ),
            google_search: None,
        }]
    });

    let tool_config = req.tool_choice.and_then(tool_choice_to_config);
    let generation_config = generation_config(&req.temperature, &req.top_p, req.max_completion_tokens.or(req.max_tokens), req.stop);

    gemini::GenerateContentRequest {
        contents,
        system_instruction,
        tools,
        tool_config,
        generation_config,
        safety_settings: None,
    }
}

fn content_to_parts(content: oai::MessageContent) -> Vec<gemini::Part> {
    match content {
        oai::MessageContent::Text(text) => {
            if text.is_empty() {
                Vec::new()
            } else {
                vec![gemini::Part::text(text)]
            }
        }
        oai::MessageContent::Parts(parts) => parts
            .into_iter()
            .filter_map(|part| match part {
                oai::ContentPart::Text { text } => {
                    (!text.is_empty()).then(|| gemini::Part::text(text))
                }
                oai::ContentPart::ImageUrl { image_url } => {
                    Some(match helpers::parse_data_url(&image_url.url) {
                        Some((mime, data)) => gemini::Part {
                            inline_data: Some(gemini::Blob {
                                mime_type: mime,
                                data,
                            }),
                            ..Default::default()
                        },
                        None => gemini::Part {
                            file_data: Some(gemini::FileData {
                                mime_type: None,
                                file_uri: image_url.url,
                            }),
                            ..Default::default()
                        },
                    })
                }
                oai::ContentPart::File { file } => {
                    if let Some(file_id) = file.file_id {
                        Some(gemini::Part {
                            file_data: Some(gemini::FileData {
                                mime_type: None,
                                file_uri: file_id,
                            }),
                            ..Default::default()
                        })
                    } else {
                        file.file_data.map(|data| gemini::Part {
                            inline_data: Some(gemini::Blob {
                                mime_type: "application/octet-stream".to_string(),
                                data,
                            }),
                            ..Default::default()
                        })
                    }
                }
            })
            .collect(),
    }
}

fn tool_choice_to_config(choice: oai::ToolChoice) -> Option<gemini::ToolConfig> {
    let config = match choice {
        oai::ToolChoice::Mode(mode) => gemini::FunctionCallingConfig {
            mode: Some(
                match mode.as_str() {
                    "none" => "NONE",
                    "required" => "ANY",
                    _ => "AUTO",
                }
                .to_string(),
            ),
            allowed_function_names: None,
        },
        oai::ToolChoice::Named { function, .. } => gemini::FunctionCallingConfig {
            mode: Some("ANY".to_string()),
            allowed_function_names: Some(vec![function.name]),
        },
    };
    Some(gemini::ToolConfig {
        function_calling_config: Some(config),
    })
}

fn generation_config(
    temperature: &Option<f64>,
    top_p: &Option<f64>,
    max_tokens: Option<i64>,
    stop: Option<oai::StopSequences>,
) -> Option<gemini::GenerationConfig> {
    let stop_sequences = match stop {
        Some(oai::StopSequences::Single(value)) => Some(vec![value]),
        Some(oai::StopSequences::Many(values)) => Some(values),
        None => None,
    };
    if temperature.is_none() && top_p.is_none() && max_tokens.is_none() && stop_sequences.is_none()
    {
        return None;
    }
    Some(gemini::GenerationConfig {
        temperature: *temperature,
        top_p: *top_p,
        max_output_tokens: max_tokens,
        stop_sequences,
        ..Default::default()
    })
}

pub fn response(resp: gemini::GenerateContentResponse, model: &str) -> oai::ChatCompletionResponse {
    let id = resp
        .response_id
        .clone()
        .map(|rid| format!("chatcmpl-{rid}"))
        .unwrap_or_else(|| format!("chatcmpl-{}", helpers::now_unix()));
    let mut tool_counter = 0usize;

    let choices = resp
        .candidates
        .iter()
        .enumerate()
        .map(|(index, candidate)| {
            let mut text = String::new();
            let mut reasoning = String::new();
            let mut tool_calls = Vec::new();
            if let Some(content) = &candidate.content {
                for part in &content.parts {
                    if let Some(part_text) = &part.text {
                        if part.thought.unwrap_or(false) {
                            reasoning.push_str(part_text);
                        } else {
                            text.push_str(part_text);
                        }
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
                }
            }
            let finish_reason = if !tool_calls.is_empty() {
                Some("tool_calls".to_string())
            } else {
                candidate
                    .finish_reason
                    .as_deref()
                    .map(|reason| helpers::gemini_finish_to_openai(reason).to_string())
            };
            oai::ChatChoice {
                index: candidate.index.unwrap_or(index as i64),
                message: oai::ResponseMessage {
                    role: "assistant".to_string(),
                    content: (!text.is_empty()).then_some(text),
                    reasoning_content: (!reasoning.is_empty()).then_some(reasoning),
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                },
                finish_reason,
            }
        })
        .collect();

    oai::ChatCompletionResponse {
        id,
        object: "chat.completion".to_string(),
        created: helpers::now_unix(),
        model: resp.model_version.clone().unwrap_or_else(|| model.to_string()),
        choices,
        usage: resp.usage_metadata.as_ref().map(helpers::gemini_usage_to_openai),
    }
}

/// Gemini stream chunks to OpenAI chat chunks.
pub struct StreamState {
    id: String,
    created: i64,
    model: String,
    sent_role: bool,
    tool_index: i64,
    tool_counter: usize,
}

impl StreamState {
    pub fn new(model: &str) -> Self {
        Self {
            id: format!("chatcmpl-{}", helpers::now_unix()),
            created: helpers::now_unix(),
            model: model.to_string(),
            sent_role: false,
            tool_index: 0,
            tool_counter: 0,
        }
    }

    pub fn push(&mut self, chunk: gemini::GenerateContentResponse) -> Vec<oai::ChatCompletionChunk> {
        let mut out = Vec::new();
        if let Some(version) = &chunk.model_version {
            self.model = version.clone();
        }

        let candidate = chunk.candidates.first();
        let mut delta = oai::ChunkDelta::default();
        if !self.sent_role {
            delta.role = Some("assistant".to_string());
        }

        let mut tool_chunks = Vec::new();
        if let Some(content) = candidate.and_then(|c| c.content.as_ref()) {
            for part in &content.parts {
                if let Some(text) = &part.text {
                    if part.thought.unwrap_or(false) {
                        append(&mut delta.reasoning_content, text);
                    } else {
                        append(&mut delta.content, text);
                    }
                }
                if let Some(call) = &part.function_call {
                    tool_chunks.push(oai::ToolCallChunk {
                        index: self.tool_index,
                        id: Some(call.id.clone().unwrap_or_else(|| {
                            helpers::synth_tool_id(&mut self.tool_counter)
                        })),
                        kind: Some("function".to_string()),
                        function: Some(oai::FunctionCallChunk {
                            name: Some(call.name.clone()),
                            arguments: Some(helpers::value_to_args(call.args.as_ref())),
                        }),
                    });
                    self.tool_index += 1;
                }
            }
        }
        let has_tools = !tool_chunks.is_empty();
        if has_tools {
            delta.tool_calls = Some(tool_chunks);
        }

        let has_payload =
            delta.content.is_some() || delta.reasoning_content.is_some() || delta.tool_calls.is_some();
        if has_payload || !self.sent_role {
            self.sent_role = true;
            out.push(self.chunk(delta, None, None));
        }

        if let Some(reason) = candidate.and_then(|c| c.finish_reason.as_deref()) {
            let finish = if has_tools {
                "tool_calls"
            } else {
                helpers::gemini_finish_to_openai(reason)
            };
            out.push(self.chunk(
                oai::ChunkDelta::default(),
                Some(finish.to_string()),
                chunk.usage_metadata.as_ref().map(helpers::gemini_usage_to_openai),
            ));
        }

        out
    }

    pub fn finish(&mut self) -> Vec<oai::ChatCompletionChunk> {
        Vec::new()
    }

    fn chunk(
        &self,
        delta: oai::ChunkDelta,
        finish_reason: Option<String>,
        usage: Option<oai::Usage>,
    ) -> oai::ChatCompletionChunk {
        oai::ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![oai::ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage,
        }
    }
}

fn append(slot: &mut Option<String>, text: &str) {
    match slot {
        Some(existing) => existing.push_str(text),
        None => *slot = Some(text.to_string()),
    }
}
