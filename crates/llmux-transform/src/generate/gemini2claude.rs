//! Gemini inbound, Anthropic Messages upstream.

use llmux_protocol::claude;
use llmux_protocol::gemini;

use super::helpers;

const DEFAULT_MAX_TOKENS: i64 = 4096;

pub fn request(req: gemini::GenerateContentRequest, model: &str) -> claude::CreateMessageRequest {
    let mut messages = Vec::new();
    let mut tool_counter = 0usize;

    for content in &req.contents {
        let role = helpers::claude_role(content.role.as_deref().unwrap_or("user"));
        let mut blocks = Vec::new();

        for part in &content.parts {
            if let Some(text) = &part.text {
                if text.is_empty() {
                    continue;
                }
                if part.thought.unwrap_or(false) {
                    blocks.push(claude::ContentBlock::Thinking {
                        thinking: text.clone(),
                        signature: part.thought_signature.clone(),
                    });
                } else {
                    blocks.push(claude::ContentBlock::Text { text: text.clone() });
                }
            }
            if let Some(blob) = &part.inline_data {
                blocks.push(claude::ContentBlock::Image {
                    source: claude::ImageSource::Base64 {
                        media_type: blob.mime_type.clone(),
                        data: blob.data.clone(),
                    },
                });
            }
            if let Some(file) = &part.file_data {
                blocks.push(claude::ContentBlock::Image {
                    source: claude::ImageSource::Url {
                        url: file.file_uri.clone(),
                    },
                });
            }
            if let Some(call) = &part.function_call {
                blocks.push(claude::ContentBlock::ToolUse {
                    id: call
                        .id
                        .clone()
                        .unwrap_or_else(|| helpers::synth_tool_id(&mut tool_counter)),
                    name: call.name.clone(),
                    input: call.args.clone().unwrap_or(serde_json::json!({})),
                });
            }
            if let Some(resp) = &part.function_response {
                blocks.push(claude::ContentBlock::ToolResult {
                    tool_use_id: resp.id.clone().unwrap_or_else(|| resp.name.clone()),
                    content: Some(claude::ToolResultContent::Text(
                        resp.response
                            .get("output")
                            .and_then(|value| value.as_str())
                            .map(|value| value.to_string())
                            .unwrap_or_else(|| resp.response.to_string()),
                    )),
                    is_error: None,
                });
            }
        }

        if !blocks.is_empty() {
            messages.push(claude::Message {
                role: role.to_string(),
                content: claude::MessageContent::Blocks(blocks),
            });
        }
    }

    let config = req.generation_config.as_ref();
    claude::CreateMessageRequest {
        model: model.to_string(),
        max_tokens: config
            .and_then(|c| c.max_output_tokens)
            .unwrap_or(DEFAULT_MAX_TOKENS),
        messages,
        system: req.system_instruction.as_ref().map(|content| {
            claude::SystemPrompt::Text(
                content
                    .parts
                    .iter()
                    .filter_map(|part| part.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("\n"),
            )
        }),
        temperature: config.and_then(|c| c.temperature),
        top_p: config.and_then(|c| c.top_p),
        top_k: config.and_then(|c| c.top_k),
        stop_sequences: config.and_then(|c| c.stop_sequences.clone()),
        stream: None,
        tools: req.tools.as_ref().map(|tools| {
            tools
                .iter()
                .flat_map(|tool| tool.function_declarations.clone().unwrap_or_default())
                .map(|decl| claude::Tool {
                    name: decl.name,
                    description: decl.description,
                    input_schema: decl
                        .parameters
                        .unwrap_or_else(|| serde_json::json!({ "type": "object" })),
                })
                .collect()
        }),
        tool_choice: req
            .tool_config
            .as_ref()
            .and_then(|config| config.function_calling_config.as_ref())
            .and_then(|calling| {
                if let Some(names) = &calling.allowed_function_names
                    && let Some(name) = names.first()
                {
                    return Some(claude::ToolChoice::Tool { name: name.clone() });
                }
                match calling.mode.as_deref()? {
                    "ANY" => Some(claude::ToolChoice::Any),
                    "NONE" => Some(claude::ToolChoice::None),
                    _ => Some(claude::ToolChoice::Auto),
                }
            }),
        metadata: None,
        thinking: None,
    }
}

pub fn response(resp: claude::MessageResponse, _model: &str) -> gemini::GenerateContentResponse {
    let mut parts = Vec::new();
    for block in &resp.content {
        match block {
            claude::ContentBlock::Text { text } => parts.push(gemini::Part::text(text.clone())),
            claude::ContentBlock::Thinking { thinking, signature } => parts.push(gemini::Part {
                text: Some(thinking.clone()),
                thought: Some(true),
                thought_signature: signature.clone(),
                ..Default::default()
            }),
            claude::ContentBlock::ToolUse { id, name, input } => parts.push(gemini::Part {
                function_call: Some(gemini::FunctionCall {
                    id: Some(id.clone()),
                    name: name.clone(),
                    args: Some(input.clone()),
                }),
                ..Default::default()
            }),
            _ => {}
        }
    }

    gemini::GenerateContentResponse {
        candidates: vec![gemini::Candidate {
            content: Some(gemini::Content {
                role: Some("model".to_string()),
                parts,
            }),
            finish_reason: resp
                .stop_reason
                .as_deref()
                .map(|reason| helpers::claude_stop_to_gemini(reason).to_string()),
            index: Some(0),
        }],
        usage_metadata: Some(helpers::claude_usage_to_gemini(&resp.usage)),
        model_version: Some(resp.model.clone()),
        response_id: Some(resp.id.trim_start_matches("msg_").to_string()),
    }
}

/// Claude stream events to Gemini stream chunks.
///
/// Gemini emits complete `functionCall` parts, so tool input JSON accumulates
/// per block until its `content_block_stop`.
pub struct StreamState {
    model: String,
    /// Open tool blocks: (claude block index, call id, name, partial json).
    pending_tools: Vec<(u32, String, String, String)>,
    usage: Option<gemini::UsageMetadata>,
}

impl StreamState {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            pending_tools: Vec::new(),
            usage: None,
        }
    }

    pub fn push(&mut self, event: claude::StreamEvent) -> Vec<gemini::GenerateContentResponse> {
        match event {
            claude::StreamEvent::MessageStart { message } => {
                self.model = message.model;
                self.usage = Some(gemini::UsageMetadata {
                    prompt_token_count: Some(message.usage.input_tokens),
                    candidates_token_count: None,
                    thoughts_token_count: None,
                    total_token_count: None,
                });
                Vec::new()
            }
            claude::StreamEvent::ContentBlockStart {
                index,
                content_block: claude::ContentBlock::ToolUse { id, name, .. },
            } => {
                self.pending_tools.push((index, id, name, String::new()));
                Vec::new()
            }
            claude::StreamEvent::ContentBlockDelta { index, delta } => match delta {
                claude::ContentDelta::TextDelta { text } => vec![self.text_chunk(text, false)],
                claude::ContentDelta::ThinkingDelta { thinking } => {
                    vec![self.text_chunk(thinking, true)]
                }
                claude::ContentDelta::InputJsonDelta { partial_json } => {
                    if let Some(slot) = self
                        .pending_tools
                        .iter_mut()
                        .find(|(block, ..)| *block == index)
                    {
                        slot.3.push_str(&partial_json);
                    }
                    Vec::new()
                }
                claude::ContentDelta::SignatureDelta { .. } => Vec::new(),
            },
            claude::StreamEvent::ContentBlockStop { index } => {
                let Some(pos) = self
                    .pending_tools
                    .iter()
                    .position(|(block, ..)| *block == index)
                else {
                    return Vec::new();
                };
                let (_, id, name, json) = self.pending_tools.remove(pos);
                vec![self.part_chunk(gemini::Part {
                    function_call: Some(gemini::FunctionCall {
                        id: Some(id),
                        name,
                        args: Some(helpers::args_to_value(&json)),
                    }),
                    ..Default::default()
                })]
            }
            claude::StreamEvent::MessageDelta { delta, usage } => {
                if let Some(usage) = usage {
                    let slot = self.usage.get_or_insert_with(Default::default);
                    if let Some(input) = usage.input_tokens {
                        slot.prompt_token_count = Some(input);
                    }
                    slot.candidates_token_count = usage.output_tokens;
                    slot.total_token_count = Some(
                        slot.prompt_token_count.unwrap_or(0)
                            + usage.output_tokens.unwrap_or(0),
                    );
                }
                let reason = delta
                    .stop_reason
                    .as_deref()
                    .map(|reason| helpers::claude_stop_to_gemini(reason).to_string())
                    .unwrap_or_else(|| "STOP".to_string());
                vec![gemini::GenerateContentResponse {
                    candidates: vec![gemini::Candidate {
                        content: None,
                        finish_reason: Some(reason),
                        index: Some(0),
                    }],
                    usage_metadata: self.usage.clone(),
                    model_version: Some(self.model.clone()),
                    response_id: None,
                }]
            }
            _ => Vec::new(),
        }
    }

    pub fn finish(&mut self) -> Vec<gemini::GenerateContentResponse> {
        Vec::new()
    }

    fn text_chunk(&self, text: String, thought: bool) -> gemini::GenerateContentResponse {
        self.part_chunk(gemini::Part {
            text: Some(text),
            thought: thought.then_some(true),
            ..Default::default()
        })
    }

    fn part_chunk(&self, part: gemini::Part) -> gemini::GenerateContentResponse {
        gemini::GenerateContentResponse {
            candidates: vec![gemini::Candidate {
                content: Some(gemini::Content {
                    role: Some("model".to_string()),
                    parts: vec![part],
                }),
                finish_reason: None,
                index: Some(0),
            }],
            usage_metadata: None,
            model_version: Some(self.model.clone()),
            response_id: None,
        }
    }
}
