//! Anthropic Messages inbound, Gemini upstream.

use llmux_protocol::claude;
use llmux_protocol::gemini;

use super::helpers;

pub fn request(req: claude::CreateMessageRequest) -> gemini::GenerateContentRequest {
    let mut contents = Vec::new();

    for message in req.messages {
        let role = helpers::gemini_role(&message.role);
        let mut parts = Vec::new();

        for block in message.content.into_blocks() {
            match block {
                claude::ContentBlock::Text { text } => {
                    if !text.is_empty() {
                        parts.push(gemini::Part::text(text));
                    }
                }
                claude::ContentBlock::Image { source } => match source {
                    claude::ImageSource::Base64 { media_type, data } => {
                        parts.push(gemini::Part {
                            inline_data: Some(gemini::Blob {
                                mime_type: media_type,
                                data,
                            }),
                            ..Default::default()
                        });
                    }
                    claude::ImageSource::Url { url } => {
                        parts.push(gemini::Part {
                            file_data: Some(gemini::FileData {
                                mime_type: None,
                                file_uri: url,
                            }),
                            ..Default::default()
                        });
                    }
                },
                claude::ContentBlock::Thinking { thinking, .. } => {
                    if !thinking.is_empty() {
                        parts.push(gemini::Part {
                            text: Some(thinking),
                            thought: Some(true),
                            ..Default::default()
                        });
                    }
                }
                claude::ContentBlock::ToolUse { id, name, input } => {
                    parts.push(gemini::Part {
                        function_call: Some(gemini::FunctionCall {
                            id: Some(id),
                            name,
                            args: Some(input),
                        }),
                        ..Default::default()
                    });
                }
                claude::ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } => {
                    let output = content.map(|c| c.flat_text()).unwrap_or_default();
                    parts.push(gemini::Part {
                        function_response: Some(gemini::FunctionResponse {
                            id: Some(tool_use_id.clone()),
                            name: tool_use_id,
                            response: serde_json::json!({ "output": output }),
                        }),
                        ..Default::default()
                    });
                }
            }
        }

        if !parts.is_empty() {
            contents.push(gemini::Content {
                role: Some(role.to_string()),
                parts,
            });
        }
    }

    let system_instruction = req.system.as_ref().map(|system| gemini::Content {
        role: None,
        parts: vec![gemini::Part::text(system.flat_text())],
    });

    let tools = req.tools.filter(|tools| !tools.is_empty()).map(|tools| {
        vec![gemini::Tool {
            function_declarations: Some(
                tools
                    .into_iter()
                    .map(|tool| gemini::FunctionDeclaration {
                        name: tool.name,
                        description: tool.description,
                        parameters: Some(tool.input_schema),
                    })
                    .collect(),
            ),
            google_search: None,
        }]
    });

    let tool_config = req.tool_choice.map(|choice| gemini::ToolConfig {
        function_calling_config: Some(match choice {
            claude::ToolChoice::Auto => gemini::FunctionCallingConfig {
                mode: Some("AUTO".to_string()),
                allowed_function_names: None,
            },
            claude::ToolChoice::Any => gemini::FunctionCallingConfig {
                mode: Some("ANY".to_string()),
                allowed_function_names: None,
            },
            claude::ToolChoice::None => gemini::FunctionCallingConfig {
                mode: Some("NONE".to_string()),
                allowed_function_names: None,
            },
            claude::ToolChoice::Tool { name } => gemini::FunctionCallingConfig {
                mode: Some("ANY".to_string()),
                allowed_function_names: Some(vec![name]),
            },
        }),
    });

    let thinking_config = req.thinking.as_ref().map(|thinking| gemini::ThinkingConfig {
        include_thoughts: Some(thinking.kind == "enabled"),
        thinking_budget: thinking.budget_tokens,
    });

    gemini::GenerateContentRequest {
        contents,
        system_instruction,
        tools,
        tool_config,
        generation_config: Some(gemini::GenerationConfig {
            temperature: req.temperature,
            top_p: req.top_p,
            top_k: req.top_k,
            max_output_tokens: Some(req.max_tokens),
            stop_sequences: req.stop_sequences,
            thinking_config,
        }),
        safety_settings: None,
    }
}

pub fn response(resp: gemini::GenerateContentResponse, model: &str) -> claude::MessageResponse {
    let mut content = Vec::new();
    let mut stop_reason = None;
    let mut has_tool_use = false;
    let mut tool_counter = 0usize;

    if let Some(candidate) = resp.candidates.first() {
        if let Some(inner) = &candidate.content {
            for part in &inner.parts {
                if let Some(text) = &part.text {
                    if part.thought.unwrap_or(false) {
                        content.push(claude::ContentBlock::Thinking {
                            thinking: text.clone(),
                            signature: part.thought_signature.clone(),
                        });
                    } else {
                        content.push(claude::ContentBlock::Text { text: text.clone() });
                    }
                }
                if let Some(call) = &part.function_call {
                    has_tool_use = true;
                    content.push(claude::ContentBlock::ToolUse {
                        id: call
                            .id
                            .clone()
                            .unwrap_or_else(|| helpers::synth_tool_id(&mut tool_counter)),
                        name: call.name.clone(),
                        input: call.args.clone().unwrap_or(serde_json::json!({})),
                    });
                }
            }
        }
        stop_reason = candidate.finish_reason.as_deref().map(|reason| {
            if has_tool_use {
                "tool_use".to_string()
            } else {
                helpers::gemini_finish_to_claude(reason).to_string()
            }
        });
    }

    claude::MessageResponse {
        id: format!(
            "msg_{}",
            resp.response_id
                .clone()
                .unwrap_or_else(|| helpers::now_unix().to_string())
        ),
        kind: "message".to_string(),
        role: "assistant".to_string(),
        model: resp.model_version.clone().unwrap_or_else(|| model.to_string()),
        content,
        stop_reason,
        stop_sequence: None,
        usage: resp
            .usage_metadata
            .as_ref()
            .map(helpers::gemini_usage_to_claude)
            .unwrap_or_default(),
    }
}

/// Gemini stream chunks to Claude stream events.
pub struct StreamState {
    model: String,
    started: bool,
    stopped: bool,
    open: Option<Open>,
    next_index: u32,
    saw_tool_use: bool,
    tool_counter: usize,
    usage: claude::StreamUsage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Open {
    Text,
    Thinking,
}

impl StreamState {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            started: false,
            stopped: false,
            open: None,
            next_index: 0,
            saw_tool_use: false,
            tool_counter: 0,
            usage: claude::StreamUsage::default(),
        }
    }

    pub fn push(&mut self, chunk: gemini::GenerateContentResponse) -> Vec<claude::StreamEvent> {
        let mut out = Vec::new();
        if let Some(version) = &chunk.model_version {
            self.model = version.clone();
        }
        if let Some(usage) = &chunk.usage_metadata {
            self.usage = claude::StreamUsage {
                input_tokens: usage.prompt_token_count,
                output_tokens: Some(
                    usage.candidates_token_count.unwrap_or(0)
                        + usage.thoughts_token_count.unwrap_or(0),
                ),
            };
        }
        self.ensure_started(&chunk, &mut out);

        let candidate = chunk.candidates.first();
        if let Some(content) = candidate.and_then(|c| c.content.as_ref()) {
            for part in &content.parts {
                if let Some(text) = &part.text {
                    if text.is_empty() {
                        continue;
                    }
                    if part.thought.unwrap_or(false) {
                        self.open(Open::Thinking, &mut out);
                        out.push(claude::StreamEvent::ContentBlockDelta {
                            index: self.current_index(),
                            delta: claude::ContentDelta::ThinkingDelta {
                                thinking: text.clone(),
                            },
                        });
                    } else {
                        self.open(Open::Text, &mut out);
                        out.push(claude::StreamEvent::ContentBlockDelta {
                            index: self.current_index(),
                            delta: claude::ContentDelta::TextDelta { text: text.clone() },
                        });
                    }
                }
                if let Some(call) = &part.function_call {
                    self.close_open(&mut out);
                    self.saw_tool_use = true;
                    let index = self.next_index;
                    self.next_index += 1;
                    out.push(claude::StreamEvent::ContentBlockStart {
                        index,
                        content_block: claude::ContentBlock::ToolUse {
                            id: call
                                .id
                                .clone()
                                .unwrap_or_else(|| helpers::synth_tool_id(&mut self.tool_counter)),
                            name: call.name.clone(),
                            input: serde_json::json!({}),
                        },
                    });
                    out.push(claude::StreamEvent::ContentBlockDelta {
                        index,
                        delta: claude::ContentDelta::InputJsonDelta {
                            partial_json: helpers::value_to_args(call.args.as_ref()),
                        },
                    });
                    out.push(claude::StreamEvent::ContentBlockStop { index });
                }
            }
        }

        if let Some(reason) = candidate.and_then(|c| c.finish_reason.as_deref()) {
            self.close_open(&mut out);
            let stop_reason = if self.saw_tool_use {
                "tool_use".to_string()
            } else {
                helpers::gemini_finish_to_claude(reason).to_string()
            };
            out.push(claude::StreamEvent::MessageDelta {
                delta: claude::MessageDelta {
                    stop_reason: Some(stop_reason),
                    stop_sequence: None,
                },
                usage: Some(self.usage.clone()),
            });
            out.push(claude::StreamEvent::MessageStop);
            self.stopped = true;
        }

        out
    }

    /// Some upstreams end the stream without a finish reason; close the
    /// message so the client still sees a well-formed event sequence.
    pub fn finish(&mut self) -> Vec<claude::StreamEvent> {
        if !self.started || self.stopped {
            return Vec::new();
        }
        self.stopped = true;
        let mut out = Vec::new();
        self.close_open(&mut out);
        out.push(claude::StreamEvent::MessageDelta {
            delta: claude::MessageDelta {
                stop_reason: Some("end_turn".to_string()),
                stop_sequence: None,
            },
            usage: Some(self.usage.clone()),
        });
        out.push(claude::StreamEvent::MessageStop);
        out
    }

    fn ensure_started(
        &mut self,
        chunk: &gemini::GenerateContentResponse,
        out: &mut Vec<claude::StreamEvent>,
    ) {
        if self.started {
            return;
        }
        self.started = true;
        out.push(claude::StreamEvent::MessageStart {
            message: claude::MessageResponse {
                id: format!(
                    "msg_{}",
                    chunk
                        .response_id
                        .clone()
                        .unwrap_or_else(|| helpers::now_unix().to_string())
                ),
                kind: "message".to_string(),
                role: "assistant".to_string(),
                model: self.model.clone(),
                content: Vec::new(),
                stop_reason: None,
                stop_sequence: None,
                usage: claude::Usage::default(),
            },
        });
    }

    fn current_index(&self) -> u32 {
        self.next_index.saturating_sub(1)
    }

    fn open(&mut self, kind: Open, out: &mut Vec<claude::StreamEvent>) {
        if self.open == Some(kind) {
            return;
        }
        self.close_open(out);
        let index = self.next_index;
        self.next_index += 1;
        self.open = Some(kind);
        let content_block = match kind {
            Open::Text => claude::ContentBlock::Text {
                text: String::new(),
            },
            Open::Thinking => claude::ContentBlock::Thinking {
                thinking: String::new(),
                signature: None,
            },
        };
        out.push(claude::StreamEvent::ContentBlockStart {
            index,
            content_block,
        });
    }

    fn close_open(&mut self, out: &mut Vec<claude::StreamEvent>) {
        if self.open.take().is_some() {
            out.push(claude::StreamEvent::ContentBlockStop {
                index: self.current_index(),
            });
        }
    }
}
