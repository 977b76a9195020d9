//! Anthropic Messages inbound, OpenAI Responses upstream.

use llmux_protocol::claude;
use llmux_protocol::openai_responses as resp;

use super::helpers;

pub fn request(req: claude::CreateMessageRequest) -> resp::CreateResponseRequest {
    let mut items = Vec::new();

    for message in req.messages {
        let role = helpers::claude_role(&message.role);
        let mut parts = Vec::new();
        for block in message.content.into_blocks() {
            match block {
                claude::ContentBlock::Text { text } => {
                    if !text.is_empty() {
                        parts.push(if role == "assistant" {
                            resp::InputPart::OutputText { text }
                        } else {
                            resp::InputPart::InputText { text }
                        });
                    }
                }
                claude::ContentBlock::Image { source } => {
                    let image_url = match source {
                        claude::ImageSource::Base64 { media_type, data } => {
                            helpers::to_data_url(&media_type, &data)
                        }
                        claude::ImageSource::Url { url } => url,
                    };
                    parts.push(resp::InputPart::InputImage { image_url });
                }
                claude::ContentBlock::Thinking { .. } => {}
                claude::ContentBlock::ToolUse { id, name, input } => {
                    items.push(resp::InputItem::FunctionCall(resp::FunctionCallItem {
                        kind: "function_call".to_string(),
                        id: None,
                        call_id: id,
                        name,
                        arguments: serde_json::to_string(&input)
                            .unwrap_or_else(|_| "{}".to_string()),
                    }));
                }
                claude::ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } => {
                    items.push(resp::InputItem::FunctionCallOutput(
                        resp::FunctionCallOutputItem {
                            kind: "function_call_output".to_string(),
                            call_id: tool_use_id,
                            output: content.map(|c| c.flat_text()).unwrap_or_default(),
                        },
                    ));
                }
            }
        }
        if !parts.is_empty() {
            items.push(resp::InputItem::Message(resp::InputMessage {
                kind: Some("message".to_string()),
                role: role.to_string(),
                content: resp::InputContent::Parts(parts),
            }));
        }
    }

    resp::CreateResponseRequest {
        model: req.model,
        input: Some(resp::ResponseInput::Items(items)),
        instructions: req.system.as_ref().map(|system| system.flat_text()),
        temperature: req.temperature,
        top_p: req.top_p,
        max_output_tokens: Some(req.max_tokens),
        stream: req.stream,
        tools: req.tools.map(|tools| {
            tools
                .into_iter()
                .map(|tool| resp::ResponseTool {
                    kind: "function".to_string(),
                    name: Some(tool.name),
                    description: tool.description,
                    parameters: Some(tool.input_schema),
                })
                .collect()
        }),
        tool_choice: None,
        reasoning: req.thinking.as_ref().map(|_| resp::ReasoningOptions {
            effort: Some("medium".to_string()),
            summary: Some("auto".to_string()),
        }),
        metadata: None,
    }
}

pub fn response(upstream: resp::Response, _model: &str) -> claude::MessageResponse {
    let mut content = Vec::new();
    let mut has_tool_use = false;

    for item in &upstream.output {
        match item {
            resp::OutputItem::Reasoning(reasoning) => {
                for summary in &reasoning.summary {
                    let resp::ReasoningSummary::SummaryText { text } = summary;
                    content.push(claude::ContentBlock::Thinking {
                        thinking: text.clone(),
                        signature: None,
                    });
                }
            }
            resp::OutputItem::Message(message) => {
                for part in &message.content {
                    if let resp::OutputContent::OutputText { text } = part
                        && !text.is_empty()
                    {
                        content.push(claude::ContentBlock::Text { text: text.clone() });
                    }
                }
            }
            resp::OutputItem::FunctionCall(call) => {
                has_tool_use = true;
                content.push(claude::ContentBlock::ToolUse {
                    id: call.call_id.clone(),
                    name: call.name.clone(),
                    input: helpers::args_to_value(&call.arguments),
                });
            }
        }
    }

    let stop_reason = if has_tool_use {
        "tool_use"
    } else if upstream.status == "incomplete" {
        "max_tokens"
    } else {
        "end_turn"
    };

    claude::MessageResponse {
        id: format!("msg_{}", upstream.id.trim_start_matches("resp_")),
        kind: "message".to_string(),
        role: "assistant".to_string(),
        model: upstream.model.clone(),
        content,
        stop_reason: Some(stop_reason.to_string()),
        stop_sequence: None,
        usage: upstream
            .usage
            .as_ref()
            .map(helpers::responses_usage_to_claude)
            .unwrap_or_default(),
    }
}

/// Responses stream events to Claude stream events.
pub struct StreamState {
    model: String,
    started: bool,
    open: Option<Open>,
    next_index: u32,
    saw_tool_use: bool,
    usage: claude::StreamUsage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Open {
    Text,
    /// (responses output_index, claude block index)
    Tool(i64, u32),
}

impl StreamState {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            started: false,
            open: None,
            next_index: 0,
            saw_tool_use: false,
            usage: claude::StreamUsage::default(),
        }
    }

    pub fn push(&mut self, event: resp::ResponseStreamEvent) -> Vec<claude::StreamEvent> {
        let mut out = Vec::new();
        match event {
            resp::ResponseStreamEvent::Created { response, .. } => {
                self.started = true;
                self.model = response.model.clone();
                out.push(claude::StreamEvent::MessageStart {
                    message: claude::MessageResponse {
                        id: format!("msg_{}", response.id.trim_start_matches("resp_")),
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
            resp::ResponseStreamEvent::OutputItemAdded { output_index, item, .. } => {
                if let resp::OutputItem::FunctionCall(call) = item {
                    self.close_open(&mut out);
                    self.saw_tool_use = true;
                    let index = self.next_index;
                    self.next_index += 1;
                    self.open = Some(Open::Tool(output_index, index));
                    out.push(claude::StreamEvent::ContentBlockStart {
                        index,
                        content_block: claude::ContentBlock::ToolUse {
                            id: call.call_id,
                            name: call.name,
                            input: serde_json::json!({}),
                        },
                    });
                    if !call.arguments.is_empty() {
                        out.push(claude::StreamEvent::ContentBlockDelta {
                            index,
                            delta: claude::ContentDelta::InputJsonDelta {
                                partial_json: call.arguments,
                            },
                        });
                    }
                }
            }
            resp::ResponseStreamEvent::OutputTextDelta { delta, .. } => {
                if delta.is_empty() {
                    return out;
                }
                if self.open != Some(Open::Text) {
                    self.close_open(&mut out);
                    let index = self.next_index;
                    self.next_index += 1;
                    self.open = Some(Open::Text);
                    out.push(claude::StreamEvent::ContentBlockStart {
                        index,
                        content_block: claude::ContentBlock::Text {
                            text: String::new(),
                        },
                    });
                }
                out.push(claude::StreamEvent::ContentBlockDelta {
                    index: self.next_index.saturating_sub(1),
                    delta: claude::ContentDelta::TextDelta { text: delta },
                });
            }
            resp::ResponseStreamEvent::FunctionCallArgumentsDelta {
                output_index,
                delta,
                ..
            } => {
                if let Some(Open::Tool(open_index, block)) = &self.open
                    && *open_index == output_index
                    && !delta.is_empty()
                {
                    out.push(claude::StreamEvent::ContentBlockDelta {
                        index: *block,
                        delta: claude::ContentDelta::InputJsonDelta {
                            partial_json: delta,
                        },
                    });
                }
            }
            resp::ResponseStreamEvent::OutputItemDone { output_index, .. } => {
                if let Some(Open::Tool(open_index, block)) = &self.open
                    && *open_index == output_index
                {
                    let block = *block;
                    self.open = None;
                    out.push(claude::StreamEvent::ContentBlockStop { index: block });
                }
            }
            resp::ResponseStreamEvent::Completed { response, .. }
            | resp::ResponseStreamEvent::Failed { response, .. } => {
                self.close_open(&mut out);
                if let Some(usage) = &response.usage {
                    self.usage = claude::StreamUsage {
                        input_tokens: Some(usage.input_tokens),
                        output_tokens: Some(usage.output_tokens),
                    };
                }
                let stop_reason = if self.saw_tool_use {
                    "tool_use"
                } else if response.status == "incomplete" {
                    "max_tokens"
                } else {
                    "end_turn"
                };
                out.push(claude::StreamEvent::MessageDelta {
                    delta: claude::MessageDelta {
                        stop_reason: Some(stop_reason.to_string()),
                        stop_sequence: None,
                    },
                    usage: Some(self.usage.clone()),
                });
                out.push(claude::StreamEvent::MessageStop);
            }
            _ => {}
        }
        out
    }

    pub fn finish(&mut self) -> Vec<claude::StreamEvent> {
        Vec::new()
    }

    fn close_open(&mut self, out: &mut Vec<claude::StreamEvent>) {
        if self.open.take().is_some() {
            out.push(claude::StreamEvent::ContentBlockStop {
                index: self.next_index.saturating_sub(1),
            });
        }
    }
}
