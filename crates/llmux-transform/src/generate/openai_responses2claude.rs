//! OpenAI Responses inbound, Anthropic Messages upstream.

use llmux_protocol::claude;
use llmux_protocol::openai_responses as resp;

use super::helpers;

const DEFAULT_MAX_TOKENS: i64 = 4096;

pub fn request(req: resp::CreateResponseRequest) -> claude::CreateMessageRequest {
    let mut messages: Vec<claude::Message> = Vec::new();

    match req.input {
        Some(resp::ResponseInput::Text(text)) => {
            messages.push(claude::Message {
                role: "user".to_string(),
                content: claude::MessageContent::Text(text),
            });
        }
        Some(resp::ResponseInput::Items(items)) => {
            for item in items {
                match item {
                    resp::InputItem::Message(message) => {
                        let role = helpers::claude_role(&message.role);
                        let blocks = input_blocks(message.content);
                        if !blocks.is_empty() {
                            messages.push(claude::Message {
                                role: role.to_string(),
                                content: claude::MessageContent::Blocks(blocks),
                            });
                        }
                    }
                    resp::InputItem::FunctionCall(call) => {
                        messages.push(claude::Message {
                            role: "assistant".to_string(),
                            content: claude::MessageContent::Blocks(vec![
                                claude::ContentBlock::ToolUse {
                                    id: call.call_id,
                                    name: call.name,
                                    input: helpers::args_to_value(&call.arguments),
                                },
                            ]),
                        });
                    }
                    resp::InputItem::FunctionCallOutput(output) => {
                        messages.push(claude::Message {
                            role: "user".to_string(),
                            content: claude::MessageContent::Blocks(vec![
                                claude::ContentBlock::ToolResult {
                                    tool_use_id: output.call_id,
                                    content: Some(claude::ToolResultContent::Text(output.output)),
                                    is_error: None,
                                },
                            ]),
                        });
                    }
                }
            }
        }
        None => {}
    }

    claude::CreateMessageRequest {
        model: req.model,
        max_tokens: req.max_output_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        messages,
        system: req
            .instructions
            .filter(|text| !text.is_empty())
            .map(claude::SystemPrompt::Text),
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: None,
        stop_sequences: None,
        stream: req.stream,
        tools: req.tools.map(|tools| {
            tools
                .into_iter()
                .filter(|tool| tool.kind == "function")
                .map(|tool| claude::Tool {
                    name: tool.name.unwrap_or_default(),
                    description: tool.description,
                    input_schema: tool
                        .parameters
                        .unwrap_or_else(|| serde_json::json!({ "type": "object" })),
                })
                .collect()
        }),
        tool_choice: None,
        metadata: None,
        thinking: None,
    }
}

fn input_blocks(content: resp::InputContent) -> Vec<claude::ContentBlock> {
    match content {
        resp::InputContent::Text(text) => {
            if text.is_empty() {
                Vec::new()
            } else {
                vec![claude::ContentBlock::Text { text }]
            }
        }
        resp::InputContent::Parts(parts) => parts
            .into_iter()
            .filter_map(|part| match part {
                resp::InputPart::InputText { text } | resp::InputPart::OutputText { text } => {
                    (!text.is_empty()).then_some(claude::ContentBlock::Text { text })
                }
                resp::InputPart::InputImage { image_url } => Some(claude::ContentBlock::Image {
                    source: match helpers::parse_data_url(&image_url) {
                        Some((mime, data)) => claude::ImageSource::Base64 {
                            media_type: mime,
                            data,
                        },
                        None => claude::ImageSource::Url { url: image_url },
                    },
                }),
                resp::InputPart::InputFile { file_url } => Some(claude::ContentBlock::Image {
                    source: claude::ImageSource::Url { url: file_url },
                }),
            })
            .collect(),
    }
}

pub fn response(upstream: claude::MessageResponse, _model: &str) -> resp::Response {
    let mut output = Vec::new();
    for block in &upstream.content {
        match block {
            claude::ContentBlock::Text { text } => {
                output.push(resp::OutputItem::Message(resp::OutputMessage {
                    id: upstream.id.clone(),
                    role: "assistant".to_string(),
                    status: "completed".to_string(),
                    content: vec![resp::OutputContent::OutputText { text: text.clone() }],
                }));
            }
            claude::ContentBlock::Thinking { thinking, .. } => {
                output.push(resp::OutputItem::Reasoning(resp::OutputReasoning {
                    id: format!("rs_{}", upstream.id.trim_start_matches("msg_")),
                    summary: vec![resp::ReasoningSummary::SummaryText {
                        text: thinking.clone(),
                    }],
                }));
            }
            claude::ContentBlock::ToolUse { id, name, input } => {
                output.push(resp::OutputItem::FunctionCall(resp::OutputFunctionCall {
                    id: Some(format!("fc_{id}")),
                    call_id: id.clone(),
                    name: name.clone(),
                    arguments: serde_json::to_string(input).unwrap_or_else(|_| "{}".to_string()),
                    status: Some("completed".to_string()),
                }));
            }
            _ => {}
        }
    }

    resp::Response {
        id: format!("resp_{}", upstream.id.trim_start_matches("msg_")),
        object: "response".to_string(),
        created_at: helpers::now_unix(),
        status: if upstream.stop_reason.as_deref() == Some("max_tokens") {
            "incomplete".to_string()
        } else {
            "completed".to_string()
        },
        model: upstream.model.clone(),
        output,
        usage: Some(helpers::claude_usage_to_responses(&upstream.usage)),
    }
}

/// Claude stream events to Responses stream events.
pub struct StreamState {
    id: String,
    model: String,
    created_at: i64,
    seq: i64,
    output_index: i64,
    /// Claude block index -> (output_index, item id, name, args) of an open
    /// tool-use block.
    open_tool: Option<(u32, i64, String, String, String)>,
    message_open: bool,
    message_id: String,
    text: String,
    usage: Option<resp::ResponseUsage>,
}

impl StreamState {
    pub fn new(model: &str) -> Self {
        let now = helpers::now_unix();
        Self {
            id: format!("resp_{now}"),
            model: model.to_string(),
            created_at: now,
            seq: 0,
            output_index: 0,
            open_tool: None,
            message_open: false,
            message_id: format!("msg_{now}"),
            text: String::new(),
            usage: None,
        }
    }

    pub fn push(&mut self, event: claude::StreamEvent) -> Vec<resp::ResponseStreamEvent> {
        let mut out = Vec::new();
        match event {
            claude::StreamEvent::MessageStart { message } => {
                self.id = format!("resp_{}", message.id.trim_start_matches("msg_"));
                self.message_id = message.id;
                self.model = message.model;
                self.usage = Some(resp::ResponseUsage {
                    input_tokens: message.usage.input_tokens,
                    output_tokens: 0,
                    total_tokens: message.usage.input_tokens,
                });
                out.push(resp::ResponseStreamEvent::Created {
                    response: self.snapshot("in_progress"),
                    sequence_number: self.next_seq(),
                });
            }
            claude::StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                if let claude::ContentBlock::ToolUse { id, name, .. } = content_block {
                    self.close_message(&mut out);
                    let output_index = self.output_index;
                    self.output_index += 1;
                    let item_id = format!("fc_{id}");
                    out.push(resp::ResponseStreamEvent::OutputItemAdded {
                        output_index,
                        item: resp::OutputItem::FunctionCall(resp::OutputFunctionCall {
                            id: Some(item_id.clone()),
                            call_id: id.clone(),
                            name: name.clone(),
                            arguments: String::new(),
                            status: Some("in_progress".to_string()),
                        }),
                        sequence_number: self.next_seq(),
                    });
                    self.open_tool = Some((index, output_index, item_id, name, String::new()));
                }
            }
            claude::StreamEvent::ContentBlockDelta { index, delta } => match delta {
                claude::ContentDelta::TextDelta { text } => {
                    if !self.message_open {
                        self.message_open = true;
                        out.push(resp::ResponseStreamEvent::OutputItemAdded {
                            output_index: self.output_index,
                            item: resp::OutputItem::Message(resp::OutputMessage {
                                id: self.message_id.clone(),
                                role: "assistant".to_string(),
                                status: "in_progress".to_string(),
                                content: Vec::new(),
                            }),
                            sequence_number: self.next_seq(),
                        });
                    }
                    self.text.push_str(&text);
                    out.push(resp::ResponseStreamEvent::OutputTextDelta {
                        item_id: self.message_id.clone(),
                        output_index: self.output_index,
                        content_index: 0,
                        delta: text,
                        sequence_number: self.next_seq(),
                    });
                }
                claude::ContentDelta::InputJsonDelta { partial_json } => {
                    let target = match &mut self.open_tool {
                        Some((block, output_index, item_id, _, args)) if *block == index => {
                            args.push_str(&partial_json);
                            Some((*output_index, item_id.clone()))
                        }
                        _ => None,
                    };
                    if let Some((output_index, item_id)) = target {
                        let sequence_number = self.next_seq();
                        out.push(resp::ResponseStreamEvent::FunctionCallArgumentsDelta {
                            item_id,
                            output_index,
                            delta: partial_json,
                            sequence_number,
                        });
                    }
                }
                _ => {}
            },
            claude::StreamEvent::ContentBlockStop { index } => {
                if let Some((_, output_index, item_id, name, args)) =
                    self.open_tool.take_if(|(block, ..)| *block == index)
                {
                    out.push(resp::ResponseStreamEvent::FunctionCallArgumentsDone {
                        item_id: item_id.clone(),
                        output_index,
                        name: name.clone(),
                        arguments: args.clone(),
                        sequence_number: self.next_seq(),
                    });
                    out.push(resp::ResponseStreamEvent::OutputItemDone {
                        output_index,
                        item: resp::OutputItem::FunctionCall(resp::OutputFunctionCall {
                            id: Some(item_id.clone()),
                            call_id: item_id.trim_start_matches("fc_").to_string(),
                            name,
                            arguments: args,
                            status: Some("completed".to_string()),
                        }),
                        sequence_number: self.next_seq(),
                    });
                }
            }
            claude::StreamEvent::MessageDelta { delta, usage } => {
                if let Some(usage) = usage {
                    let slot = self.usage.get_or_insert_with(Default::default);
                    if let Some(input) = usage.input_tokens {
                        slot.input_tokens = input;
                    }
                    if let Some(output) = usage.output_tokens {
                        slot.output_tokens = output;
                    }
                    slot.total_tokens = slot.input_tokens + slot.output_tokens;
                }
                self.close_message(&mut out);
                let status = if delta.stop_reason.as_deref() == Some("max_tokens") {
                    "incomplete"
                } else {
                    "completed"
                };
                out.push(resp::ResponseStreamEvent::Completed {
                    response: self.snapshot(status),
                    sequence_number: self.next_seq(),
                });
            }
            _ => {}
        }
        out
    }

    pub fn finish(&mut self) -> Vec<resp::ResponseStreamEvent> {
        Vec::new()
    }

    fn close_message(&mut self, out: &mut Vec<resp::ResponseStreamEvent>) {
        if !self.message_open {
            return;
        }
        self.message_open = false;
        out.push(resp::ResponseStreamEvent::OutputTextDone {
            item_id: self.message_id.clone(),
            output_index: self.output_index,
            content_index: 0,
            text: self.text.clone(),
            sequence_number: self.next_seq(),
        });
        out.push(resp::ResponseStreamEvent::OutputItemDone {
            output_index: self.output_index,
            item: resp::OutputItem::Message(resp::OutputMessage {
                id: self.message_id.clone(),
                role: "assistant".to_string(),
                status: "completed".to_string(),
                content: vec![resp::OutputContent::OutputText {
                    text: self.text.clone(),
                }],
            }),
            sequence_number: self.next_seq(),
        });
        self.output_index += 1;
    }

    fn snapshot(&self, status: &str) -> resp::Response {
        resp::Response {
            id: self.id.clone(),
            object: "response".to_string(),
            created_at: self.created_at,
            status: status.to_string(),
            model: self.model.clone(),
            output: Vec::new(),
            usage: self.usage.clone(),
        }
    }

    fn next_seq(&mut self) -> i64 {
        let value = self.seq;
        self.seq += 1;
        value
    }
}
