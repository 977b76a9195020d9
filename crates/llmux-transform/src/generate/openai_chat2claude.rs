//! OpenAI Chat Completions inbound, Anthropic Messages upstream.

use llmux_protocol::claude;
use llmux_protocol::openai_chat as oai;

use super::helpers;

const DEFAULT_MAX_TOKENS: i64 = 4096;

pub fn request(req: oai::ChatCompletionRequest) -> claude::CreateMessageRequest {
    let mut system_texts = Vec::new();
    let mut messages: Vec<claude::Message> = Vec::new();

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
                let mut blocks = Vec::new();
                if let Some(content) = message.content {
                    blocks.extend(content_to_blocks(content));
                }
                for call in message.tool_calls.unwrap_or_default() {
                    blocks.push(claude::ContentBlock::ToolUse {
                        id: call.id,
                        name: call.function.name,
                        input: helpers::args_to_value(&call.function.arguments),
                    });
                }
                push_message(&mut messages, "assistant", blocks);
            }
            "tool" => {
                let block = claude::ContentBlock::ToolResult {
                    tool_use_id: message.tool_call_id.unwrap_or_default(),
                    content: message
                        .content
                        .map(|content| claude::ToolResultContent::Text(content.flat_text())),
                    is_error: None,
                };
                push_message(&mut messages, "user", vec![block]);
            }
            _ => {
                let blocks = message.content.map(content_to_blocks).unwrap_or_default();
                push_message(&mut messages, "user", blocks);
            }
        }
    }

    let tools = req.tools.map(|tools| {
        tools
            .into_iter()
            .map(|tool| claude::Tool {
                name: tool.function.name,
                description: tool.function.description,
                input_schema: tool
                    .function
                    .parameters
                    .unwrap_or_else(|| serde_json::json!({ "type": "object" })),
            })
            .collect::<Vec<_>>()
    });

    claude::CreateMessageRequest {
        model: req.model,
        max_tokens: req
            .max_completion_tokens
            .or(req.max_tokens)
            .unwrap_or(DEFAULT_MAX_TOKENS),
        messages,
        system: (!system_texts.is_empty())
            .then(|| claude::SystemPrompt::Text(system_texts.join("\n"))),
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: None,
        stop_sequences: match req.stop {
            Some(oai::StopSequences::Single(value)) => Some(vec![value]),
            Some(oai::StopSequences::Many(values)) => Some(values),
            None => None,
        },
        stream: req.stream,
        tools: tools.filter(|tools| !tools.is_empty()),
        tool_choice: req.tool_choice.map(tool_choice),
        metadata: req.user.map(|user| claude::Metadata { user_id: Some(user) }),
        thinking: None,
    }
}

/// Anthropic requires alternating turns; consecutive same-role messages merge.
fn push_message(messages: &mut Vec<claude::Message>, role: &str, blocks: Vec<claude::ContentBlock>) {
    if blocks.is_empty() {
        return;
    }
    if let Some(last) = messages.last_mut()
        && last.role == role
    {
        let mut existing = std::mem::replace(
            &mut last.content,
            claude::MessageContent::Blocks(Vec::new()),
        )
        .into_blocks();
        existing.extend(blocks);
        last.content = claude::MessageContent::Blocks(existing);
        return;
    }
    messages.push(claude::Message {
        role: role.to_string(),
        content: claude::MessageContent::Blocks(blocks),
    });
}

fn content_to_blocks(content: oai::MessageContent) -> Vec<claude::ContentBlock> {
    match content {
        oai::MessageContent::Text(text) => {
            if text.is_empty() {
                Vec::new()
            } else {
                vec![claude::ContentBlock::Text { text }]
            }
        }
        oai::MessageContent::Parts(parts) => parts
            .into_iter()
            .filter_map(|part| match part {
                oai::ContentPart::Text { text } => {
                    (!text.is_empty()).then_some(claude::ContentBlock::Text { text })
                }
                oai::ContentPart::ImageUrl { image_url } => {
                    Some(claude::ContentBlock::Image {
                        source: match helpers::parse_data_url(&image_url.url) {
                            Some((mime, data)) => claude::ImageSource::Base64 {
                                media_type: mime,
                                data,
                            },
                            None => claude::ImageSource::Url { url: image_url.url },
                        },
                    })
                }
                oai::ContentPart::File { file } => file.file_data.map(|data| {
                    claude::ContentBlock::Image {
                        source: claude::ImageSource::Base64 {
                            media_type: "application/octet-stream".to_string(),
                            data,
                        },
                    }
                }),
            })
            .collect(),
    }
}

fn tool_choice(choice: oai::ToolChoice) -> claude::ToolChoice {
    match choice {
        oai::ToolChoice::Mode(mode) => match mode.as_str() {
            "none" => claude::ToolChoice::None,
            "required" => claude::ToolChoice::Any,
            _ => claude::ToolChoice::Auto,
        },
        oai::ToolChoice::Named { function, .. } => claude::ToolChoice::Tool {
            name: function.name,
        },
    }
}

pub fn response(resp: claude::MessageResponse, _model: &str) -> oai::ChatCompletionResponse {
    let mut text = String::new();
    let mut reasoning = String::new();
    let mut tool_calls = Vec::new();

    for block in &resp.content {
        match block {
            claude::ContentBlock::Text { text: t } => text.push_str(t),
            claude::ContentBlock::Thinking { thinking, .. } => reasoning.push_str(thinking),
            claude::ContentBlock::ToolUse { id, name, input } => tool_calls.push(oai::ToolCall {
                id: id.clone(),
                kind: "function".to_string(),
                function: oai::FunctionCall {
                    name: name.clone(),
                    arguments: serde_json::to_string(input).unwrap_or_else(|_| "{}".to_string()),
                },
            }),
            _ => {}
        }
    }

    oai::ChatCompletionResponse {
        id: format!("chatcmpl-{}", resp.id.trim_start_matches("msg_")),
        object: "chat.completion".to_string(),
        created: helpers::now_unix(),
        model: resp.model.clone(),
        choices: vec![oai::ChatChoice {
            index: 0,
            message: oai::ResponseMessage {
                role: "assistant".to_string(),
                content: (!text.is_empty()).then_some(text),
                reasoning_content: (!reasoning.is_empty()).then_some(reasoning),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            },
            finish_reason: resp
                .stop_reason
                .as_deref()
                .map(|reason| helpers::claude_stop_to_openai(reason).to_string()),
        }],
        usage: Some(helpers::claude_usage_to_openai(&resp.usage)),
    }
}

/// Claude stream events to OpenAI chat chunks.
pub struct StreamState {
    id: String,
    created: i64,
    model: String,
    sent_role: bool,
    /// Claude block index -> OpenAI tool-call index, for open tool blocks.
    tool_indices: Vec<(u32, i64)>,
    next_tool_index: i64,
    input_tokens: i64,
}

impl StreamState {
    pub fn new(model: &str) -> Self {
        Self {
            id: format!("chatcmpl-{}", helpers::now_unix()),
            created: helpers::now_unix(),
            model: model.to_string(),
            sent_role: false,
            tool_indices: Vec::new(),
            next_tool_index: 0,
            input_tokens: 0,
        }
    }

    pub fn push(&mut self, event: claude::StreamEvent) -> Vec<oai::ChatCompletionChunk> {
        match event {
            claude::StreamEvent::MessageStart { message } => {
                self.id = format!("chatcmpl-{}", message.id.trim_start_matches("msg_"));
                self.model = message.model;
                self.input_tokens = message.usage.input_tokens;
                let mut delta = oai::ChunkDelta::default();
                delta.role = Some("assistant".to_string());
                self.sent_role = true;
                vec![self.chunk(delta, None, None)]
            }
            claude::StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                claude::ContentBlock::ToolUse { id, name, .. } => {
                    let tool_index = self.next_tool_index;
                    self.next_tool_index += 1;
                    self.tool_indices.push((index, tool_index));
                    let delta = oai::ChunkDelta {
                        tool_calls: Some(vec![oai::ToolCallChunk {
                            index: tool_index,
                            id: Some(id),
                            kind: Some("function".to_string()),
                            function: Some(oai::FunctionCallChunk {
                                name: Some(name),
                                arguments: Some(String::new()),
                            }),
                        }]),
                        ..Default::default()
                    };
                    vec![self.chunk(delta, None, None)]
                }
                _ => Vec::new(),
            },
            claude::StreamEvent::ContentBlockDelta { index, delta } => match delta {
                claude::ContentDelta::TextDelta { text } => {
                    let delta = oai::ChunkDelta {
                        content: Some(text),
                        ..Default::default()
                    };
                    vec![self.chunk(delta, None, None)]
                }
                claude::ContentDelta::ThinkingDelta { thinking } => {
                    let delta = oai::ChunkDelta {
                        reasoning_content: Some(thinking),
                        ..Default::default()
                    };
                    vec![self.chunk(delta, None, None)]
                }
                claude::ContentDelta::InputJsonDelta { partial_json } => {
                    let Some(&(_, tool_index)) = self
                        .tool_indices
                        .iter()
                        .find(|(block, _)| *block == index)
                    else {
                        return Vec::new();
                    };
                    let delta = oai::ChunkDelta {
                        tool_calls: Some(vec![oai::ToolCallChunk {
                            index: tool_index,
                            id: None,
                            kind: None,
                            function: Some(oai::FunctionCallChunk {
                                name: None,
                                arguments: Some(partial_json),
                            }),
                        }]),
                        ..Default::default()
                    };
                    vec![self.chunk(delta, None, None)]
                }
                claude::ContentDelta::SignatureDelta { .. } => Vec::new(),
            },
            claude::StreamEvent::MessageDelta { delta, usage } => {
                let finish = delta
                    .stop_reason
                    .as_deref()
                    .map(|reason| helpers::claude_stop_to_openai(reason).to_string());
                let usage = usage.map(|u| oai::Usage {
                    prompt_tokens: u.input_tokens.unwrap_or(self.input_tokens),
                    completion_tokens: u.output_tokens.unwrap_or(0),
                    total_tokens: u.input_tokens.unwrap_or(self.input_tokens)
                        + u.output_tokens.unwrap_or(0),
                });
                vec![self.chunk(oai::ChunkDelta::default(), finish, usage)]
            }
            claude::StreamEvent::ContentBlockStop { .. }
            | claude::StreamEvent::MessageStop
            | claude::StreamEvent::Ping
            | claude::StreamEvent::Error { .. } => Vec::new(),
        }
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
