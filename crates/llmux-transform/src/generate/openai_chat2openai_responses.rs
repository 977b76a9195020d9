//! OpenAI Chat Completions inbound, OpenAI Responses upstream.

use llmux_protocol::openai_chat as oai;
use llmux_protocol::openai_responses as resp;

use super::helpers;

pub fn request(req: oai::ChatCompletionRequest) -> resp::CreateResponseRequest {
    let mut instructions = Vec::new();
    let mut items = Vec::new();

    for message in req.messages {
        match helpers::coerce_chat_role(&message.role) {
            "system" | "developer" => {
                if let Some(content) = message.content {
                    let text = content.flat_text();
                    if !text.is_empty() {
                        instructions.push(text);
                    }
                }
            }
            "assistant" => {
                if let Some(content) = message.content {
                    let text = content.flat_text();
                    if !text.is_empty() {
                        items.push(resp::InputItem::Message(resp::InputMessage {
                            kind: Some("message".to_string()),
                            role: "assistant".to_string(),
                            content: resp::InputContent::Parts(vec![
                                resp::InputPart::OutputText { text },
                            ]),
                        }));
                    }
                }
                for call in message.tool_calls.unwrap_or_default() {
                    items.push(resp::InputItem::FunctionCall(resp::FunctionCallItem {
                        kind: "function_call".to_string(),
                        id: None,
                        call_id: call.id,
                        name: call.function.name,
                        arguments: call.function.arguments,
                    }));
                }
            }
            "tool" => {
                items.push(resp::InputItem::FunctionCallOutput(
                    resp::FunctionCallOutputItem {
                        kind: "function_call_output".to_string(),
                        call_id: message.tool_call_id.unwrap_or_default(),
                        output: message
                            .content
                            .map(|content| content.flat_text())
                            .unwrap_or_default(),
                    },
                ));
            }
            _ => {
                if let Some(content) = message.content {
                    let parts = user_parts(content);
                    if !parts.is_empty() {
                        items.push(resp::InputItem::Message(resp::InputMessage {
                            kind: Some("message".to_string()),
                            role: "user".to_string(),
                            content: resp::InputContent::Parts(parts),
                        }));
                    }
                }
            }
        }
    }

    resp::CreateResponseRequest {
        model: req.model,
        input: Some(resp::ResponseInput::Items(items)),
        instructions: (!instructions.is_empty()).then(|| instructions.join("\n")),
        temperature: req.temperature,
        top_p: req.top_p,
        max_output_tokens: req.max_completion_tokens.or(req.max_tokens),
        stream: req.stream,
        tools: req.tools.map(|tools| {
            tools
                .into_iter()
                .map(|tool| resp::ResponseTool {
                    kind: "function".to_string(),
                    name: Some(tool.function.name),
                    description: tool.function.description,
                    parameters: tool.function.parameters,
                })
                .collect()
        }),
        tool_choice: req
            .tool_choice
            .and_then(|choice| serde_json::to_value(&choice).ok()),
        reasoning: req.reasoning_effort.map(|effort| resp::ReasoningOptions {
            effort: Some(effort),
            summary: None,
        }),
        metadata: req.metadata,
    }
}

fn user_parts(content: oai::MessageContent) -> Vec<resp::InputPart> {
    match content {
        oai::MessageContent::Text(text) => {
            if text.is_empty() {
                Vec::new()
            } else {
                vec![resp::InputPart::InputText { text }]
            }
        }
        oai::MessageContent::Parts(parts) => parts
            .into_iter()
            .filter_map(|part| match part {
                oai::ContentPart::Text { text } => {
                    (!text.is_empty()).then_some(resp::InputPart::InputText { text })
                }
                oai::ContentPart::ImageUrl { image_url } => Some(resp::InputPart::InputImage {
                    image_url: image_url.url,
                }),
                oai::ContentPart::File { file } => file
                    .file_id
                    .map(|file_url| resp::InputPart::InputFile { file_url }),
            })
            .collect(),
    }
}

pub fn response(upstream: resp::Response, _model: &str) -> oai::ChatCompletionResponse {
    let mut text = String::new();
    let mut reasoning = String::new();
    let mut tool_calls = Vec::new();

    for item in &upstream.output {
        match item {
            resp::OutputItem::Message(message) => {
                for content in &message.content {
                    if let resp::OutputContent::OutputText { text: t } = content {
                        text.push_str(t);
                    }
                }
            }
            resp::OutputItem::FunctionCall(call) => {
                tool_calls.push(oai::ToolCall {
                    id: call.call_id.clone(),
                    kind: "function".to_string(),
                    function: oai::FunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    },
                });
            }
            resp::OutputItem::Reasoning(item) => {
                for summary in &item.summary {
                    let resp::ReasoningSummary::SummaryText { text } = summary;
                    reasoning.push_str(text);
                }
            }
        }
    }

    let finish_reason = if !tool_calls.is_empty() {
        "tool_calls"
    } else if upstream.status == "incomplete" {
        "length"
    } else {
        "stop"
    };

    oai::ChatCompletionResponse {
        id: format!("chatcmpl-{}", upstream.id.trim_start_matches("resp_")),
        object: "chat.completion".to_string(),
        created: upstream.created_at,
        model: upstream.model.clone(),
        choices: vec![oai::ChatChoice {
            index: 0,
            message: oai::ResponseMessage {
                role: "assistant".to_string(),
                content: (!text.is_empty()).then_some(text),
                reasoning_content: (!reasoning.is_empty()).then_some(reasoning),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            },
            finish_reason: Some(finish_reason.to_string()),
        }],
        usage: upstream
            .usage
            .as_ref()
            .map(helpers::responses_usage_to_openai),
    }
}

/// Responses stream events to OpenAI chat chunks.
pub struct StreamState {
    id: String,
    created: i64,
    model: String,
    sent_role: bool,
    /// Responses output_index -> OpenAI tool index.
    tool_indices: Vec<(i64, i64)>,
    next_tool_index: i64,
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
        }
    }

    pub fn push(&mut self, event: resp::ResponseStreamEvent) -> Vec<oai::ChatCompletionChunk> {
        match event {
            resp::ResponseStreamEvent::Created { response, .. } => {
                self.id = format!("chatcmpl-{}", response.id.trim_start_matches("resp_"));
                self.model = response.model;
                self.created = response.created_at;
                self.sent_role = true;
                vec![self.chunk(
                    oai::ChunkDelta {
                        role: Some("assistant".to_string()),
                        ..Default::default()
                    },
                    None,
                    None,
                )]
            }
            resp::ResponseStreamEvent::OutputTextDelta { delta, .. } => {
                if delta.is_empty() {
                    return Vec::new();
                }
                vec![self.chunk(
                    oai::ChunkDelta {
                        content: Some(delta),
                        ..Default::default()
                    },
                    None,
                    None,
                )]
            }
            resp::ResponseStreamEvent::OutputItemAdded { output_index, item, .. } => {
                let resp::OutputItem::FunctionCall(call) = item else {
                    return Vec::new();
                };
                let tool_index = self.next_tool_index;
                self.next_tool_index += 1;
                self.tool_indices.push((output_index, tool_index));
                vec![self.chunk(
                    oai::ChunkDelta {
                        tool_calls: Some(vec![oai::ToolCallChunk {
                            index: tool_index,
                            id: Some(call.call_id),
                            kind: Some("function".to_string()),
                            function: Some(oai::FunctionCallChunk {
                                name: Some(call.name),
                                arguments: Some(String::new()),
                            }),
                        }]),
                        ..Default::default()
                    },
                    None,
                    None,
                )]
            }
            resp::ResponseStreamEvent::FunctionCallArgumentsDelta {
                output_index,
                delta,
                ..
            } => {
                let Some(&(_, tool_index)) = self
                    .tool_indices
                    .iter()
                    .find(|(index, _)| *index == output_index)
                else {
                    return Vec::new();
                };
                vec![self.chunk(
                    oai::ChunkDelta {
                        tool_calls: Some(vec![oai::ToolCallChunk {
                            index: tool_index,
                            id: None,
                            kind: None,
                            function: Some(oai::FunctionCallChunk {
                                name: None,
                                arguments: Some(delta),
                            }),
                        }]),
                        ..Default::default()
                    },
                    None,
                    None,
                )]
            }
            resp::ResponseStreamEvent::Completed { response, .. } => {
                let finish = if self.next_tool_index > 0 {
                    "tool_calls"
                } else if response.status == "incomplete" {
                    "length"
                } else {
                    "stop"
                };
                vec![self.chunk(
                    oai::ChunkDelta::default(),
                    Some(finish.to_string()),
                    response
                        .usage
                        .as_ref()
                        .map(helpers::responses_usage_to_openai),
                )]
            }
            resp::ResponseStreamEvent::Failed { .. } => vec![self.chunk(
                oai::ChunkDelta::default(),
                Some("stop".to_string()),
                None,
            )],
            _ => Vec::new(),
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
