//! OpenAI Responses inbound, OpenAI Chat Completions upstream.

use llmux_protocol::openai_chat as oai;
use llmux_protocol::openai_responses as resp;

use super::helpers;

pub fn request(req: resp::CreateResponseRequest) -> oai::ChatCompletionRequest {
    let mut messages = Vec::new();

    if let Some(instructions) = &req.instructions
        && !instructions.is_empty()
    {
        messages.push(oai::ChatMessage {
            role: "system".to_string(),
            content: Some(oai::MessageContent::Text(instructions.clone())),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        });
    }

    match req.input {
        Some(resp::ResponseInput::Text(text)) => {
            messages.push(oai::ChatMessage {
                role: "user".to_string(),
                content: Some(oai::MessageContent::Text(text)),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            });
        }
        Some(resp::ResponseInput::Items(items)) => {
            for item in items {
                match item {
                    resp::InputItem::Message(message) => {
                        let role = helpers::coerce_chat_role(&message.role).to_string();
                        messages.push(oai::ChatMessage {
                            role,
                            content: Some(input_content(message.content)),
                            tool_calls: None,
                            tool_call_id: None,
                            name: None,
                        });
                    }
                    resp::InputItem::FunctionCall(call) => {
                        messages.push(oai::ChatMessage {
                            role: "assistant".to_string(),
                            content: None,
                            tool_calls: Some(vec![oai::ToolCall {
                                id: call.call_id,
                                kind: "function".to_string(),
                                function: oai::FunctionCall {
                                    name: call.name,
                                    arguments: call.arguments,
                                },
                            }]),
                            tool_call_id: None,
                            name: None,
                        });
                    }
                    resp::InputItem::FunctionCallOutput(output) => {
                        messages.push(oai::ChatMessage {
                            role: "tool".to_string(),
                            content: Some(oai::MessageContent::Text(output.output)),
                            tool_calls: None,
                            tool_call_id: Some(output.call_id),
                            name: None,
                        });
                    }
                }
            }
        }
        None => {}
    }

    oai::ChatCompletionRequest {
        model: req.model,
        messages,
        temperature: req.temperature,
        top_p: req.top_p,
        max_tokens: None,
        max_completion_tokens: req.max_output_tokens,
        stop: None,
        stream: req.stream,
        stream_options: None,
        tools: req.tools.map(|tools| {
            tools
                .into_iter()
                .filter(|tool| tool.kind == "function")
                .map(|tool| oai::ToolDefinition {
                    kind: "function".to_string(),
                    function: oai::FunctionDefinition {
                        name: tool.name.unwrap_or_default(),
                        description: tool.description,
                        parameters: tool.parameters,
                    },
                })
                .collect()
        }),
        tool_choice: None,
        reasoning_effort: req.reasoning.and_then(|reasoning| reasoning.effort),
        metadata: req.metadata,
        user: None,
    }
}

fn input_content(content: resp::InputContent) -> oai::MessageContent {
    match content {
        resp::InputContent::Text(text) => oai::MessageContent::Text(text),
        resp::InputContent::Parts(parts) => oai::MessageContent::Parts(
            parts
                .into_iter()
                .filter_map(|part| match part {
                    resp::InputPart::InputText { text }
                    | resp::InputPart::OutputText { text } => {
                        Some(oai::ContentPart::Text { text })
                    }
                    resp::InputPart::InputImage { image_url } => Some(oai::ContentPart::ImageUrl {
                        image_url: oai::ImageUrl {
                            url: image_url,
                            detail: None,
                        },
                    }),
                    resp::InputPart::InputFile { file_url } => Some(oai::ContentPart::File {
                        file: oai::FileRef {
                            file_id: Some(file_url),
                            file_data: None,
                            filename: None,
                        },
                    }),
                })
                .collect(),
        ),
    }
}

pub fn response(upstream: oai::ChatCompletionResponse, _model: &str) -> resp::Response {
    let mut output = Vec::new();
    let mut status = "completed".to_string();

    if let Some(choice) = upstream.choices.first() {
        if let Some(reasoning) = &choice.message.reasoning_content
            && !reasoning.is_empty()
        {
            output.push(resp::OutputItem::Reasoning(resp::OutputReasoning {
                id: format!("rs_{}", upstream.id.trim_start_matches("chatcmpl-")),
                summary: vec![resp::ReasoningSummary::SummaryText {
                    text: reasoning.clone(),
                }],
            }));
        }
        if let Some(text) = &choice.message.content
            && !text.is_empty()
        {
            output.push(resp::OutputItem::Message(resp::OutputMessage {
                id: format!("msg_{}", upstream.id.trim_start_matches("chatcmpl-")),
                role: "assistant".to_string(),
                status: "completed".to_string(),
                content: vec![resp::OutputContent::OutputText { text: text.clone() }],
            }));
        }
        for call in choice.message.tool_calls.clone().unwrap_or_default() {
            output.push(resp::OutputItem::FunctionCall(resp::OutputFunctionCall {
                id: Some(format!("fc_{}", call.id)),
                call_id: call.id,
                name: call.function.name,
                arguments: call.function.arguments,
                status: Some("completed".to_string()),
            }));
        }
        if choice.finish_reason.as_deref() == Some("length") {
            status = "incomplete".to_string();
        }
    }

    resp::Response {
        id: format!("resp_{}", upstream.id.trim_start_matches("chatcmpl-")),
        object: "response".to_string(),
        created_at: upstream.created,
        status,
        model: upstream.model.clone(),
        output,
        usage: upstream
            .usage
            .as_ref()
            .map(helpers::openai_usage_to_responses),
    }
}

/// OpenAI chat chunks to Responses stream events.
pub struct StreamState {
    id: String,
    model: String,
    created_at: i64,
    seq: i64,
    started: bool,
    message_open: bool,
    message_id: String,
    text: String,
    output_index: i64,
    /// OpenAI tool index -> (responses output_index, item id, name, args).
    tools: Vec<(i64, i64, String, String, String)>,
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
            started: false,
            message_open: false,
            message_id: format!("msg_{now}"),
            text: String::new(),
            output_index: 0,
            tools: Vec::new(),
            usage: None,
        }
    }

    pub fn push(&mut self, chunk: oai::ChatCompletionChunk) -> Vec<resp::ResponseStreamEvent> {
        let mut out = Vec::new();
        if !self.started {
            self.started = true;
            self.id = format!("resp_{}", chunk.id.trim_start_matches("chatcmpl-"));
            self.model = chunk.model.clone();
            self.created_at = chunk.created;
            out.push(resp::ResponseStreamEvent::Created {
                response: self.snapshot("in_progress"),
                sequence_number: self.next_seq(),
            });
        }
        if let Some(usage) = &chunk.usage {
            self.usage = Some(helpers::openai_usage_to_responses(usage));
        }

        let Some(choice) = chunk.choices.first() else {
            return out;
        };

        if let Some(delta) = &choice.delta.content
            && !delta.is_empty()
        {
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
            self.text.push_str(delta);
            out.push(resp::ResponseStreamEvent::OutputTextDelta {
                item_id: self.message_id.clone(),
                output_index: self.output_index,
                content_index: 0,
                delta: delta.clone(),
                sequence_number: self.next_seq(),
            });
        }

        for call in choice.delta.tool_calls.clone().unwrap_or_default() {
            let known = self.tools.iter().position(|(index, ..)| *index == call.index);
            match known {
                None => {
                    self.close_message(&mut out);
                    let output_index = self.output_index;
                    self.output_index += 1;
                    let call_id = call.id.clone().unwrap_or_else(|| format!("call_{}", call.index));
                    let name = call
                        .function
                        .as_ref()
                        .and_then(|f| f.name.clone())
                        .unwrap_or_default();
                    let arguments = call
                        .function
                        .as_ref()
                        .and_then(|f| f.arguments.clone())
                        .unwrap_or_default();
                    let item_id = format!("fc_{call_id}");
                    out.push(resp::ResponseStreamEvent::OutputItemAdded {
                        output_index,
                        item: resp::OutputItem::FunctionCall(resp::OutputFunctionCall {
                            id: Some(item_id.clone()),
                            call_id: call_id.clone(),
                            name: name.clone(),
                            arguments: String::new(),
                            status: Some("in_progress".to_string()),
                        }),
                        sequence_number: self.next_seq(),
                    });
                    if !arguments.is_empty() {
                        out.push(resp::ResponseStreamEvent::FunctionCallArgumentsDelta {
                            item_id: item_id.clone(),
                            output_index,
                            delta: arguments.clone(),
                            sequence_number: self.next_seq(),
                        });
                    }
                    self.tools.push((call.index, output_index, item_id, name, arguments));
                }
                Some(pos) => {
                    let (_, output_index, item_id, name, args) = &mut self.tools[pos];
                    if let Some(function) = call.function {
                        if let Some(new_name) = function.name {
                            *name = new_name;
                        }
                        if let Some(delta) = function.arguments
                            && !delta.is_empty()
                        {
                            args.push_str(&delta);
                            out.push(resp::ResponseStreamEvent::FunctionCallArgumentsDelta {
                                item_id: item_id.clone(),
                                output_index: *output_index,
                                delta,
                                sequence_number: self.next_seq(),
                            });
                        }
                    }
                }
            }
        }

        if choice.finish_reason.is_some() {
            self.close_message(&mut out);
            self.close_tools(&mut out);
            let status = if choice.finish_reason.as_deref() == Some("length") {
                "incomplete"
            } else {
                "completed"
            };
            out.push(resp::ResponseStreamEvent::Completed {
                response: self.snapshot(status),
                sequence_number: self.next_seq(),
            });
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

    fn close_tools(&mut self, out: &mut Vec<resp::ResponseStreamEvent>) {
        for (_, output_index, item_id, name, args) in std::mem::take(&mut self.tools) {
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
