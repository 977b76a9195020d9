//! OpenAI Responses inbound, Gemini upstream.

use llmux_protocol::gemini;
use llmux_protocol::openai_responses as resp;

use super::helpers;

pub fn request(req: resp::CreateResponseRequest) -> gemini::GenerateContentRequest {
    let mut contents = Vec::new();

    match req.input {
        Some(resp::ResponseInput::Text(text)) => {
            if !text.is_empty() {
                contents.push(gemini::Content {
                    role: Some("user".to_string()),
                    parts: vec![gemini::Part::text(text)],
                });
            }
        }
        Some(resp::ResponseInput::Items(items)) => {
            for item in items {
                match item {
                    resp::InputItem::Message(message) => {
                        let role = helpers::gemini_role(&message.role);
                        // System turns fold into systemInstruction below via
                        // the instructions field; Gemini has no system role.
                        let parts = input_content_to_parts(message.content);
                        if !parts.is_empty() {
                            contents.push(gemini::Content {
                                role: Some(role.to_string()),
                                parts,
                            });
                        }
                    }
                    resp::InputItem::FunctionCall(call) => {
                        contents.push(gemini::Content {
                            role: Some("model".to_string()),
                            parts: vec![gemini::Part {
                                function_call: Some(gemini::FunctionCall {
                                    id: Some(call.call_id.clone()),
                                    name: call.name,
                                    args: Some(helpers::args_to_value(&call.arguments)),
                                }),
                                ..Default::default()
                            }],
                        });
                    }
                    resp::InputItem::FunctionCallOutput(output) => {
                        contents.push(gemini::Content {
                            role: Some("user".to_string()),
                            parts: vec![gemini::Part {
                                function_response: Some(gemini::FunctionResponse {
                                    id: Some(output.call_id.clone()),
                                    name: output.call_id,
                                    response: serde_json::json!({ "output": output.output }),
                                }),
                                ..Default::default()
                            }],
                        });
                    }
                }
            }
        }
        None => {}
    }

    let system_instruction = req.instructions.filter(|text| !text.is_empty()).map(|text| {
        gemini::Content {
            role: None,
            parts: vec![gemini::Part::text(text)],
        }
    });

    let tools = req.tools.as_ref().map(|tools| {
        vec![gemini::Tool {
            function_declarations: Some(
                tools
                    .iter()
                    .filter(|tool| tool.kind == "function")
                    .map(|tool| gemini::FunctionDeclaration {
                        name: tool.name.clone().unwrap_or_default(),
                        description: tool.description.clone(),
                        parameters: tool.parameters.clone(),
                    })
                    .collect(),
            ),
            google_search: None,
        }]
    });

    gemini::GenerateContentRequest {
        contents,
        system_instruction,
        tools: tools.filter(|tools| {
            tools
                .first()
                .and_then(|t| t.function_declarations.as_ref())
                .is_some_and(|decls| !decls.is_empty())
        }),
        tool_config: None,
        generation_config: Some(gemini::GenerationConfig {
            temperature: req.temperature,
            top_p: req.top_p,
            max_output_tokens: req.max_output_tokens,
            ..Default::default()
        }),
        safety_settings: None,
    }
}

fn input_content_to_parts(content: resp::InputContent) -> Vec<gemini::Part> {
    match content {
        resp::InputContent::Text(text) => {
            if text.is_empty() {
                Vec::new()
            } else {
                vec![gemini::Part::text(text)]
            }
        }
        resp::InputContent::Parts(parts) => parts
            .into_iter()
            .filter_map(|part| match part {
                resp::InputPart::InputText { text } | resp::InputPart::OutputText { text } => {
                    (!text.is_empty()).then(|| gemini::Part::text(text))
                }
                resp::InputPart::InputImage { image_url } => {
                    Some(match helpers::parse_data_url(&image_url) {
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
                                file_uri: image_url,
                            }),
                            ..Default::default()
                        },
                    })
                }
                resp::InputPart::InputFile { file_url } => Some(gemini::Part {
                    file_data: Some(gemini::FileData {
                        mime_type: None,
                        file_uri: file_url,
                    }),
                    ..Default::default()
                }),
            })
            .collect(),
    }
}

pub fn response(upstream: gemini::GenerateContentResponse, model: &str) -> resp::Response {
    let mut output = Vec::new();
    let mut tool_counter = 0usize;
    let mut status = "completed".to_string();

    if let Some(candidate) = upstream.candidates.first() {
        if let Some(content) = &candidate.content {
            let mut text = String::new();
            for part in &content.parts {
                if let Some(t) = &part.text {
                    if part.thought.unwrap_or(false) {
                        continue;
                    }
                    text.push_str(t);
                }
                if let Some(call) = &part.function_call {
                    let call_id = call
                        .id
                        .clone()
                        .unwrap_or_else(|| helpers::synth_tool_id(&mut tool_counter));
                    output.push(resp::OutputItem::FunctionCall(resp::OutputFunctionCall {
                        id: Some(format!("fc_{call_id}")),
                        call_id,
                        name: call.name.clone(),
                        arguments: helpers::value_to_args(call.args.as_ref()),
                        status: Some("completed".to_string()),
                    }));
                }
            }
            if !text.is_empty() {
                output.insert(
                    0,
                    resp::OutputItem::Message(resp::OutputMessage {
                        id: format!("msg_{}", helpers::now_unix()),
                        role: "assistant".to_string(),
                        status: "completed".to_string(),
                        content: vec![resp::OutputContent::OutputText { text }],
                    }),
                );
            }
        }
        if candidate.finish_reason.as_deref() == Some("MAX_TOKENS") {
            status = "incomplete".to_string();
        }
    }

    resp::Response {
        id: format!(
            "resp_{}",
            upstream
                .response_id
                .clone()
                .unwrap_or_else(|| helpers::now_unix().to_string())
        ),
        object: "response".to_string(),
        created_at: helpers::now_unix(),
        status,
        model: upstream
            .model_version
            .clone()
            .unwrap_or_else(|| model.to_string()),
        output,
        usage: upstream
            .usage_metadata
            .as_ref()
            .map(helpers::gemini_usage_to_responses),
    }
}

/// Gemini stream chunks to Responses stream events.
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
    tool_counter: usize,
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
            tool_counter: 0,
            usage: None,
        }
    }

    pub fn push(&mut self, chunk: gemini::GenerateContentResponse) -> Vec<resp::ResponseStreamEvent> {
        let mut out = Vec::new();
        if let Some(version) = &chunk.model_version {
            self.model = version.clone();
        }
        if let Some(usage) = &chunk.usage_metadata {
            self.usage = Some(helpers::gemini_usage_to_responses(usage));
        }
        if !self.started {
            self.started = true;
            out.push(resp::ResponseStreamEvent::Created {
                response: self.snapshot("in_progress", Vec::new()),
                sequence_number: self.next_seq(),
            });
        }

        let candidate = chunk.candidates.first();
        if let Some(content) = candidate.and_then(|c| c.content.as_ref()) {
            for part in &content.parts {
                if let Some(text) = &part.text {
                    if part.thought.unwrap_or(false) || text.is_empty() {
                        continue;
                    }
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
                    self.text.push_str(text);
                    out.push(resp::ResponseStreamEvent::OutputTextDelta {
                        item_id: self.message_id.clone(),
                        output_index: self.output_index,
                        content_index: 0,
                        delta: text.clone(),
                        sequence_number: self.next_seq(),
                    });
                }
                if let Some(call) = &part.function_call {
                    self.close_message(&mut out);
                    let call_id = call
                        .id
                        .clone()
                        .unwrap_or_else(|| helpers::synth_tool_id(&mut self.tool_counter));
                    let item = resp::OutputItem::FunctionCall(resp::OutputFunctionCall {
                        id: Some(format!("fc_{call_id}")),
                        call_id: call_id.clone(),
                        name: call.name.clone(),
                        arguments: helpers::value_to_args(call.args.as_ref()),
                        status: Some("completed".to_string()),
                    });
                    out.push(resp::ResponseStreamEvent::OutputItemAdded {
                        output_index: self.output_index,
                        item: item.clone(),
                        sequence_number: self.next_seq(),
                    });
                    out.push(resp::ResponseStreamEvent::FunctionCallArgumentsDelta {
                        item_id: format!("fc_{call_id}"),
                        output_index: self.output_index,
                        delta: helpers::value_to_args(call.args.as_ref()),
                        sequence_number: self.next_seq(),
                    });
                    out.push(resp::ResponseStreamEvent::FunctionCallArgumentsDone {
                        item_id: format!("fc_{call_id}"),
                        output_index: self.output_index,
                        name: call.name.clone(),
                        arguments: helpers::value_to_args(call.args.as_ref()),
                        sequence_number: self.next_seq(),
                    });
                    out.push(resp::ResponseStreamEvent::OutputItemDone {
                        output_index: self.output_index,
                        item,
                        sequence_number: self.next_seq(),
                    });
                    self.output_index += 1;
                }
            }
        }

        if candidate.and_then(|c| c.finish_reason.as_deref()).is_some() {
            self.close_message(&mut out);
            out.push(resp::ResponseStreamEvent::Completed {
                response: self.snapshot("completed", Vec::new()),
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

    fn snapshot(&self, status: &str, output: Vec<resp::OutputItem>) -> resp::Response {
        resp::Response {
            id: self.id.clone(),
            object: "response".to_string(),
            created_at: self.created_at,
            status: status.to_string(),
            model: self.model.clone(),
            output,
            usage: self.usage.clone(),
        }
    }

    fn next_seq(&mut self) -> i64 {
        let value = self.seq;
        self.seq += 1;
        value
    }
}
