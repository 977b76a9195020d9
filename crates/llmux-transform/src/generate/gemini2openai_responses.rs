//! Gemini inbound, OpenAI Responses upstream.

use llmux_protocol::gemini;
use llmux_protocol::openai_responses as resp;

use super::helpers;

pub fn request(req: gemini::GenerateContentRequest, model: &str) -> resp::CreateResponseRequest {
    let mut items = Vec::new();

    for content in &req.contents {
        let role = if content.role.as_deref() == Some("model") {
            "assistant"
        } else {
            "user"
        };
        let mut parts = Vec::new();
        for part in &content.parts {
            if let Some(text) = &part.text {
                if !text.is_empty() && !part.thought.unwrap_or(false) {
                    parts.push(if role == "assistant" {
                        resp::InputPart::OutputText { text: text.clone() }
                    } else {
                        resp::InputPart::InputText { text: text.clone() }
                    });
                }
            }
            if let Some(blob) = &part.inline_data {
                parts.push(resp::InputPart::InputImage {
                    image_url: helpers::to_data_url(&blob.mime_type, &blob.data),
                });
            }
            if let Some(file) = &part.file_data {
                parts.push(resp::InputPart::InputFile {
                    file_url: file.file_uri.clone(),
                });
            }
            if let Some(call) = &part.function_call {
                items.push(resp::InputItem::FunctionCall(resp::FunctionCallItem {
                    kind: "function_call".to_string(),
                    id: None,
                    call_id: call.id.clone().unwrap_or_else(|| call.name.clone()),
                    name: call.name.clone(),
                    arguments: helpers::value_to_args(call.args.as_ref()),
                }));
            }
            if let Some(fr) = &part.function_response {
                items.push(resp::InputItem::FunctionCallOutput(
                    resp::FunctionCallOutputItem {
                        kind: "function_call_output".to_string(),
                        call_id: fr.id.clone().unwrap_or_else(|| fr.name.clone()),
                        output: fr
                            .response
                            .get("output")
                            .and_then(|value| value.as_str())
                            .map(|value| value.to_string())
                            .unwrap_or_else(|| fr.response.to_string()),
                    },
                ));
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

    let instructions = req.system_instruction.as_ref().map(|content| {
        content
            .parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    });

    let config = req.generation_config.as_ref();
    resp::CreateResponseRequest {
        model: model.to_string(),
        input: Some(resp::ResponseInput::Items(items)),
        instructions,
        temperature: config.and_then(|c| c.temperature),
        top_p: config.and_then(|c| c.top_p),
        max_output_tokens: config.and_then(|c| c.max_output_tokens),
        stream: None,
        tools: req.tools.as_ref().map(|tools| {
            tools
                .iter()
                .flat_map(|tool| tool.function_declarations.clone().unwrap_or_default())
                .map(|decl| resp::ResponseTool {
                    kind: "function".to_string(),
                    name: Some(decl.name),
                    description: decl.description,
                    parameters: decl.parameters,
                })
                .collect()
        }),
        tool_choice: None,
        reasoning: None,
        metadata: None,
    }
}

pub fn response(upstream: resp::Response, _model: &str) -> gemini::GenerateContentResponse {
    let mut parts = Vec::new();
    let mut saw_tool_call = false;

    for item in &upstream.output {
        match item {
            resp::OutputItem::Message(message) => {
                for content in &message.content {
                    if let resp::OutputContent::OutputText { text } = content
                        && !text.is_empty()
                    {
                        parts.push(gemini::Part::text(text.clone()));
                    }
                }
            }
            resp::OutputItem::FunctionCall(call) => {
                saw_tool_call = true;
                parts.push(gemini::Part {
                    function_call: Some(gemini::FunctionCall {
                        id: Some(call.call_id.clone()),
                        name: call.name.clone(),
                        args: Some(helpers::args_to_value(&call.arguments)),
                    }),
                    ..Default::default()
                });
            }
            resp::OutputItem::Reasoning(reasoning) => {
                for summary in &reasoning.summary {
                    let resp::ReasoningSummary::SummaryText { text } = summary;
                    parts.push(gemini::Part {
                        text: Some(text.clone()),
                        thought: Some(true),
                        ..Default::default()
                    });
                }
            }
        }
    }

    let finish_reason = match upstream.status.as_str() {
        "incomplete" => "MAX_TOKENS",
        _ if saw_tool_call => "STOP",
        _ => "STOP",
    };

    gemini::GenerateContentResponse {
        candidates: vec![gemini::Candidate {
            content: Some(gemini::Content {
                role: Some("model".to_string()),
                parts,
            }),
            finish_reason: Some(finish_reason.to_string()),
            index: Some(0),
        }],
        usage_metadata: upstream
            .usage
            .as_ref()
            .map(helpers::responses_usage_to_gemini),
        model_version: Some(upstream.model.clone()),
        response_id: Some(upstream.id.trim_start_matches("resp_").to_string()),
    }
}

/// Responses stream events to Gemini stream chunks.
pub struct StreamState {
    model: String,
}

impl StreamState {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
        }
    }

    pub fn push(&mut self, event: resp::ResponseStreamEvent) -> Vec<gemini::GenerateContentResponse> {
        match event {
            resp::ResponseStreamEvent::OutputTextDelta { delta, .. } => {
                if delta.is_empty() {
                    return Vec::new();
                }
                vec![self.part_chunk(gemini::Part::text(delta), None)]
            }
            resp::ResponseStreamEvent::FunctionCallArgumentsDone {
                name, arguments, item_id, ..
            } => vec![self.part_chunk(
                gemini::Part {
                    function_call: Some(gemini::FunctionCall {
                        id: Some(item_id.trim_start_matches("fc_").to_string()),
                        name,
                        args: Some(helpers::args_to_value(&arguments)),
                    }),
                    ..Default::default()
                },
                None,
            )],
            resp::ResponseStreamEvent::Completed { response, .. }
            | resp::ResponseStreamEvent::Failed { response, .. } => {
                let reason = if response.status == "incomplete" {
                    "MAX_TOKENS"
                } else {
                    "STOP"
                };
                self.model = response.model.clone();
                vec![gemini::GenerateContentResponse {
                    candidates: vec![gemini::Candidate {
                        content: None,
                        finish_reason: Some(reason.to_string()),
                        index: Some(0),
                    }],
                    usage_metadata: response
                        .usage
                        .as_ref()
                        .map(helpers::responses_usage_to_gemini),
                    model_version: Some(self.model.clone()),
                    response_id: Some(response.id.trim_start_matches("resp_").to_string()),
                }]
            }
            _ => Vec::new(),
        }
    }

    pub fn finish(&mut self) -> Vec<gemini::GenerateContentResponse> {
        Vec::new()
    }

    fn part_chunk(
        &self,
        part: gemini::Part,
        finish_reason: Option<String>,
    ) -> gemini::GenerateContentResponse {
        gemini::GenerateContentResponse {
            candidates: vec![gemini::Candidate {
                content: Some(gemini::Content {
                    role: Some("model".to_string()),
                    parts: vec![part],
                }),
                finish_reason,
                index: Some(0),
            }],
            usage_metadata: None,
            model_version: Some(self.model.clone()),
            response_id: None,
        }
    }
}
