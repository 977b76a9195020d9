//! Anthropic Messages inbound, OpenAI Chat Completions upstream.

use llmux_protocol::claude;
use llmux_protocol::openai_chat as oai;

use super::helpers;

pub fn request(req: claude::CreateMessageRequest) -> oai::ChatCompletionRequest {
    let mut messages = Vec::new();

    if let Some(system) = &req.system {
        let text = system.flat_text();
        if !text.is_empty() {
            messages.push(oai::ChatMessage {
                role: "system".to_string(),
                content: Some(oai::MessageContent::Text(text)),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            });
        }
    }

    for message in req.messages {
        let role = helpers::claude_role(&message.role);
        let mut parts = Vec::new();
        let mut tool_calls = Vec::new();
        let mut tool_results = Vec::new();

        for block in message.content.into_blocks() {
            match block {
                claude::ContentBlock::Text { text } => {
                    parts.push(oai::ContentPart::Text { text });
                }
                claude::ContentBlock::Image { source } => {
                    let url = match source {
                        claude::ImageSource::Base64 { media_type, data } => {
                            helpers::to_data_url(&media_type, &data)
                        }
                        claude::ImageSource::Url { url } => url,
                    };
                    parts.push(oai::ContentPart::ImageUrl {
                        image_url: oai::ImageUrl { url, detail: None },
                    });
                }
                claude::ContentBlock::Thinking { .. } => {}
                claude::ContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(oai::ToolCall {
                        id,
                        kind: "function".to_string(),
                        function: oai::FunctionCall {
                            name,
                            arguments: serde_json::to_string(&input)
                                .unwrap_or_else(|_| "{}".to_string()),
                        },
                    });
                }
                claude::ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } => {
                    let text = content.map(|c| c.flat_text()).unwrap_or_default();
                    tool_results.push((tool_use_id, text));
                }
            }
        }

        for (tool_call_id, text) in tool_results {
            messages.push(oai::ChatMessage {
                role: "tool".to_string(),
                content: Some(oai::MessageContent::Text(text)),
                tool_calls: None,
                tool_call_id: Some(tool_call_id),
                name: None,
            });
        }

        if parts.is_empty() && tool_calls.is_empty() {
            continue;
        }
        messages.push(oai::ChatMessage {
            role: role.to_string(),
            content: (!parts.is_empty()).then_some(oai::MessageContent::Parts(parts)),
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            tool_call_id: None,
            name: None,
        });
    }

    oai::ChatCompletionRequest {
        model: req.model,
        messages,
        temperature: req.temperature,
        top_p: req.top_p,
        max_tokens: None,
        max_completion_tokens: Some(req.max_tokens),
        stop: req.stop_sequences.map(oai::StopSequences::Many),
        stream: req.stream,
        stream_options: None,
        tools: req.tools.map(|tools| {
            tools
                .into_iter()
                .map(|tool| oai::ToolDefinition {
                    kind: "function".to_string(),
                    function: oai::FunctionDefinition {
                        name: tool.name,
                        description: tool.description,
                        parameters: Some(tool.input_schema),
                    },
                })
                .collect()
        }),
        tool_choice: req.tool_choice.map(|choice| match choice {
            claude::ToolChoice::Auto => oai::ToolChoice::Mode("auto".to_string()),
            claude::ToolChoice::Any => oai::ToolChoice::Mode("required".to_string()),
            claude::ToolChoice::None => oai::ToolChoice::Mode("none".to_string()),
            claude::ToolChoice::Tool { name } => oai::ToolChoice::Named {
                kind: "function".to_string(),
                function: oai::NamedFunction { name },
            },
        }),
        reasoning_effort: None,
        metadata: None,
        user: req.metadata.and_then(|m| m.user_id),
    }
}

pub fn response(resp: oai::ChatCompletionResponse, _model: &str) -> claude::MessageResponse {
    let mut content = Vec::new();
    let mut stop_reason = None;

    if let Some(choice) = resp.choices.first() {
        if let Some(reasoning) = &choice.message.reasoning_content
            && !reasoning.is_empty()
        {
            content.push(claude::ContentBlock::Thinking {
                thinking: reasoning.clone(),
                signature: None,
            });
        }
        if let Some(text) = &choice.message.content
            && !text.is_empty()
        {
            content.push(claude::ContentBlock::Text { text: text.clone() });
        }
        for call in choice.message.tool_calls.clone().unwrap_or_default() {
            content.push(claude::ContentBlock::ToolUse {
                id: call.id,
                name: call.function.name,
                input: helpers::args_to_value(&call.function.arguments),
            });
        }
        stop_reason = choice
            .finish_reason
            .as_deref()
            .map(|reason| helpers::openai_finish_to_claude(reason).to_string());
    }

    claude::MessageResponse {
        id: format!("msg_{}", resp.id.trim_start_matches("chatcmpl-")),
        kind: "message".to_string(),
        role: "assistant".to_string(),
        model: resp.model,
        content,
        stop_reason,
        stop_sequence: None,
        usage: resp
            .usage
            .as_ref()
            .map(helpers::openai_usage_to_claude)
            .unwrap_or_default(),
    }
}

/// OpenAI chat chunks to Claude stream events.
pub struct StreamState {
    model: String,
    started: bool,
    open_block: Option<OpenBlock>,
    next_index: u32,
    /// OpenAI tool-call index -> Claude block index, for correlation.
    tool_blocks: Vec<(i64, u32)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    Text,
    Thinking,
    Tool(i64),
}

impl StreamState {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            started: false,
            open_block: None,
            next_index: 0,
            tool_blocks: Vec::new(),
        }
    }

    pub fn push(&mut self, chunk: oai::ChatCompletionChunk) -> Vec<claude::StreamEvent> {
        let mut out = Vec::new();
        self.ensure_started(&chunk, &mut out);

        let Some(choice) = chunk.choices.first() else {
            return out;
        };

        if let Some(thinking) = &choice.delta.reasoning_content
            && !thinking.is_empty()
        {
            self.open(OpenBlock::Thinking, None, &mut out);
            out.push(claude::StreamEvent::ContentBlockDelta {
                index: self.current_index(),
                delta: claude::ContentDelta::ThinkingDelta {
                    thinking: thinking.clone(),
                },
            });
        }

        if let Some(text) = &choice.delta.content
            && !text.is_empty()
        {
            self.open(OpenBlock::Text, None, &mut out);
            out.push(claude::StreamEvent::ContentBlockDelta {
                index: self.current_index(),
                delta: claude::ContentDelta::TextDelta { text: text.clone() },
            });
        }

        for call in choice.delta.tool_calls.clone().unwrap_or_default() {
            let start = call.id.clone().zip(
                call.function
                    .as_ref()
                    .and_then(|function| function.name.clone()),
            );
            self.open(OpenBlock::Tool(call.index), start, &mut out);
            if let Some(arguments) = call.function.and_then(|function| function.arguments)
                && !arguments.is_empty()
            {
                out.push(claude::StreamEvent::ContentBlockDelta {
                    index: self.current_index(),
                    delta: claude::ContentDelta::InputJsonDelta {
                        partial_json: arguments,
                    },
                });
            }
        }

        if let Some(reason) = choice.finish_reason.as_deref() {
            self.close_open(&mut out);
            out.push(claude::StreamEvent::MessageDelta {
                delta: claude::MessageDelta {
                    stop_reason: Some(helpers::openai_finish_to_claude(reason).to_string()),
                    stop_sequence: None,
                },
                usage: chunk.usage.as_ref().map(|usage| claude::StreamUsage {
                    input_tokens: Some(usage.prompt_tokens),
                    output_tokens: Some(usage.completion_tokens),
                }),
            });
            out.push(claude::StreamEvent::MessageStop);
        }

        out
    }

    pub fn finish(&mut self) -> Vec<claude::StreamEvent> {
        Vec::new()
    }

    fn ensure_started(&mut self, chunk: &oai::ChatCompletionChunk, out: &mut Vec<claude::StreamEvent>) {
        if self.started {
            return;
        }
        self.started = true;
        if !chunk.model.is_empty() {
            self.model = chunk.model.clone();
        }
        out.push(claude::StreamEvent::MessageStart {
            message: claude::MessageResponse {
                id: format!("msg_{}", chunk.id.trim_start_matches("chatcmpl-")),
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

    fn open(
        &mut self,
        block: OpenBlock,
        tool_start: Option<(String, String)>,
        out: &mut Vec<claude::StreamEvent>,
    ) {
        if self.open_block == Some(block) {
            return;
        }
        self.close_open(out);
        let index = self.next_index;
        self.next_index += 1;
        self.open_block = Some(block);

        let content_block = match block {
            OpenBlock::Text => claude::ContentBlock::Text {
                text: String::new(),
            },
            OpenBlock::Thinking => claude::ContentBlock::Thinking {
                thinking: String::new(),
                signature: None,
            },
            OpenBlock::Tool(tool_index) => {
                self.tool_blocks.push((tool_index, index));
                let (id, name) = tool_start.unwrap_or_else(|| {
                    (format!("call_{tool_index}"), String::new())
                });
                claude::ContentBlock::ToolUse {
                    id,
                    name,
                    input: serde_json::json!({}),
                }
            }
        };
        out.push(claude::StreamEvent::ContentBlockStart {
            index,
            content_block,
        });
    }

    fn close_open(&mut self, out: &mut Vec<claude::StreamEvent>) {
        if self.open_block.take().is_some() {
            out.push(claude::StreamEvent::ContentBlockStop {
                index: self.current_index(),
            });
        }
    }
}
