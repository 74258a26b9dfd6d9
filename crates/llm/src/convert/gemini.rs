//! OpenAI to Gemini requests, Gemini to OpenAI responses and chunks.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::{
    id,
    messages::{
        gemini::{
            FunctionCallingConfig, FunctionCallingMode, FunctionDeclaration, GeminiContent, GeminiFunctionCall,
            GeminiFunctionResponse, GeminiPart, GeminiRequest, GeminiResponse, GeminiTool, GenerationConfig,
            InlineData, ToolConfig, UsageMetadata,
        },
        openai::{
            ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ChatRole, Choice,
            ChunkChoice, ChunkDelta, ContentPart, FinishReason, FunctionCall, FunctionDelta, MessageContent, Tool,
            ToolCall, ToolCallDelta, ToolChoice, ToolChoiceMode, ToolType, Usage,
        },
    },
};

impl From<ChatCompletionRequest> for GeminiRequest {
    fn from(request: ChatCompletionRequest) -> Self {
        let mut system_parts = Vec::new();
        let mut contents: Vec<GeminiContent> = Vec::new();
        let mut tool_names = HashMap::new();

        for message in request.messages {
            let (role, parts) = match message.role {
                ChatRole::System => {
                    let text = message.text_content();

                    if !text.is_empty() {
                        system_parts.push(GeminiPart::text(text));
                    }

                    continue;
                }
                ChatRole::User => ("user", user_parts(message)),
                ChatRole::Assistant => ("model", model_parts(message, &mut tool_names)),
                ChatRole::Tool => ("user", vec![function_response(message, &tool_names)]),
            };

            if parts.is_empty() {
                continue;
            }

            match contents.last_mut() {
                Some(last) if last.role.as_deref() == Some(role) => last.parts.extend(parts),
                _ => contents.push(GeminiContent {
                    role: Some(role.to_string()),
                    parts,
                }),
            }
        }

        let generation_config = GenerationConfig {
            temperature: request.temperature,
            top_p: request.top_p,
            max_output_tokens: request.max_tokens,
            stop_sequences: request.stop,
        };

        let tools = request.tools.filter(|tools| !tools.is_empty()).map(|tools| {
            vec![GeminiTool {
                function_declarations: tools.into_iter().map(FunctionDeclaration::from).collect(),
            }]
        });

        let tool_config = request.tool_choice.map(|choice| ToolConfig {
            function_calling_config: FunctionCallingConfig::from(choice),
        });

        GeminiRequest {
            contents,
            system_instruction: (!system_parts.is_empty()).then(|| GeminiContent {
                role: None,
                parts: system_parts,
            }),
            generation_config: Some(generation_config),
            tools,
            tool_config,
        }
    }
}

fn user_parts(message: ChatMessage) -> Vec<GeminiPart> {
    match message.content {
        None => Vec::new(),
        Some(MessageContent::Text(text)) => vec![GeminiPart::text(text)],
        Some(MessageContent::Parts(parts)) => parts
            .into_iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(GeminiPart::text(text)),
                ContentPart::ImageUrl { image_url } => match parse_data_url(&image_url.url) {
                    Some(inline_data) => Some(GeminiPart {
                        inline_data: Some(inline_data),
                        ..Default::default()
                    }),
                    None => {
                        log::warn!("Dropping remote image for Gemini, only data URLs are inlined");
                        None
                    }
                },
            })
            .collect(),
    }
}

fn model_parts(message: ChatMessage, tool_names: &mut HashMap<String, String>) -> Vec<GeminiPart> {
    let mut parts = Vec::new();
    let text = message.text_content();

    if !text.is_empty() {
        parts.push(GeminiPart::text(text));
    }

    for call in message.tool_calls.into_iter().flatten() {
        let args = serde_json::from_str(&call.function.arguments).unwrap_or_else(|_| Value::Object(Map::new()));
        tool_names.insert(call.id, call.function.name.clone());

        parts.push(GeminiPart {
            function_call: Some(GeminiFunctionCall {
                name: call.function.name,
                args,
            }),
            ..Default::default()
        });
    }

    parts
}

/// Gemini keys function responses by name, so the name is recovered from the
/// assistant turn that issued the call.
fn function_response(message: ChatMessage, tool_names: &HashMap<String, String>) -> GeminiPart {
    let text = message.text_content();
    let call_id = message.tool_call_id.unwrap_or_default();

    let name = tool_names
        .get(&call_id)
        .cloned()
        .unwrap_or_else(|| function_name_from_call_id(&call_id).to_string());

    let response = match serde_json::from_str::<Value>(&text) {
        Ok(value @ Value::Object(_)) => value,
        _ => serde_json::json!({ "content": text }),
    };

    GeminiPart {
        function_response: Some(GeminiFunctionResponse { name, response }),
        ..Default::default()
    }
}

/// Recovers `name` from a `call_<name>_<n>` id minted by [`call_id`].
fn function_name_from_call_id(call_id: &str) -> &str {
    let name = call_id.strip_prefix("call_").unwrap_or(call_id);

    match name.rsplit_once('_') {
        Some((name, sequence)) if !name.is_empty() && sequence.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => name,
    }
}

/// Gemini function calls carry no id. The position keeps repeated calls of
/// one function apart.
fn call_id(name: &str, position: u32) -> String {
    format!("call_{name}_{position}")
}

fn parse_data_url(url: &str) -> Option<InlineData> {
    let rest = url.strip_prefix("data:")?;
    let (mime_type, data) = rest.split_once(";base64,")?;

    Some(InlineData {
        mime_type: mime_type.to_string(),
        data: data.to_string(),
    })
}

impl From<Tool> for FunctionDeclaration {
    fn from(tool: Tool) -> Self {
        let parameters = match tool.function.parameters {
            Value::Null => None,
            schema => Some(strip_unsupported_schema_fields(schema)),
        };

        FunctionDeclaration {
            name: tool.function.name,
            description: tool.function.description,
            parameters,
        }
    }
}

/// Gemini rejects `$schema`, `additionalProperties` and `default`, at any depth.
fn strip_unsupported_schema_fields(schema: Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(key, _)| !matches!(key.as_str(), "$schema" | "additionalProperties" | "default"))
                .map(|(key, value)| (key, strip_unsupported_schema_fields(value)))
                .collect(),
        ),
        Value::Array(values) => Value::Array(values.into_iter().map(strip_unsupported_schema_fields).collect()),
        other => other,
    }
}

impl From<ToolChoice> for FunctionCallingConfig {
    fn from(choice: ToolChoice) -> Self {
        match choice {
            ToolChoice::Mode(ToolChoiceMode::Auto) => FunctionCallingConfig {
                mode: FunctionCallingMode::Auto,
                allowed_function_names: None,
            },
            ToolChoice::Mode(ToolChoiceMode::Required) => FunctionCallingConfig {
                mode: FunctionCallingMode::Any,
                allowed_function_names: None,
            },
            ToolChoice::Mode(ToolChoiceMode::None) => FunctionCallingConfig {
                mode: FunctionCallingMode::None,
                allowed_function_names: None,
            },
            ToolChoice::Named(named) => FunctionCallingConfig {
                mode: FunctionCallingMode::Any,
                allowed_function_names: Some(vec![named.function.name]),
            },
        }
    }
}

/// Maps a Gemini finish reason. Responses carrying function calls always
/// finish with `tool_calls`.
fn finish_reason(reason: &str, has_tool_calls: bool) -> FinishReason {
    if has_tool_calls {
        return FinishReason::ToolCalls;
    }

    match reason {
        "MAX_TOKENS" => FinishReason::Length,
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

impl From<UsageMetadata> for Usage {
    fn from(usage: UsageMetadata) -> Self {
        Usage {
            prompt_tokens: usage.prompt_token_count,
            completion_tokens: usage.candidates_token_count,
            total_tokens: usage.total_token_count,
        }
    }
}

struct CandidateParts {
    text: String,
    reasoning: String,
    calls: Vec<GeminiFunctionCall>,
}

fn split_parts(content: Option<GeminiContent>) -> CandidateParts {
    let mut parts = CandidateParts {
        text: String::new(),
        reasoning: String::new(),
        calls: Vec::new(),
    };

    for part in content.map(|c| c.parts).unwrap_or_default() {
        if let Some(call) = part.function_call {
            parts.calls.push(call);
        } else if let Some(text) = part.text {
            if part.thought == Some(true) {
                parts.reasoning.push_str(&text);
            } else {
                parts.text.push_str(&text);
            }
        }
    }

    parts
}

/// Converts a `generateContent` response.
pub fn gemini_to_openai(response: GeminiResponse, model: &str) -> ChatCompletionResponse {
    let usage = response.usage_metadata.map(Usage::from);
    let id = response.response_id.unwrap_or_else(|| format!("chatcmpl-{}", id::unix_millis()));

    let choices = response
        .candidates
        .into_iter()
        .take(1)
        .map(|candidate| {
            let parts = split_parts(candidate.content);
            let has_tool_calls = !parts.calls.is_empty();

            let tool_calls: Vec<ToolCall> = parts
                .calls
                .into_iter()
                .zip(0u32..)
                .map(|(call, position)| ToolCall {
                    id: call_id(&call.name, position),
                    r#type: ToolType::Function,
                    function: FunctionCall {
                        name: call.name,
                        arguments: call.args.to_string(),
                    },
                })
                .collect();

            Choice {
                index: candidate.index,
                message: ChatMessage {
                    role: ChatRole::Assistant,
                    content: (!parts.text.is_empty() || !has_tool_calls).then_some(MessageContent::Text(parts.text)),
                    tool_calls: has_tool_calls.then_some(tool_calls),
                    tool_call_id: None,
                    reasoning_content: (!parts.reasoning.is_empty()).then_some(parts.reasoning),
                },
                finish_reason: Some(finish_reason(
                    candidate.finish_reason.as_deref().unwrap_or("STOP"),
                    has_tool_calls,
                )),
            }
        })
        .collect();

    ChatCompletionResponse {
        id,
        object: "chat.completion".to_string(),
        created: id::unix_seconds(),
        model: model.to_string(),
        choices,
        usage,
    }
}

/// Maps `streamGenerateContent` events onto OpenAI chunks.
///
/// Parallel function calls may arrive in separate events, so tool-call
/// indices keep counting across the whole stream.
#[derive(Debug)]
pub struct GeminiChunkMapper {
    model: String,
    next_tool_index: u32,
}

impl GeminiChunkMapper {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            next_tool_index: 0,
        }
    }

    pub fn map(&mut self, response: GeminiResponse) -> ChatCompletionChunk {
        let usage = response.usage_metadata.map(Usage::from);

        let choices: Vec<ChunkChoice> = response
            .candidates
            .into_iter()
            .take(1)
            .map(|candidate| {
                let parts = split_parts(candidate.content);
                let has_tool_calls = !parts.calls.is_empty();

                let tool_calls: Vec<ToolCallDelta> = parts
                    .calls
                    .into_iter()
                    .map(|call| {
                        let index = self.next_tool_index;
                        self.next_tool_index += 1;

                        ToolCallDelta {
                            index,
                            id: Some(call_id(&call.name, index)),
                            r#type: Some(ToolType::Function),
                            function: Some(FunctionDelta {
                                name: Some(call.name),
                                arguments: Some(call.args.to_string()),
                            }),
                        }
                    })
                    .collect();

                ChunkChoice {
                    index: candidate.index,
                    delta: ChunkDelta {
                        role: Some(ChatRole::Assistant),
                        content: (!parts.text.is_empty()).then_some(parts.text),
                        reasoning_content: (!parts.reasoning.is_empty()).then_some(parts.reasoning),
                        thinking: None,
                        tool_calls: has_tool_calls.then_some(tool_calls),
                    },
                    finish_reason: candidate
                        .finish_reason
                        .as_deref()
                        .map(|reason| finish_reason(reason, has_tool_calls || self.next_tool_index > 0)),
                }
            })
            .collect();

        let finished = choices.iter().any(|choice| choice.finish_reason.is_some());

        ChatCompletionChunk {
            id: response.response_id.unwrap_or_default(),
            object: "chat.completion.chunk".to_string(),
            created: id::unix_seconds(),
            model: self.model.clone(),
            choices,
            usage: usage.filter(|_| finished),
        }
    }
}
