use std::collections::HashSet;

use serde_json::Value;

use crate::{
    error::LlmError,
    id,
    messages::{
        claude::{
            ClaudeContent, ClaudeImageSource, ClaudeMessage, ClaudeMessageContent, ClaudeRequest, ClaudeRole,
            ClaudeTool, ClaudeToolChoice,
        },
        openai::{
            ChatCompletionRequest, ChatMessage, ChatRole, ContentPart, FunctionCall, FunctionDefinition, ImageUrl,
            MessageContent, NamedFunction, NamedToolChoice, Tool, ToolCall, ToolChoice, ToolChoiceMode, ToolType,
        },
    },
};

impl TryFrom<ClaudeRequest> for ChatCompletionRequest {
    type Error = LlmError;

    fn try_from(request: ClaudeRequest) -> Result<Self, Self::Error> {
        validate(&request)?;

        let mut messages = Vec::with_capacity(request.messages.len() + 1);

        if let Some(system) = &request.system {
            for text in system.texts() {
                messages.push(ChatMessage::text(ChatRole::System, text));
            }
        }

        let mut tool_use_ids = HashSet::new();

        for message in request.messages {
            convert_message(message, &mut tool_use_ids, &mut messages);
        }

        let tools: Option<Vec<Tool>> = request
            .tools
            .filter(|tools| !tools.is_empty())
            .map(|tools| tools.into_iter().map(Tool::from).collect());

        let (tool_choice, parallel_tool_calls) = match (&tools, request.tool_choice) {
            (Some(_), Some(choice)) => {
                let parallel = choice.disable_parallel_tool_use().map(|disabled| !disabled);
                (Some(ToolChoice::from(choice)), parallel)
            }
            _ => (None, None),
        };

        Ok(ChatCompletionRequest {
            model: request.model,
            messages,
            max_tokens: Some(request.max_tokens),
            temperature: request.temperature,
            top_p: request.top_p,
            stop: request.stop_sequences.filter(|stop| !stop.is_empty()),
            tools,
            tool_choice,
            parallel_tool_calls,
            stream: request.stream.unwrap_or(false),
        })
    }
}

/// Checks the fields every backend requires of a Claude request.
pub(crate) fn validate(request: &ClaudeRequest) -> Result<(), LlmError> {
    if request.messages.is_empty() {
        return Err(LlmError::InvalidRequest("messages cannot be empty".to_string()));
    }

    if request.max_tokens == 0 {
        return Err(LlmError::InvalidRequest("max_tokens must be positive".to_string()));
    }

    Ok(())
}

fn convert_message(message: ClaudeMessage, tool_use_ids: &mut HashSet<String>, out: &mut Vec<ChatMessage>) {
    let role = match message.role {
        ClaudeRole::User => ChatRole::User,
        ClaudeRole::Assistant => ChatRole::Assistant,
    };

    let blocks = match message.content {
        ClaudeMessageContent::Text(text) => {
            out.push(ChatMessage::text(role, text));
            return;
        }
        ClaudeMessageContent::Blocks(blocks) => blocks,
    };

    match message.role {
        ClaudeRole::User => convert_user_blocks(blocks, tool_use_ids, out),
        ClaudeRole::Assistant => convert_assistant_blocks(blocks, tool_use_ids, out),
    }
}

/// Tool results become tool messages ahead of a single user message holding
/// every text and image part.
fn convert_user_blocks(blocks: Vec<ClaudeContent>, tool_use_ids: &HashSet<String>, out: &mut Vec<ChatMessage>) {
    let mut parts = Vec::new();

    for block in blocks {
        match block {
            ClaudeContent::ToolResult {
                tool_use_id, content, ..
            } => {
                if !tool_use_ids.contains(&tool_use_id) {
                    log::warn!("Tool result references unknown tool use id '{tool_use_id}'");
                }

                out.push(ChatMessage {
                    role: ChatRole::Tool,
                    content: Some(MessageContent::Text(stringify_tool_result(content))),
                    tool_calls: None,
                    tool_call_id: Some(tool_use_id),
                    reasoning_content: None,
                });
            }
            ClaudeContent::Text { text, .. } => parts.push(ContentPart::Text { text }),
            ClaudeContent::Image { source } => parts.push(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: image_url(source),
                    detail: None,
                },
            }),
            _ => (),
        }
    }

    if !parts.is_empty() {
        out.push(ChatMessage {
            role: ChatRole::User,
            content: Some(MessageContent::Parts(parts)),
            tool_calls: None,
            tool_call_id: None,
            reasoning_content: None,
        });
    }
}

/// Each text becomes its own assistant message, then every tool use is merged
/// into one assistant message with null content.
fn convert_assistant_blocks(blocks: Vec<ClaudeContent>, tool_use_ids: &mut HashSet<String>, out: &mut Vec<ChatMessage>) {
    let mut tool_calls = Vec::new();

    for block in blocks {
        match block {
            ClaudeContent::Text { text, .. } => out.push(ChatMessage::text(ChatRole::Assistant, text)),
            ClaudeContent::ToolUse { id, name, input } => {
                if name.is_empty() {
                    log::warn!("Skipping tool use without a name (id '{id}')");
                    continue;
                }

                let id = if id.is_empty() { id::tool_call_id() } else { id };
                tool_use_ids.insert(id.clone());

                tool_calls.push(ToolCall {
                    id,
                    r#type: ToolType::Function,
                    function: FunctionCall {
                        name,
                        arguments: input.to_string(),
                    },
                });
            }
            _ => (),
        }
    }

    if !tool_calls.is_empty() {
        out.push(ChatMessage {
            role: ChatRole::Assistant,
            content: None,
            tool_calls: Some(tool_calls),
            tool_call_id: None,
            reasoning_content: None,
        });
    }
}

fn stringify_tool_result(content: Value) -> String {
    match content {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn image_url(source: ClaudeImageSource) -> String {
    match source {
        ClaudeImageSource::Base64 { media_type, data } => format!("data:{media_type};base64,{data}"),
        ClaudeImageSource::Url { url } => url,
    }
}

impl From<ClaudeTool> for Tool {
    fn from(tool: ClaudeTool) -> Self {
        Tool {
            r#type: ToolType::Function,
            function: FunctionDefinition {
                name: tool.name,
                description: tool.description,
                parameters: tool.input_schema,
            },
        }
    }
}

impl From<ClaudeToolChoice> for ToolChoice {
    fn from(choice: ClaudeToolChoice) -> Self {
        match choice {
            ClaudeToolChoice::Auto { .. } => ToolChoice::Mode(ToolChoiceMode::Auto),
            ClaudeToolChoice::Any { .. } => ToolChoice::Mode(ToolChoiceMode::Required),
            ClaudeToolChoice::None => ToolChoice::Mode(ToolChoiceMode::None),
            ClaudeToolChoice::Tool { name, .. } => ToolChoice::Named(NamedToolChoice {
                r#type: ToolType::Function,
                function: NamedFunction { name },
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use insta::{assert_json_snapshot, assert_snapshot};
    use serde_json::json;

    use crate::messages::{claude::ClaudeRequest, openai::ChatCompletionRequest};

    fn convert(request: serde_json::Value) -> crate::Result<ChatCompletionRequest> {
        let request: ClaudeRequest = serde_json::from_value(request).unwrap();
        ChatCompletionRequest::try_from(request)
    }

    #[test]
    fn system_and_user_text() {
        let request = convert(json!({
            "model": "claude-3-5-sonnet",
            "max_tokens": 100,
            "system": "You are terse.",
            "messages": [{"role": "user", "content": "Hello"}]
        }))
        .unwrap();

        assert_json_snapshot!(request, @r#"
        {
          "model": "claude-3-5-sonnet",
          "messages": [
            {
              "role": "system",
              "content": "You are terse."
            },
            {
              "role": "user",
              "content": "Hello"
            }
          ],
          "max_tokens": 100
        }
        "#);
    }

    #[test]
    fn system_blocks_become_separate_messages() {
        let request = convert(json!({
            "model": "m",
            "max_tokens": 10,
            "system": [{"type": "text", "text": "first"}, {"type": "text", "text": "second"}],
            "messages": [{"role": "user", "content": "Hello"}]
        }))
        .unwrap();

        let roles: Vec<_> = request.messages.iter().map(|m| (m.role, m.text_content())).collect();

        assert_eq!(roles.len(), 3);
        assert_eq!(roles[0].1, "first");
        assert_eq!(roles[1].1, "second");
    }

    #[test]
    fn assistant_text_and_tool_use() {
        let request = convert(json!({
            "model": "m",
            "max_tokens": 10,
            "messages": [
                {"role": "user", "content": "find x"},
                {"role": "assistant", "content": [
                    {"type": "text", "text": "ok"},
                    {"type": "tool_use", "id": "t1", "name": "lookup", "input": {"q": "x"}}
                ]}
            ]
        }))
        .unwrap();

        assert_json_snapshot!(request.messages[1..], @r#"
        [
          {
            "role": "assistant",
            "content": "ok"
          },
          {
            "role": "assistant",
            "content": null,
            "tool_calls": [
              {
                "id": "t1",
                "type": "function",
                "function": {
                  "name": "lookup",
                  "arguments": "{\"q\":\"x\"}"
                }
              }
            ]
          }
        ]
        "#);
    }

    #[test]
    fn tool_results_precede_user_text() {
        let request = convert(json!({
            "model": "m",
            "max_tokens": 10,
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "t1", "name": "lookup", "input": {}}
                ]},
                {"role": "user", "content": [
                    {"type": "text", "text": "here you go"},
                    {"type": "tool_result", "tool_use_id": "t1", "content": [{"type": "text", "text": "42"}]}
                ]}
            ]
        }))
        .unwrap();

        assert_json_snapshot!(request.messages[1..], @r#"
        [
          {
            "role": "tool",
            "content": "[{\"text\":\"42\",\"type\":\"text\"}]",
            "tool_call_id": "t1"
          },
          {
            "role": "user",
            "content": [
              {
                "type": "text",
                "text": "here you go"
              }
            ]
          }
        ]
        "#);
    }

    #[test]
    fn nameless_tool_use_is_skipped_and_missing_id_is_minted() {
        let request = convert(json!({
            "model": "m",
            "max_tokens": 10,
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "t0", "input": {}},
                    {"type": "tool_use", "name": "lookup", "input": {}}
                ]}
            ]
        }))
        .unwrap();

        let calls = request.messages[0].tool_calls.as_ref().unwrap();

        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "lookup");
        assert!(calls[0].id.starts_with("call_"));
    }

    #[test]
    fn tools_and_choice() {
        let request = convert(json!({
            "model": "m",
            "max_tokens": 10,
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [{"name": "lookup", "description": "Look things up", "input_schema": {"type": "object"}}],
            "tool_choice": {"type": "any", "disable_parallel_tool_use": true}
        }))
        .unwrap();

        assert_json_snapshot!(request, @r#"
        {
          "model": "m",
          "messages": [
            {
              "role": "user",
              "content": "hi"
            }
          ],
          "max_tokens": 10,
          "tools": [
            {
              "type": "function",
              "function": {
                "name": "lookup",
                "description": "Look things up",
                "parameters": {
                  "type": "object"
                }
              }
            }
          ],
          "tool_choice": "required",
          "parallel_tool_calls": false
        }
        "#);
    }

    #[test]
    fn images_become_data_urls() {
        let request = convert(json!({
            "model": "m",
            "max_tokens": 10,
            "messages": [{"role": "user", "content": [
                {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "AAAA"}},
                {"type": "text", "text": "what is this?"}
            ]}]
        }))
        .unwrap();

        assert_json_snapshot!(request.messages[0].content, @r#"
        [
          {
            "type": "image_url",
            "image_url": {
              "url": "data:image/png;base64,AAAA"
            }
          },
          {
            "type": "text",
            "text": "what is this?"
          }
        ]
        "#);
    }

    #[test]
    fn empty_messages_are_rejected() {
        let error = convert(json!({"model": "m", "max_tokens": 10, "messages": []})).unwrap_err();
        assert_snapshot!(error.to_string(), @"Invalid request: messages cannot be empty");
    }

    #[test]
    fn missing_max_tokens_is_rejected() {
        let error = convert(json!({"model": "m", "messages": [{"role": "user", "content": "hi"}]})).unwrap_err();
        assert_snapshot!(error.to_string(), @"Invalid request: max_tokens must be positive");
    }
}
