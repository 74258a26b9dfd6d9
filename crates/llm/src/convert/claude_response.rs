use serde_json::Value;

use crate::{
    messages::{
        claude::{ClaudeContent, ClaudeResponse, ClaudeRole, ClaudeUsage, empty_object},
        openai::{ChatCompletionResponse, ContentPart, FinishReason, MessageContent},
    },
    token_counter,
};

const TRUNCATION_NOTICE: &str = "[Response truncated due to token limit]";

/// Converts a non-streaming OpenAI response into a Claude message.
pub fn openai_to_claude(response: ChatCompletionResponse) -> ClaudeResponse {
    let estimated_output = token_counter::estimate_completion(&response);
    let usage = response.usage;

    let Some(choice) = response.choices.into_iter().next() else {
        return ClaudeResponse {
            id: format!("msg_{}", response.id),
            r#type: "message".to_string(),
            role: ClaudeRole::Assistant,
            content: Vec::new(),
            model: response.model,
            stop_reason: Some(super::stop_reason(None)),
            stop_sequence: None,
            usage: ClaudeUsage::new(usage.map(|u| u.prompt_tokens).unwrap_or_default(), 0),
        };
    };

    let mut content = Vec::new();

    let text_is_empty = choice.message.text_content().is_empty();

    if choice.finish_reason == Some(FinishReason::Length) && text_is_empty {
        content.push(ClaudeContent::text(TRUNCATION_NOTICE));
    } else {
        match choice.message.content {
            Some(MessageContent::Text(text)) if !text.is_empty() => content.push(ClaudeContent::text(text)),
            Some(MessageContent::Parts(parts)) => {
                for part in parts {
                    if let ContentPart::Text { text } = part
                        && !text.is_empty()
                    {
                        content.push(ClaudeContent::text(text));
                    }
                }
            }
            _ => (),
        }
    }

    for call in choice.message.tool_calls.into_iter().flatten() {
        content.push(ClaudeContent::ToolUse {
            id: call.id,
            input: parse_arguments(&call.function.name, &call.function.arguments),
            name: call.function.name,
        });
    }

    let output_tokens = match usage {
        Some(usage) if usage.completion_tokens > 0 => usage.completion_tokens,
        _ => estimated_output,
    };

    ClaudeResponse {
        id: format!("msg_{}", response.id),
        r#type: "message".to_string(),
        role: ClaudeRole::Assistant,
        content,
        model: response.model,
        stop_reason: Some(super::stop_reason(choice.finish_reason.as_ref())),
        stop_sequence: None,
        usage: ClaudeUsage::new(usage.map(|u| u.prompt_tokens).unwrap_or_default(), output_tokens),
    }
}

fn parse_arguments(name: &str, arguments: &str) -> Value {
    if arguments.trim().is_empty() {
        return empty_object();
    }

    serde_json::from_str(arguments).unwrap_or_else(|e| {
        log::error!("Failed to parse arguments of tool call '{name}': {e}");
        empty_object()
    })
}

#[cfg(test)]
mod tests {
    use insta::assert_json_snapshot;
    use serde_json::json;

    use super::openai_to_claude;
    use crate::{
        messages::{
            claude::{ClaudeContent, ClaudeRequest},
            openai::{ChatCompletionRequest, ChatCompletionResponse},
        },
        token_counter,
    };

    fn response(value: serde_json::Value) -> ChatCompletionResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn text_response() {
        let converted = openai_to_claude(response(json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hi!"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 9, "completion_tokens": 3, "total_tokens": 12}
        })));

        assert_json_snapshot!(converted, @r#"
        {
          "id": "msg_chatcmpl-1",
          "type": "message",
          "role": "assistant",
          "content": [
            {
              "type": "text",
              "text": "Hi!"
            }
          ],
          "model": "gpt-4o",
          "stop_reason": "end_turn",
          "stop_sequence": null,
          "usage": {
            "input_tokens": 9,
            "output_tokens": 3
          }
        }
        "#);
    }

    #[test]
    fn truncated_empty_response_gets_a_notice() {
        let converted = openai_to_claude(response(json!({
            "id": "c2",
            "model": "gpt-4o",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": ""}, "finish_reason": "length"}],
            "usage": {"prompt_tokens": 9, "completion_tokens": 100, "total_tokens": 109}
        })));

        assert_json_snapshot!(converted.content, @r#"
        [
          {
            "type": "text",
            "text": "[Response truncated due to token limit]"
          }
        ]
        "#);
        assert_eq!(converted.stop_reason.unwrap(), crate::messages::claude::StopReason::MaxTokens);
    }

    #[test]
    fn broken_tool_arguments_become_an_empty_object() {
        let converted = openai_to_claude(response(json!({
            "id": "c3",
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{"id": "call_1", "type": "function", "function": {"name": "lookup", "arguments": "{\"q\":"}}]
                },
                "finish_reason": "tool_calls"
            }]
        })));

        assert_json_snapshot!(converted.content, @r#"
        [
          {
            "type": "tool_use",
            "id": "call_1",
            "name": "lookup",
            "input": {}
          }
        ]
        "#);
    }

    #[test]
    fn missing_usage_is_estimated_from_text_and_tool_calls() {
        let converted = openai_to_claude(response(json!({
            "id": "c4",
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "Looking it up.",
                    "tool_calls": [{"id": "call_1", "type": "function", "function": {"name": "lookup", "arguments": "{\"q\":\"x\"}"}}]
                },
                "finish_reason": "tool_calls"
            }]
        })));

        let expected = token_counter::estimate("Looking it up.") + token_counter::estimate("tool_use:lookup:{\"q\":\"x\"}");

        assert_eq!(converted.usage.input_tokens, 0);
        assert_eq!(converted.usage.output_tokens, expected);
    }

    #[test]
    fn tool_use_survives_a_round_trip() {
        let request: ClaudeRequest = serde_json::from_value(json!({
            "model": "m",
            "max_tokens": 10,
            "messages": [{"role": "assistant", "content": [
                {"type": "tool_use", "id": "t1", "name": "lookup", "input": {"q": "x", "n": [1, 2]}}
            ]}]
        }))
        .unwrap();

        let converted = ChatCompletionRequest::try_from(request).unwrap();
        let message = converted.messages.into_iter().next().unwrap();

        let back = openai_to_claude(ChatCompletionResponse {
            id: "r".to_string(),
            object: "chat.completion".to_string(),
            created: 0,
            model: "m".to_string(),
            choices: vec![crate::messages::openai::Choice {
                index: 0,
                message,
                finish_reason: None,
            }],
            usage: None,
        });

        assert_eq!(
            back.content,
            vec![ClaudeContent::ToolUse {
                id: "t1".to_string(),
                name: "lookup".to_string(),
                input: json!({"q": "x", "n": [1, 2]}),
            }]
        );
    }
}
