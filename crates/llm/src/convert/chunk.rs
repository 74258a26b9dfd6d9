use crate::messages::{
    claude::{BlockDelta, ClaudeContent, ClaudeStreamEvent, ClaudeUsage, MessageDeltaBody, empty_object},
    openai::ChatCompletionChunk,
};

/// Maps one OpenAI chunk to at most one Claude event, without memory of
/// earlier chunks. Text wins over tool calls, tool calls over the finish
/// reason. Chunks carrying none of them yield `None`.
///
/// Tool-call arguments are not merged across chunks here; callers needing
/// that use [`crate::relay::StreamRelay`].
pub fn chunk_to_claude_event(chunk: &ChatCompletionChunk) -> Option<ClaudeStreamEvent> {
    let choice = chunk.choices.first()?;

    if let Some(text) = choice.delta.content.as_deref().filter(|text| !text.is_empty()) {
        return Some(ClaudeStreamEvent::ContentBlockDelta {
            index: 0,
            delta: BlockDelta::TextDelta { text: text.to_string() },
        });
    }

    for call in choice.delta.tool_calls.iter().flatten() {
        let Some(function) = &call.function else {
            continue;
        };

        if let Some(name) = function.name.as_deref().filter(|name| !name.is_empty()) {
            return Some(ClaudeStreamEvent::ContentBlockStart {
                index: call.index,
                content_block: ClaudeContent::ToolUse {
                    id: call.id.clone().unwrap_or_default(),
                    name: name.to_string(),
                    input: empty_object(),
                },
            });
        }

        if let Some(arguments) = function.arguments.as_deref().filter(|args| !args.is_empty()) {
            return Some(ClaudeStreamEvent::ContentBlockDelta {
                index: call.index,
                delta: BlockDelta::InputJsonDelta {
                    partial_json: arguments.to_string(),
                },
            });
        }
    }

    let finish_reason = choice.finish_reason.as_ref()?;

    Some(ClaudeStreamEvent::MessageDelta {
        delta: MessageDeltaBody {
            stop_reason: Some(super::stop_reason(Some(finish_reason))),
            stop_sequence: None,
        },
        usage: chunk
            .usage
            .map(|usage| ClaudeUsage::new(usage.prompt_tokens, usage.completion_tokens))
            .unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use insta::assert_json_snapshot;
    use serde_json::json;

    use super::chunk_to_claude_event;
    use crate::messages::openai::ChatCompletionChunk;

    fn chunk(value: serde_json::Value) -> ChatCompletionChunk {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn text_delta() {
        let event = chunk_to_claude_event(&chunk(json!({
            "choices": [{"index": 0, "delta": {"content": "Hel"}}]
        })));

        assert_json_snapshot!(event, @r#"
        {
          "type": "content_block_delta",
          "index": 0,
          "delta": {
            "type": "text_delta",
            "text": "Hel"
          }
        }
        "#);
    }

    #[test]
    fn named_tool_call_starts_a_block() {
        let event = chunk_to_claude_event(&chunk(json!({
            "choices": [{"index": 0, "delta": {"tool_calls": [
                {"index": 1, "id": "call_9", "function": {"name": "lookup", "arguments": ""}}
            ]}}]
        })));

        assert_json_snapshot!(event, @r#"
        {
          "type": "content_block_start",
          "index": 1,
          "content_block": {
            "type": "tool_use",
            "id": "call_9",
            "name": "lookup",
            "input": {}
          }
        }
        "#);
    }

    #[test]
    fn finish_without_usage_reports_zero() {
        let event = chunk_to_claude_event(&chunk(json!({
            "choices": [{"index": 0, "delta": {}, "finish_reason": "length"}]
        })));

        assert_json_snapshot!(event, @r#"
        {
          "type": "message_delta",
          "delta": {
            "stop_reason": "max_tokens",
            "stop_sequence": null
          },
          "usage": {
            "input_tokens": 0,
            "output_tokens": 0
          }
        }
        "#);
    }

    #[test]
    fn empty_chunk_yields_nothing() {
        assert!(chunk_to_claude_event(&chunk(json!({"choices": []}))).is_none());
        assert!(chunk_to_claude_event(&chunk(json!({"choices": [{"delta": {"content": ""}}]}))).is_none());
    }
}
