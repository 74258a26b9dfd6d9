use crate::{
    convert::chunk_to_claude_event,
    id::message_id,
    messages::{
        claude::{BlockDelta, ClaudeContent, ClaudeStreamEvent, ClaudeUsage, MessageDeltaBody, StopReason, StreamMessage},
        openai::ChatCompletionChunk,
    },
    relay::driver::FragmentHandler,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    Text,
    Thinking,
    /// Tool call keyed by its upstream index.
    Tool(u32),
}

#[derive(Debug, Clone, Copy)]
struct OpenBlock {
    index: u32,
    block: Block,
}

/// Chunk-by-chunk translation for tool-less conversations.
///
/// Each chunk is mapped on its own by [`chunk_to_claude_event`]. The relay
/// only renumbers blocks so that one block is open at a time and indices
/// grow; it never merges tool-call arguments across blocks.
#[derive(Debug)]
pub struct PerChunkRelay {
    model: String,
    prompt_tokens: u32,
    started: bool,
    closed: bool,
    next_index: u32,
    open: Option<OpenBlock>,
    usage: Option<ClaudeUsage>,
}

impl PerChunkRelay {
    pub fn new(model: impl Into<String>, prompt_tokens: u32) -> Self {
        Self {
            model: model.into(),
            prompt_tokens,
            started: false,
            closed: false,
            next_index: 0,
            open: None,
            usage: None,
        }
    }

    fn start(&mut self, out: &mut Vec<ClaudeStreamEvent>) {
        let message = StreamMessage::new(message_id(), self.model.clone(), ClaudeUsage::new(self.prompt_tokens, 1));

        out.push(ClaudeStreamEvent::MessageStart { message });
        self.started = true;
    }

    fn open_block(&mut self, block: Block, content_block: ClaudeContent, out: &mut Vec<ClaudeStreamEvent>) -> u32 {
        self.close_block(out);

        let index = self.next_index;
        self.next_index += 1;

        out.push(ClaudeStreamEvent::ContentBlockStart { index, content_block });
        self.open = Some(OpenBlock { index, block });

        index
    }

    fn ensure_block(&mut self, block: Block, content_block: ClaudeContent, out: &mut Vec<ClaudeStreamEvent>) -> u32 {
        match self.open.filter(|open| open.block == block) {
            Some(open) => open.index,
            None => self.open_block(block, content_block, out),
        }
    }

    fn close_block(&mut self, out: &mut Vec<ClaudeStreamEvent>) {
        if let Some(open) = self.open.take() {
            out.push(ClaudeStreamEvent::ContentBlockStop { index: open.index });
        }
    }

    fn on_reasoning(&mut self, chunk: &ChatCompletionChunk, out: &mut Vec<ClaudeStreamEvent>) {
        let Some(delta) = chunk.choices.first().map(|choice| &choice.delta) else {
            return;
        };

        let thinking = delta
            .reasoning_content
            .as_deref()
            .or_else(|| delta.thinking.as_ref().and_then(|t| t.content.as_deref()))
            .filter(|text| !text.is_empty());
        let signature = delta
            .thinking
            .as_ref()
            .and_then(|t| t.signature.as_deref())
            .filter(|signature| !signature.is_empty());

        if thinking.is_none() && signature.is_none() {
            return;
        }

        let block = ClaudeContent::Thinking {
            thinking: String::new(),
            signature: None,
        };
        let index = self.ensure_block(Block::Thinking, block, out);

        if let Some(thinking) = thinking {
            out.push(ClaudeStreamEvent::ContentBlockDelta {
                index,
                delta: BlockDelta::ThinkingDelta {
                    thinking: thinking.to_string(),
                },
            });
        }

        if let Some(signature) = signature {
            out.push(ClaudeStreamEvent::ContentBlockDelta {
                index,
                delta: BlockDelta::SignatureDelta {
                    signature: signature.to_string(),
                },
            });

            self.close_block(out);
        }
    }

    fn finish(&mut self, delta: MessageDeltaBody, usage: ClaudeUsage, out: &mut Vec<ClaudeStreamEvent>) {
        self.close_block(out);

        out.push(ClaudeStreamEvent::MessageDelta {
            delta,
            usage: usage.clone(),
        });
        out.push(ClaudeStreamEvent::MessageStop);

        self.usage = Some(usage);
        self.closed = true;
    }
}

impl FragmentHandler for PerChunkRelay {
    type Fragment = ChatCompletionChunk;

    fn on_fragment(&mut self, fragment: ChatCompletionChunk, out: &mut Vec<ClaudeStreamEvent>) {
        if self.closed {
            return;
        }

        if !self.started {
            self.start(out);
        }

        self.on_reasoning(&fragment, out);

        match chunk_to_claude_event(&fragment) {
            Some(ClaudeStreamEvent::ContentBlockDelta {
                delta: delta @ BlockDelta::TextDelta { .. },
                ..
            }) => {
                let index = self.ensure_block(Block::Text, ClaudeContent::text(""), out);
                out.push(ClaudeStreamEvent::ContentBlockDelta { index, delta });
            }
            Some(ClaudeStreamEvent::ContentBlockStart {
                index: upstream,
                content_block,
            }) => {
                self.open_block(Block::Tool(upstream), content_block, out);
            }
            Some(ClaudeStreamEvent::ContentBlockDelta { index: upstream, delta }) => {
                match self.open.filter(|open| open.block == Block::Tool(upstream)) {
                    Some(open) => out.push(ClaudeStreamEvent::ContentBlockDelta {
                        index: open.index,
                        delta,
                    }),
                    None => log::debug!("Dropping arguments of tool call {upstream} outside its block"),
                }
            }
            Some(ClaudeStreamEvent::MessageDelta { delta, usage }) => self.finish(delta, usage, out),
            Some(event) => out.push(event),
            None => (),
        }
    }

    fn on_end(&mut self, out: &mut Vec<ClaudeStreamEvent>) {
        if self.closed {
            return;
        }

        if !self.started {
            self.start(out);
        }

        let delta = MessageDeltaBody {
            stop_reason: Some(StopReason::EndTurn),
            stop_sequence: None,
        };

        self.finish(delta, ClaudeUsage::default(), out);
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn usage(&self) -> Option<ClaudeUsage> {
        self.usage.clone()
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_json_snapshot;
    use serde_json::json;

    use super::PerChunkRelay;
    use crate::{
        messages::{
            claude::{ClaudeStreamEvent, ClaudeUsage},
            openai::ChatCompletionChunk,
        },
        relay::driver::FragmentHandler,
    };

    fn chunk(value: serde_json::Value) -> ChatCompletionChunk {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn text_stream_with_finish() {
        let mut relay = PerChunkRelay::new("qwen-plus", 5);
        let mut out = Vec::new();

        relay.on_fragment(chunk(json!({"choices": [{"delta": {"role": "assistant", "content": ""}}]})), &mut out);
        relay.on_fragment(chunk(json!({"choices": [{"delta": {"content": "Hi"}}]})), &mut out);
        relay.on_fragment(
            chunk(json!({
                "choices": [{"delta": {}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 5, "completion_tokens": 1, "total_tokens": 6}
            })),
            &mut out,
        );

        assert!(relay.is_closed());
        assert_eq!(relay.usage(), Some(ClaudeUsage::new(5, 1)));

        assert_json_snapshot!(&out[1..], @r#"
        [
          {
            "type": "content_block_start",
            "index": 0,
            "content_block": {
              "type": "text",
              "text": ""
            }
          },
          {
            "type": "content_block_delta",
            "index": 0,
            "delta": {
              "type": "text_delta",
              "text": "Hi"
            }
          },
          {
            "type": "content_block_stop",
            "index": 0
          },
          {
            "type": "message_delta",
            "delta": {
              "stop_reason": "end_turn",
              "stop_sequence": null
            },
            "usage": {
              "input_tokens": 5,
              "output_tokens": 1
            }
          },
          {
            "type": "message_stop"
          }
        ]
        "#);
    }

    #[test]
    fn end_without_finish_still_closes() {
        let mut relay = PerChunkRelay::new("qwen-plus", 5);
        let mut out = Vec::new();

        relay.on_fragment(chunk(json!({"choices": [{"delta": {"content": "Hi"}}]})), &mut out);
        relay.on_end(&mut out);
        relay.on_end(&mut out);

        let names: Vec<_> = out.iter().map(ClaudeStreamEvent::event_name).collect();

        assert_eq!(
            names,
            [
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
    }

    #[test]
    fn tool_call_closes_the_text_block() {
        let mut relay = PerChunkRelay::new("qwen-plus", 5);
        let mut out = Vec::new();

        relay.on_fragment(chunk(json!({"choices": [{"delta": {"content": "Checking"}}]})), &mut out);
        relay.on_fragment(
            chunk(json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_1", "function": {"name": "lookup", "arguments": ""}}
            ]}}]})),
            &mut out,
        );
        relay.on_fragment(
            chunk(json!({"choices": [{"delta": {"tool_calls": [{"index": 0, "function": {"arguments": "{}"}}]}}]})),
            &mut out,
        );
        relay.on_end(&mut out);

        let names: Vec<_> = out
            .iter()
            .map(|event| match event {
                ClaudeStreamEvent::ContentBlockStart { index, .. } => format!("start {index}"),
                ClaudeStreamEvent::ContentBlockDelta { index, .. } => format!("delta {index}"),
                ClaudeStreamEvent::ContentBlockStop { index } => format!("stop {index}"),
                other => other.event_name().to_string(),
            })
            .collect();

        assert_eq!(
            names,
            [
                "message_start",
                "start 0",
                "delta 0",
                "stop 0",
                "start 1",
                "delta 1",
                "stop 1",
                "message_delta",
                "message_stop",
            ]
        );
    }

    #[test]
    fn reasoning_opens_a_thinking_block() {
        let mut relay = PerChunkRelay::new("qwen-plus", 5);
        let mut out = Vec::new();

        relay.on_fragment(chunk(json!({"choices": [{"delta": {"reasoning_content": "Hmm"}}]})), &mut out);
        relay.on_fragment(chunk(json!({"choices": [{"delta": {"content": "Hi"}}]})), &mut out);
        relay.on_end(&mut out);

        assert_json_snapshot!(&out[1..5], @r#"
        [
          {
            "type": "content_block_start",
            "index": 0,
            "content_block": {
              "type": "thinking",
              "thinking": ""
            }
          },
          {
            "type": "content_block_delta",
            "index": 0,
            "delta": {
              "type": "thinking_delta",
              "thinking": "Hmm"
            }
          },
          {
            "type": "content_block_stop",
            "index": 0
          },
          {
            "type": "content_block_start",
            "index": 1,
            "content_block": {
              "type": "text",
              "text": ""
            }
          }
        ]
        "#);
    }
}
