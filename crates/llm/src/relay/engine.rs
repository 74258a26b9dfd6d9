use std::collections::{BTreeMap, HashSet, VecDeque};

use serde_json::Value;

use crate::{
    convert,
    id::{message_id, unix_millis},
    messages::{
        claude::{BlockDelta, ClaudeContent, ClaudeStreamEvent, ClaudeUsage, MessageDeltaBody, StopReason, StreamMessage, empty_object},
        openai::{ChatCompletionChunk, FinishReason, ToolCallDelta, Usage},
    },
    relay::driver::FragmentHandler,
    token_counter,
};

/// Lifecycle of one relayed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Nothing received yet, `message_start` not sent.
    Init,
    Streaming,
    /// Emitting the closing sequence.
    Finishing,
    /// Terminal. Further input is ignored.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Text,
    Thinking,
    /// Tool call keyed by its upstream index.
    ToolUse(u32),
}

#[derive(Debug, Clone, Copy)]
struct OpenBlock {
    index: u32,
    kind: BlockKind,
}

#[derive(Debug)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    /// Id and name were synthesized because the first delta lacked them.
    placeholder: bool,
    arguments: String,
    /// `content_block_start` was emitted.
    started: bool,
}

impl ToolCallAccumulator {
    /// The arguments form a complete JSON value.
    fn is_complete(&self) -> bool {
        let arguments = self.arguments.trim();
        arguments.starts_with('{') && arguments.ends_with('}') && serde_json::from_str::<Value>(arguments).is_ok()
    }
}

/// Turns an OpenAI chunk stream into a well-formed Claude event stream.
///
/// One instance per stream. Content block indices only grow, each block is
/// started once, receives its deltas and is stopped before the next one
/// starts. `message_delta` is always followed by `message_stop`.
///
/// A tool call that shows up while another one is still receiving arguments
/// is queued. Its block starts, with the buffered arguments, once the open
/// call's arguments are complete or the open block has to close.
#[derive(Debug)]
pub struct StreamRelay {
    model: String,
    prompt_tokens: u32,
    state: RelayState,
    next_index: u32,
    open: Option<OpenBlock>,
    text: String,
    tool_calls: BTreeMap<u32, ToolCallAccumulator>,
    /// Upstream indices of tool calls waiting for their block, in arrival order.
    queued: VecDeque<u32>,
    last_usage: Option<Usage>,
    reported_usage: Option<ClaudeUsage>,
}

impl StreamRelay {
    /// `model` is the name the client asked for, `prompt_tokens` the local
    /// estimate used when the upstream reports no usage.
    pub fn new(model: impl Into<String>, prompt_tokens: u32) -> Self {
        Self {
            model: model.into(),
            prompt_tokens,
            state: RelayState::Init,
            next_index: 0,
            open: None,
            text: String::new(),
            tool_calls: BTreeMap::new(),
            queued: VecDeque::new(),
            last_usage: None,
            reported_usage: None,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Usage reported in `message_delta`, once the stream closed cleanly.
    pub fn reported_usage(&self) -> Option<ClaudeUsage> {
        self.reported_usage.clone()
    }

    /// Accumulated arguments of the tool call with the given upstream index.
    pub fn tool_arguments(&self, upstream_index: u32) -> Option<&str> {
        self.tool_calls.get(&upstream_index).map(|call| call.arguments.as_str())
    }

    /// Feeds one upstream chunk, appending the resulting events to `out`.
    pub fn push(&mut self, chunk: ChatCompletionChunk, out: &mut Vec<ClaudeStreamEvent>) {
        if self.state == RelayState::Closed {
            return;
        }

        if self.state == RelayState::Init {
            self.start(out);
        }

        if chunk.usage.is_some() {
            self.last_usage = chunk.usage;
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return;
        };

        let delta = choice.delta;

        if let Some(reasoning) = delta.reasoning_content.as_deref() {
            self.on_thinking(Some(reasoning), None, out);
        }

        if let Some(thinking) = &delta.thinking {
            self.on_thinking(thinking.content.as_deref(), thinking.signature.as_deref(), out);
        }

        if let Some(text) = delta.content.as_deref().filter(|text| !text.is_empty()) {
            self.on_text(text, out);
        }

        let mut seen = HashSet::new();

        for call in delta.tool_calls.iter().flatten() {
            if !seen.insert(call.index) {
                log::debug!("Ignoring repeated delta for tool call {} in one chunk", call.index);
                continue;
            }

            self.on_tool_call(call, out);
        }

        if let Some(reason) = choice.finish_reason {
            self.on_finish(&reason, out);
        }
    }

    /// The upstream ended without a finish reason.
    pub fn end(&mut self, out: &mut Vec<ClaudeStreamEvent>) {
        match self.state {
            RelayState::Closed | RelayState::Finishing => (),
            RelayState::Init => {
                self.start(out);
                self.close_message(StopReason::EndTurn, out);
            }
            RelayState::Streaming => {
                log::debug!("Upstream ended without a finish reason, closing with end_turn");
                self.close_message(StopReason::EndTurn, out);
            }
        }
    }

    /// The consumer went away. Nothing more is emitted.
    pub fn close(&mut self) {
        self.state = RelayState::Closed;
    }

    fn start(&mut self, out: &mut Vec<ClaudeStreamEvent>) {
        let message = StreamMessage::new(message_id(), self.model.clone(), ClaudeUsage::new(self.prompt_tokens, 1));

        out.push(ClaudeStreamEvent::MessageStart { message });
        self.state = RelayState::Streaming;
    }

    /// Index of the open block of `kind`, starting one after closing
    /// whatever else is open.
    fn ensure_block(&mut self, kind: BlockKind, content_block: ClaudeContent, out: &mut Vec<ClaudeStreamEvent>) -> u32 {
        if let Some(open) = self.open.filter(|open| open.kind == kind) {
            return open.index;
        }

        self.open_block(kind, content_block, out)
    }

    fn open_block(&mut self, kind: BlockKind, content_block: ClaudeContent, out: &mut Vec<ClaudeStreamEvent>) -> u32 {
        self.settle(out);
        self.start_block(kind, content_block, out)
    }

    fn start_block(&mut self, kind: BlockKind, content_block: ClaudeContent, out: &mut Vec<ClaudeStreamEvent>) -> u32 {
        let index = self.next_index;
        self.next_index += 1;

        out.push(ClaudeStreamEvent::ContentBlockStart { index, content_block });
        self.open = Some(OpenBlock { index, kind });

        index
    }

    fn close_open_block(&mut self, out: &mut Vec<ClaudeStreamEvent>) {
        if let Some(open) = self.open.take() {
            out.push(ClaudeStreamEvent::ContentBlockStop { index: open.index });
        }
    }

    /// Closes the open block and flushes every queued tool call.
    fn settle(&mut self, out: &mut Vec<ClaudeStreamEvent>) {
        self.close_open_block(out);

        while let Some(upstream) = self.queued.pop_front() {
            self.start_tool_block(upstream, out);
            self.close_open_block(out);
        }
    }

    /// Moves on to the next queued tool call while the open one is complete.
    fn advance_tools(&mut self, out: &mut Vec<ClaudeStreamEvent>) {
        while let Some(BlockKind::ToolUse(open)) = self.open.map(|open| open.kind) {
            let complete = self.tool_calls.get(&open).is_some_and(ToolCallAccumulator::is_complete);

            if !complete {
                break;
            }

            let Some(next) = self.queued.pop_front() else {
                break;
            };

            self.close_open_block(out);
            self.start_tool_block(next, out);
        }
    }

    /// Starts the block of a known tool call, replaying arguments buffered so far.
    fn start_tool_block(&mut self, upstream: u32, out: &mut Vec<ClaudeStreamEvent>) {
        let Some(accumulator) = self.tool_calls.get_mut(&upstream) else {
            return;
        };

        accumulator.started = true;

        let block = ClaudeContent::ToolUse {
            id: accumulator.id.clone(),
            name: accumulator.name.clone(),
            input: empty_object(),
        };
        let buffered = (!accumulator.arguments.is_empty()).then(|| accumulator.arguments.clone());

        let index = self.start_block(BlockKind::ToolUse(upstream), block, out);

        if let Some(partial_json) = buffered {
            out.push(ClaudeStreamEvent::ContentBlockDelta {
                index,
                delta: BlockDelta::InputJsonDelta { partial_json },
            });
        }
    }

    /// The open block is a tool call still waiting for arguments.
    fn tool_call_pending(&self) -> bool {
        match self.open.map(|open| open.kind) {
            Some(BlockKind::ToolUse(open)) => self.tool_calls.get(&open).is_some_and(|call| !call.is_complete()),
            _ => false,
        }
    }

    fn on_thinking(&mut self, content: Option<&str>, signature: Option<&str>, out: &mut Vec<ClaudeStreamEvent>) {
        let content = content.filter(|c| !c.is_empty());
        let signature = signature.filter(|s| !s.is_empty());

        if content.is_none() && signature.is_none() {
            return;
        }

        let block = ClaudeContent::Thinking {
            thinking: String::new(),
            signature: None,
        };
        let index = self.ensure_block(BlockKind::Thinking, block, out);

        if let Some(thinking) = content {
            out.push(ClaudeStreamEvent::ContentBlockDelta {
                index,
                delta: BlockDelta::ThinkingDelta {
                    thinking: thinking.to_string(),
                },
            });
        }

        // A signature seals the thinking block.
        if let Some(signature) = signature {
            out.push(ClaudeStreamEvent::ContentBlockDelta {
                index,
                delta: BlockDelta::SignatureDelta {
                    signature: signature.to_string(),
                },
            });

            self.close_open_block(out);
        }
    }

    fn on_text(&mut self, text: &str, out: &mut Vec<ClaudeStreamEvent>) {
        self.text.push_str(text);

        let index = self.ensure_block(BlockKind::Text, ClaudeContent::text(""), out);

        out.push(ClaudeStreamEvent::ContentBlockDelta {
            index,
            delta: BlockDelta::TextDelta { text: text.to_string() },
        });
    }

    fn on_tool_call(&mut self, call: &ToolCallDelta, out: &mut Vec<ClaudeStreamEvent>) {
        let upstream = call.index;
        let id = call.id.as_deref().filter(|id| !id.is_empty());
        let function = call.function.as_ref();
        let name = function.and_then(|f| f.name.as_deref()).filter(|name| !name.is_empty());
        let arguments = function.and_then(|f| f.arguments.as_deref()).filter(|args| !args.is_empty());

        match self.tool_calls.get_mut(&upstream) {
            Some(accumulator) => {
                if let (true, Some(id), Some(name)) = (accumulator.placeholder, id, name) {
                    log::debug!("Tool call {upstream} got its id {id} and name {name}");

                    accumulator.id = id.to_string();
                    accumulator.name = name.to_string();
                    accumulator.placeholder = false;
                }
            }
            None => {
                let placeholder = id.is_none() || name.is_none();

                let accumulator = ToolCallAccumulator {
                    id: id.map_or_else(|| format!("call_{}_{upstream}", unix_millis()), str::to_string),
                    name: name.map_or_else(|| format!("tool_{upstream}"), str::to_string),
                    placeholder,
                    arguments: String::new(),
                    started: false,
                };

                self.tool_calls.insert(upstream, accumulator);

                if self.tool_call_pending() {
                    log::debug!("Queueing tool call {upstream} until the open one has its arguments");
                    self.queued.push_back(upstream);
                } else {
                    self.settle(out);
                    self.start_tool_block(upstream, out);
                }
            }
        }

        if let Some(arguments) = arguments {
            self.on_arguments(upstream, arguments, out);
        }
    }

    fn on_arguments(&mut self, upstream: u32, fragment: &str, out: &mut Vec<ClaudeStreamEvent>) {
        let open_index = self
            .open
            .filter(|open| open.kind == BlockKind::ToolUse(upstream))
            .map(|open| open.index);

        let Some(accumulator) = self.tool_calls.get_mut(&upstream) else {
            return;
        };

        accumulator.arguments.push_str(fragment);

        let buffered = accumulator.arguments.trim();

        if buffered.starts_with('{')
            && buffered.ends_with('}')
            && let Err(e) = serde_json::from_str::<Value>(buffered)
        {
            log::warn!("Arguments of tool call {} are not valid JSON yet: {e}", accumulator.name);
        }

        // Queued calls replay their buffer when their block starts.
        if !accumulator.started {
            return;
        }

        match open_index {
            Some(index) => {
                out.push(ClaudeStreamEvent::ContentBlockDelta {
                    index,
                    delta: BlockDelta::InputJsonDelta {
                        partial_json: fragment.to_string(),
                    },
                });

                self.advance_tools(out);
            }
            None => log::warn!("Arguments for tool call {upstream} arrived after its block was closed, buffering only"),
        }
    }

    fn on_finish(&mut self, reason: &FinishReason, out: &mut Vec<ClaudeStreamEvent>) {
        if self.state != RelayState::Streaming {
            return;
        }

        self.close_message(convert::stop_reason(Some(reason)), out);
    }

    fn close_message(&mut self, stop_reason: StopReason, out: &mut Vec<ClaudeStreamEvent>) {
        self.state = RelayState::Finishing;
        self.settle(out);

        let usage = self.final_usage();

        out.push(ClaudeStreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some(stop_reason),
                stop_sequence: None,
            },
            usage: usage.clone(),
        });
        out.push(ClaudeStreamEvent::MessageStop);

        self.reported_usage = Some(usage);
        self.state = RelayState::Closed;
    }

    /// Last usage the upstream sent, or the local estimate where it left
    /// counts out.
    fn final_usage(&self) -> ClaudeUsage {
        match self.last_usage {
            Some(usage) if usage.completion_tokens > 0 => ClaudeUsage::new(usage.prompt_tokens, usage.completion_tokens),
            Some(usage) if usage.prompt_tokens > 0 => ClaudeUsage::new(usage.prompt_tokens, self.estimated_output()),
            _ => ClaudeUsage::new(self.prompt_tokens, self.estimated_output()),
        }
    }

    fn estimated_output(&self) -> u32 {
        let tools: u32 = self
            .tool_calls
            .values()
            .map(|call| token_counter::estimate(&format!("tool_use:{}:{}", call.name, call.arguments)))
            .sum();

        tools + token_counter::estimate(&self.text)
    }
}

impl FragmentHandler for StreamRelay {
    type Fragment = ChatCompletionChunk;

    fn on_fragment(&mut self, fragment: ChatCompletionChunk, out: &mut Vec<ClaudeStreamEvent>) {
        self.push(fragment, out);
    }

    fn on_end(&mut self, out: &mut Vec<ClaudeStreamEvent>) {
        self.end(out);
    }

    fn is_closed(&self) -> bool {
        self.state == RelayState::Closed
    }

    fn close(&mut self) {
        StreamRelay::close(self);
    }

    fn usage(&self) -> Option<ClaudeUsage> {
        self.reported_usage.clone()
    }
}
