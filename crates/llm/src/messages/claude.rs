//! Claude Messages API wire types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Request body of `POST /v1/messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeRequest {
    pub model: String,

    pub messages: Vec<ClaudeMessage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<ClaudeSystem>,

    /// Must be positive. A missing value deserializes to zero and is rejected
    /// during conversion.
    #[serde(default)]
    pub max_tokens: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ClaudeTool>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ClaudeToolChoice>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,

    /// Extended thinking configuration, forwarded as-is to native backends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<Value>,
}

impl ClaudeRequest {
    pub fn is_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    pub fn has_tools(&self) -> bool {
        self.tools.as_ref().is_some_and(|tools| !tools.is_empty())
    }

    /// Every system text joined by newlines, for keyword matching.
    pub fn system_text(&self) -> String {
        self.system.as_ref().map(|s| s.texts().join("\n")).unwrap_or_default()
    }
}

/// The `system` field is either a plain string or an array of text blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClaudeSystem {
    Text(String),
    Blocks(Vec<ClaudeSystemBlock>),
}

impl ClaudeSystem {
    /// Non-empty texts in order.
    pub fn texts(&self) -> Vec<&str> {
        match self {
            Self::Text(text) if text.is_empty() => Vec::new(),
            Self::Text(text) => vec![text.as_str()],
            Self::Blocks(blocks) => blocks
                .iter()
                .filter(|block| block.r#type == "text" && !block.text.is_empty())
                .map(|block| block.text.as_str())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeSystemBlock {
    #[serde(default = "text_type")]
    pub r#type: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<Value>,
}

fn text_type() -> String {
    "text".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaudeRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeMessage {
    pub role: ClaudeRole,
    pub content: ClaudeMessageContent,
}

/// Message content is either a bare string or a list of typed blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClaudeMessageContent {
    Text(String),
    Blocks(Vec<ClaudeContent>),
}

/// A typed content block. Unrecognized block types deserialize to
/// [`ClaudeContent::Unknown`], are skipped by conversions and pass through
/// native backends unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaudeContent {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        citations: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache_control: Option<Value>,
    },
    Image {
        source: ClaudeImageSource,
    },
    ToolUse {
        #[serde(default)]
        id: String,
        #[serde(default)]
        name: String,
        #[serde(default = "empty_object")]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        /// A string or an array of content blocks.
        #[serde(default)]
        content: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    Thinking {
        thinking: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    RedactedThinking {
        data: String,
    },
    /// Block types we do not model, kept as received.
    #[serde(untagged)]
    Unknown(Value),
}

impl ClaudeContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            citations: None,
            cache_control: None,
        }
    }
}

pub(crate) fn empty_object() -> Value {
    Value::Object(Default::default())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaudeImageSource {
    Base64 { media_type: String, data: String },
    Url { url: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeTool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Value,
    /// Server tools carry a versioned type such as `web_search_20250305`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaudeToolChoice {
    Auto {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        disable_parallel_tool_use: Option<bool>,
    },
    Any {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        disable_parallel_tool_use: Option<bool>,
    },
    Tool {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        disable_parallel_tool_use: Option<bool>,
    },
    None,
}

impl ClaudeToolChoice {
    pub fn disable_parallel_tool_use(&self) -> Option<bool> {
        match self {
            Self::Auto {
                disable_parallel_tool_use,
            }
            | Self::Any {
                disable_parallel_tool_use,
            }
            | Self::Tool {
                disable_parallel_tool_use,
                ..
            } => *disable_parallel_tool_use,
            Self::None => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
    PauseTurn,
    Refusal,
    #[serde(untagged)]
    Other(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaudeUsage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_creation_input_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_input_tokens: Option<u32>,
    /// Counters such as `server_tool_use` or `service_tier`, passed through.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ClaudeUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            ..Default::default()
        }
    }
}

/// Response body of a non-streaming `POST /v1/messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeResponse {
    pub id: String,
    #[serde(default = "message_type")]
    pub r#type: String,
    pub role: ClaudeRole,
    pub content: Vec<ClaudeContent>,
    pub model: String,
    pub stop_reason: Option<StopReason>,
    #[serde(default)]
    pub stop_sequence: Option<String>,
    #[serde(default)]
    pub usage: ClaudeUsage,
}

fn message_type() -> String {
    "message".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaudeErrorBody {
    pub r#type: String,
    pub message: String,
}

/// `{"type":"error","error":{...}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeErrorResponse {
    pub r#type: String,
    pub error: ClaudeErrorBody,
}

impl ClaudeErrorResponse {
    pub fn new(error: ClaudeErrorBody) -> Self {
        Self {
            r#type: "error".to_string(),
            error,
        }
    }
}

/// Server-sent events of a streaming `POST /v1/messages`.
///
/// Streams begin with [`ClaudeStreamEvent::MessageStart`], run zero or more
/// content block lifecycles (`content_block_start`, `content_block_delta*`,
/// `content_block_stop`) and finish with `message_delta` then `message_stop`.
/// Events we do not model are kept verbatim in [`ClaudeStreamEvent::Unknown`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaudeStreamEvent {
    MessageStart {
        message: StreamMessage,
    },
    ContentBlockStart {
        index: u32,
        content_block: ClaudeContent,
    },
    ContentBlockDelta {
        index: u32,
        delta: BlockDelta,
    },
    ContentBlockStop {
        index: u32,
    },
    MessageDelta {
        delta: MessageDeltaBody,
        #[serde(default)]
        usage: ClaudeUsage,
    },
    MessageStop,
    Ping,
    Error {
        error: ClaudeErrorBody,
    },
    #[serde(untagged)]
    Unknown(Value),
}

impl ClaudeStreamEvent {
    /// The SSE `event:` name.
    pub fn event_name(&self) -> &str {
        match self {
            Self::MessageStart { .. } => "message_start",
            Self::ContentBlockStart { .. } => "content_block_start",
            Self::ContentBlockDelta { .. } => "content_block_delta",
            Self::ContentBlockStop { .. } => "content_block_stop",
            Self::MessageDelta { .. } => "message_delta",
            Self::MessageStop => "message_stop",
            Self::Ping => "ping",
            Self::Error { .. } => "error",
            Self::Unknown(value) => value.get("type").and_then(Value::as_str).unwrap_or("unknown"),
        }
    }

    /// Renders `event: <name>\ndata: <json>\n\n`.
    pub fn to_sse_frame(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.event_name(), self.to_json())
    }

    pub fn to_json(&self) -> String {
        sonic_rs::to_string(self).unwrap_or_else(|e| {
            log::error!("Failed to serialize Claude stream event: {e}");
            r#"{"type":"error","error":{"type":"internal_error","message":"serialization failed"}}"#.to_string()
        })
    }

    pub fn error(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            error: ClaudeErrorBody {
                r#type: error_type.into(),
                message: message.into(),
            },
        }
    }
}

/// Message skeleton carried by `message_start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMessage {
    pub id: String,
    #[serde(default = "message_type")]
    pub r#type: String,
    pub role: ClaudeRole,
    #[serde(default)]
    pub content: Vec<ClaudeContent>,
    pub model: String,
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
    #[serde(default)]
    pub stop_sequence: Option<String>,
    #[serde(default)]
    pub usage: ClaudeUsage,
}

impl StreamMessage {
    pub fn new(id: impl Into<String>, model: impl Into<String>, usage: ClaudeUsage) -> Self {
        Self {
            id: id.into(),
            r#type: message_type(),
            role: ClaudeRole::Assistant,
            content: Vec::new(),
            model: model.into(),
            stop_reason: None,
            stop_sequence: None,
            usage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockDelta {
    TextDelta {
        text: String,
    },
    ThinkingDelta {
        thinking: String,
    },
    SignatureDelta {
        signature: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    #[serde(untagged)]
    Unknown(Value),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDeltaBody {
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
    #[serde(default)]
    pub stop_sequence: Option<String>,
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use insta::{assert_debug_snapshot, assert_snapshot};
    use serde_json::json;

    use super::*;

    #[test]
    fn system_as_string_or_blocks() {
        let text: ClaudeSystem = serde_json::from_value(json!("be brief")).unwrap();
        let blocks: ClaudeSystem = serde_json::from_value(json!([
            {"type": "text", "text": "one"},
            {"type": "text", "text": ""},
            {"type": "text", "text": "two", "cache_control": {"type": "ephemeral"}}
        ]))
        .unwrap();

        assert_eq!(text.texts(), vec!["be brief"]);
        assert_eq!(blocks.texts(), vec!["one", "two"]);
    }

    #[test]
    fn unknown_blocks_are_tolerated() {
        let content: ClaudeMessageContent = serde_json::from_value(json!([
            {"type": "text", "text": "hi"},
            {"type": "document"},
            {"type": "tool_use", "name": "lookup"}
        ]))
        .unwrap();

        assert_debug_snapshot!(content, @r#"
        Blocks(
            [
                Text {
                    text: "hi",
                    citations: None,
                    cache_control: None,
                },
                Unknown(
                    Object {
                        "type": String("document"),
                    },
                ),
                ToolUse {
                    id: "",
                    name: "lookup",
                    input: Object {},
                },
            ],
        )
        "#);
    }

    #[test]
    fn missing_max_tokens_is_zero() {
        let request: ClaudeRequest = serde_json::from_str(indoc! {r#"
            {
              "model": "claude-3-5-sonnet",
              "messages": [{"role": "user", "content": "hi"}]
            }
        "#})
        .unwrap();

        assert_eq!(request.max_tokens, 0);
        assert!(!request.is_stream());
    }

    #[test]
    fn sse_frame() {
        let event = ClaudeStreamEvent::ContentBlockDelta {
            index: 0,
            delta: BlockDelta::TextDelta {
                text: "Hello".to_string(),
            },
        };

        assert_eq!(
            event.to_sse_frame(),
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hello\"}}\n\n"
        );
    }

    #[test]
    fn message_start_shape() {
        let event = ClaudeStreamEvent::MessageStart {
            message: StreamMessage::new("msg_1", "claude-3-5-sonnet", ClaudeUsage::new(1, 1)),
        };

        assert_snapshot!(event.to_json(), @r#"{"type":"message_start","message":{"id":"msg_1","type":"message","role":"assistant","content":[],"model":"claude-3-5-sonnet","stop_reason":null,"stop_sequence":null,"usage":{"input_tokens":1,"output_tokens":1}}}"#);
    }

    #[test]
    fn unknown_events_keep_their_name() {
        let event: ClaudeStreamEvent =
            serde_json::from_value(json!({"type": "citations_update", "payload": 1})).unwrap();

        assert_eq!(event.event_name(), "citations_update");
    }

    #[test]
    fn message_delta_without_input_tokens() {
        let event: ClaudeStreamEvent = serde_json::from_value(json!({
            "type": "message_delta",
            "delta": {"stop_reason": "tool_use", "stop_sequence": null},
            "usage": {"output_tokens": 12}
        }))
        .unwrap();

        assert_debug_snapshot!(event, @r#"
        MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some(
                    ToolUse,
                ),
                stop_sequence: None,
            },
            usage: ClaudeUsage {
                input_tokens: 0,
                output_tokens: 12,
                cache_creation_input_tokens: None,
                cache_read_input_tokens: None,
                extra: {},
            },
        }
        "#);
    }
}
