use std::{sync::Arc, time::Duration};

use config::RelayConfig;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{LlmError, LlmResult},
    messages::claude::{ClaudeRequest, ClaudeResponse, ClaudeUsage},
    provider::{ChatCompletionStream, ClaudeEventStream, ClaudeStream, ProviderHandle, Translation},
    relay::{
        background,
        driver::{FragmentHandler, drive},
        engine::StreamRelay,
        native::NativeRelay,
        per_chunk::PerChunkRelay,
        safety::{self, KeywordChecker, SafetyChecker},
        sink::EventSink,
    },
    token_counter,
};

/// Serves Claude Messages requests on any provider handle.
///
/// Background housekeeping prompts are answered locally, the safety gate
/// runs next, and providers without native Claude support are adapted
/// through chat.
#[derive(Clone)]
pub struct ClaudeRelay {
    read_timeout: Duration,
    safety: Option<Arc<dyn SafetyChecker>>,
}

impl ClaudeRelay {
    pub fn new(config: &RelayConfig) -> Self {
        let safety = config
            .content_safety
            .then(|| Arc::new(KeywordChecker::new(&config.blocked_keywords)) as Arc<dyn SafetyChecker>);

        Self {
            read_timeout: config.stream_read_timeout,
            safety,
        }
    }

    /// Replaces the safety checker, enabling the gate.
    pub fn with_safety_checker(mut self, checker: Arc<dyn SafetyChecker>) -> Self {
        self.safety = Some(checker);
        self
    }

    async fn check(&self, request: &ClaudeRequest) -> LlmResult<()> {
        match &self.safety {
            Some(checker) => safety::gate(checker.as_ref(), request).await,
            None => Ok(()),
        }
    }

    /// Non-streaming request.
    pub async fn message(&self, handle: &ProviderHandle, request: ClaudeRequest) -> LlmResult<ClaudeResponse> {
        if background::is_background_task(&request) {
            log::debug!("Answering background task for model {} locally", request.model);
            return Ok(background::response(&request.model));
        }

        self.check(&request).await?;

        let handle = handle.claude_capable()?;
        log::debug!("Relaying Claude message for model {} to {}", request.model, handle.name());

        handle.claude_chat(request).await
    }

    /// Opens the upstream side of a streaming request. Failures here happen
    /// before anything was written to the client.
    pub async fn open_stream(&self, handle: &ProviderHandle, request: ClaudeRequest) -> LlmResult<PreparedStream> {
        let model = request.model.clone();

        if background::is_background_task(&request) {
            log::debug!("Answering streamed background task for model {model} locally");

            return Ok(PreparedStream {
                source: Source::Background,
                model,
                read_timeout: self.read_timeout,
            });
        }

        self.check(&request).await?;

        let handle = handle.claude_capable()?;
        let prompt_tokens = token_counter::estimate_prompt(&request);

        log::debug!("Opening Claude stream for model {model} on {}", handle.name());

        let source = match handle.claude_chat_stream(request).await? {
            ClaudeStream::Native(events) => Source::Native(events),
            ClaudeStream::Chat { chunks, translation } => Source::Chat {
                chunks,
                translation,
                prompt_tokens,
            },
        };

        Ok(PreparedStream {
            source,
            model,
            read_timeout: self.read_timeout,
        })
    }
}

enum Source {
    Background,
    Native(ClaudeEventStream),
    Chat {
        chunks: ChatCompletionStream,
        translation: Translation,
        prompt_tokens: u32,
    },
}

/// An opened stream waiting to be relayed to a sink.
pub struct PreparedStream {
    source: Source,
    model: String,
    read_timeout: Duration,
}

impl PreparedStream {
    /// Relays every event into `sink` and returns the usage reported to the
    /// client. Local background answers end with
    /// [`LlmError::BackgroundTaskHandled`] so callers skip accounting.
    pub async fn relay<S>(self, sink: &mut S, cancel: CancellationToken) -> LlmResult<Option<ClaudeUsage>>
    where
        S: EventSink + ?Sized,
    {
        let Self {
            source,
            model,
            read_timeout,
        } = self;

        match source {
            Source::Background => {
                for event in background::events(&model) {
                    if sink.send(&event).await.is_err() {
                        break;
                    }
                }

                Err(LlmError::BackgroundTaskHandled)
            }
            Source::Native(events) => usage_of(drive(events, NativeRelay::new(), sink, read_timeout, cancel).await),
            Source::Chat {
                chunks,
                translation: Translation::Relay,
                prompt_tokens,
            } => {
                let relay = StreamRelay::new(model, prompt_tokens);
                usage_of(drive(chunks, relay, sink, read_timeout, cancel).await)
            }
            Source::Chat {
                chunks,
                translation: Translation::PerChunk,
                prompt_tokens,
            } => {
                let relay = PerChunkRelay::new(model, prompt_tokens);
                usage_of(drive(chunks, relay, sink, read_timeout, cancel).await)
            }
        }
    }
}

fn usage_of<H: FragmentHandler>(result: LlmResult<H>) -> LlmResult<Option<ClaudeUsage>> {
    result.map(|handler| handler.usage())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use super::ClaudeRelay;
    use crate::{
        error::LlmError,
        messages::claude::{ClaudeRequest, ClaudeUsage},
        provider::{CapabilitySet, ProviderHandle, tests::ScriptedChat},
        relay::{driver::tests::RecordingSink, safety::KeywordChecker},
    };

    fn relay() -> ClaudeRelay {
        ClaudeRelay::new(&config::RelayConfig::default())
    }

    fn request(stream: bool, system: &str) -> ClaudeRequest {
        serde_json::from_value(json!({
            "model": "claude-3-5-sonnet",
            "max_tokens": 64,
            "stream": stream,
            "system": system,
            "tools": [{"name": "lookup", "input_schema": {"type": "object"}}],
            "messages": [{"role": "user", "content": "what is x?"}]
        }))
        .unwrap()
    }

    fn chat_handle(chunks: Vec<serde_json::Value>) -> (Arc<ScriptedChat>, ProviderHandle) {
        let provider = Arc::new(ScriptedChat::new(json!({}), chunks));
        let handle = ProviderHandle::new(provider.clone(), CapabilitySet::chat());

        (provider, handle)
    }

    #[tokio::test]
    async fn background_task_never_reaches_upstream() {
        let (provider, handle) = chat_handle(Vec::new());

        let response = relay()
            .message(&handle, request(false, "Please write a 5-10 word title"))
            .await
            .unwrap();

        assert!(response.id.starts_with("msg_bg_"));

        let prepared = relay()
            .open_stream(&handle, request(true, "Summarize this coding conversation"))
            .await
            .unwrap();

        let mut sink = RecordingSink::default();
        let result = prepared.relay(&mut sink, CancellationToken::new()).await;

        assert!(matches!(result, Err(LlmError::BackgroundTaskHandled)));
        assert_eq!(sink.names(), ["message_start", "message_stop"]);
        assert!(provider.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unsafe_content_is_rejected_before_upstream() {
        let (provider, handle) = chat_handle(Vec::new());
        let relay = relay().with_safety_checker(Arc::new(KeywordChecker::new(&["what is x".to_string()])));

        let result = relay.open_stream(&handle, request(true, "You are terse.")).await;

        assert!(matches!(result, Err(LlmError::ContentRejected { .. })));
        assert!(provider.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn adapted_stream_merges_tool_calls() {
        let (provider, handle) = chat_handle(vec![
            json!({"choices": [{"index": 0, "delta": {"tool_calls": [
                {"index": 0, "id": "call_1", "type": "function", "function": {"name": "lookup", "arguments": "{\"q\""}}
            ]}}]}),
            json!({"choices": [{"index": 0, "delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": ":\"x\"}"}}
            ]}}]}),
            json!({
                "choices": [{"index": 0, "delta": {}, "finish_reason": "tool_calls"}],
                "usage": {"prompt_tokens": 20, "completion_tokens": 8, "total_tokens": 28}
            }),
        ]);

        let prepared = relay()
            .open_stream(&handle, request(true, "You are terse."))
            .await
            .unwrap();

        let mut sink = RecordingSink::default();
        let usage = prepared.relay(&mut sink, CancellationToken::new()).await.unwrap();

        assert_eq!(usage, Some(ClaudeUsage::new(20, 8)));
        assert_eq!(
            sink.names(),
            [
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );

        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].stream);
    }

    #[tokio::test]
    async fn handle_without_chat_is_a_channel_error() {
        let provider = Arc::new(ScriptedChat::new(json!({}), Vec::new()));
        let handle = ProviderHandle::new(provider, CapabilitySet::empty());

        let result = relay().message(&handle, request(false, "You are terse.")).await;

        assert!(matches!(result, Err(LlmError::ChannelError(_))));
    }
}
