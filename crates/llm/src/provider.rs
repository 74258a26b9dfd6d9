//! Upstream providers and the capability-gated handle callers use.

mod ali;
mod anthropic;
mod bedrock;
mod capability;
mod claude_adapter;
mod dispatcher;
mod gemini;
mod openai;
mod vertex;
mod zhipu;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

pub use capability::{Capability, CapabilitySet};
pub use claude_adapter::ClaudeAdapter;
pub use dispatcher::resolve;

use crate::{
    error::{LlmError, LlmResult},
    messages::{
        claude::{ClaudeRequest, ClaudeResponse, ClaudeStreamEvent},
        openai::{
            ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, EmbeddingRequest, EmbeddingResponse,
            ImageRequest, ImageResponse, ResponsesRequest, ResponsesResponse, ResponsesStreamEvent,
        },
    },
};

/// Stream of OpenAI chunks from an upstream.
pub type ChatCompletionStream = BoxStream<'static, LlmResult<ChatCompletionChunk>>;

/// Stream of Claude events from a native upstream.
pub type ClaudeEventStream = BoxStream<'static, LlmResult<ClaudeStreamEvent>>;

/// Stream of Responses API events.
pub type ResponsesEventStream = BoxStream<'static, LlmResult<ResponsesStreamEvent>>;

/// How OpenAI chunks are turned into Claude events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Translation {
    /// Stateful relay engine, merging tool-call fragments across chunks.
    Relay,
    /// One event per chunk, no memory between chunks.
    PerChunk,
}

/// Upstream side of a streamed Claude request.
pub enum ClaudeStream {
    /// The upstream speaks Claude events already.
    Native(ClaudeEventStream),
    /// The upstream streams OpenAI chunks that need translating.
    Chat {
        chunks: ChatCompletionStream,
        translation: Translation,
    },
}

/// An upstream backend. Operations a provider does not implement answer with
/// a channel error; callers go through [`ProviderHandle`], which checks the
/// capability set first.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn chat(&self, _request: ChatCompletionRequest) -> LlmResult<ChatCompletionResponse> {
        Err(LlmError::channel_not_implemented())
    }

    async fn chat_stream(&self, _request: ChatCompletionRequest) -> LlmResult<ChatCompletionStream> {
        Err(LlmError::channel_not_implemented())
    }

    async fn claude_chat(&self, _request: ClaudeRequest) -> LlmResult<ClaudeResponse> {
        Err(LlmError::channel_not_implemented())
    }

    async fn claude_chat_stream(&self, _request: ClaudeRequest) -> LlmResult<ClaudeStream> {
        Err(LlmError::channel_not_implemented())
    }

    async fn embeddings(&self, _request: EmbeddingRequest) -> LlmResult<EmbeddingResponse> {
        Err(LlmError::channel_not_implemented())
    }

    async fn image_generation(&self, _request: ImageRequest) -> LlmResult<ImageResponse> {
        Err(LlmError::channel_not_implemented())
    }

    async fn responses(&self, _request: ResponsesRequest) -> LlmResult<ResponsesResponse> {
        Err(LlmError::channel_not_implemented())
    }

    async fn responses_stream(&self, _request: ResponsesRequest) -> LlmResult<ResponsesEventStream> {
        Err(LlmError::channel_not_implemented())
    }
}

/// A provider together with the operations it advertises.
#[derive(Clone)]
pub struct ProviderHandle {
    provider: Arc<dyn Provider>,
    capabilities: CapabilitySet,
}

impl std::fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("name", &self.provider.name())
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

impl ProviderHandle {
    pub fn new(provider: Arc<dyn Provider>, capabilities: CapabilitySet) -> Self {
        Self { provider, capabilities }
    }

    pub fn name(&self) -> &str {
        self.provider.name()
    }

    pub fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.supports(capability)
    }

    /// A handle serving Claude requests: this one when the provider speaks
    /// Claude natively, otherwise the provider wrapped in a [`ClaudeAdapter`].
    pub fn claude_capable(&self) -> LlmResult<ProviderHandle> {
        if self.supports(Capability::ClaudeChat) {
            return Ok(self.clone());
        }

        if !self.supports(Capability::Chat) {
            return Err(LlmError::channel_not_implemented());
        }

        log::debug!("Provider {} has no native Claude support, adapting chat", self.name());

        let mut capabilities = self.capabilities.with(Capability::ClaudeChat);

        if self.supports(Capability::ChatStream) {
            capabilities = capabilities.with(Capability::ClaudeChatStream);
        }

        Ok(Self::new(Arc::new(ClaudeAdapter::new(self.provider.clone())), capabilities))
    }

    fn require(&self, capability: Capability) -> LlmResult<()> {
        if self.supports(capability) {
            Ok(())
        } else {
            log::debug!("Provider {} does not support {capability}", self.name());
            Err(LlmError::channel_not_implemented())
        }
    }

    pub async fn chat(&self, request: ChatCompletionRequest) -> LlmResult<ChatCompletionResponse> {
        self.require(Capability::Chat)?;
        self.provider.chat(request).await
    }

    pub async fn chat_stream(&self, request: ChatCompletionRequest) -> LlmResult<ChatCompletionStream> {
        self.require(Capability::ChatStream)?;
        self.provider.chat_stream(request).await
    }

    pub async fn claude_chat(&self, request: ClaudeRequest) -> LlmResult<ClaudeResponse> {
        self.require(Capability::ClaudeChat)?;
        self.provider.claude_chat(request).await
    }

    pub async fn claude_chat_stream(&self, request: ClaudeRequest) -> LlmResult<ClaudeStream> {
        self.require(Capability::ClaudeChatStream)?;
        self.provider.claude_chat_stream(request).await
    }

    pub async fn embeddings(&self, request: EmbeddingRequest) -> LlmResult<EmbeddingResponse> {
        self.require(Capability::Embeddings)?;
        self.provider.embeddings(request).await
    }

    pub async fn image_generation(&self, request: ImageRequest) -> LlmResult<ImageResponse> {
        self.require(Capability::ImageGeneration)?;
        self.provider.image_generation(request).await
    }

    pub async fn responses(&self, request: ResponsesRequest) -> LlmResult<ResponsesResponse> {
        self.require(Capability::Responses)?;
        self.provider.responses(request).await
    }

    pub async fn responses_stream(&self, request: ResponsesRequest) -> LlmResult<ResponsesEventStream> {
        self.require(Capability::ResponsesStream)?;
        self.provider.responses_stream(request).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use futures::{StreamExt, stream};
    use serde_json::json;

    use super::{Capability, CapabilitySet, ChatCompletionStream, ClaudeStream, Provider, ProviderHandle, Translation};
    use crate::{
        error::{LlmError, LlmResult},
        messages::openai::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse},
    };

    /// Chat-only provider answering with canned values and recording requests.
    pub(crate) struct ScriptedChat {
        pub response: serde_json::Value,
        pub chunks: Vec<serde_json::Value>,
        pub seen: Mutex<Vec<ChatCompletionRequest>>,
    }

    impl ScriptedChat {
        pub fn new(response: serde_json::Value, chunks: Vec<serde_json::Value>) -> Self {
            Self {
                response,
                chunks,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Provider for ScriptedChat {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn chat(&self, request: ChatCompletionRequest) -> LlmResult<ChatCompletionResponse> {
            self.seen.lock().unwrap().push(request);
            Ok(serde_json::from_value(self.response.clone()).unwrap())
        }

        async fn chat_stream(&self, request: ChatCompletionRequest) -> LlmResult<ChatCompletionStream> {
            self.seen.lock().unwrap().push(request);

            let chunks: Vec<LlmResult<ChatCompletionChunk>> = self
                .chunks
                .iter()
                .map(|chunk| Ok(serde_json::from_value(chunk.clone()).unwrap()))
                .collect();

            Ok(stream::iter(chunks).boxed())
        }
    }

    fn claude_request(stream: bool) -> crate::messages::claude::ClaudeRequest {
        serde_json::from_value(json!({
            "model": "gpt-4o",
            "max_tokens": 64,
            "stream": stream,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn chat_provider_is_adapted_for_claude() {
        let provider = Arc::new(ScriptedChat::new(
            json!({
                "id": "chatcmpl-9",
                "model": "gpt-4o",
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "hello"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4}
            }),
            Vec::new(),
        ));

        let handle = ProviderHandle::new(provider.clone(), CapabilitySet::chat());
        assert!(!handle.supports(Capability::ClaudeChat));

        let claude = handle.claude_capable().unwrap();
        assert!(claude.supports(Capability::ClaudeChat));
        assert!(claude.supports(Capability::ClaudeChatStream));

        let response = claude.claude_chat(claude_request(false)).await.unwrap();

        assert_eq!(response.id, "msg_chatcmpl-9");
        assert_eq!(response.usage.output_tokens, 1);
        assert!(!provider.seen.lock().unwrap()[0].stream);
    }

    #[tokio::test]
    async fn adapted_streams_use_the_relay_engine() {
        let provider = Arc::new(ScriptedChat::new(json!({}), Vec::new()));
        let handle = ProviderHandle::new(provider.clone(), CapabilitySet::chat())
            .claude_capable()
            .unwrap();

        let stream = handle.claude_chat_stream(claude_request(true)).await.unwrap();

        assert!(matches!(
            stream,
            ClaudeStream::Chat {
                translation: Translation::Relay,
                ..
            }
        ));
        assert!(provider.seen.lock().unwrap()[0].stream);
    }

    #[tokio::test]
    async fn unsupported_operations_are_channel_errors() {
        let provider = Arc::new(ScriptedChat::new(json!({}), Vec::new()));
        let handle = ProviderHandle::new(provider, CapabilitySet::empty().with(Capability::Chat));

        let error = handle.chat_stream(ChatCompletionRequest::default()).await.err().unwrap();
        assert!(matches!(error, LlmError::ChannelError(_)));

        let claude = handle.claude_capable().unwrap();
        assert!(!claude.supports(Capability::ClaudeChatStream));

        let embeddings_only = ProviderHandle::new(
            Arc::new(ScriptedChat::new(json!({}), Vec::new())),
            CapabilitySet::empty().with(Capability::Embeddings),
        );
        assert!(matches!(embeddings_only.claude_capable(), Err(LlmError::ChannelError(_))));
    }
}
