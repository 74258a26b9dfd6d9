use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    convert::openai_to_claude,
    error::LlmResult,
    messages::{
        claude::{ClaudeRequest, ClaudeResponse},
        openai::{
            ChatCompletionRequest, ChatCompletionResponse, EmbeddingRequest, EmbeddingResponse, ImageRequest,
            ImageResponse, ResponsesRequest, ResponsesResponse,
        },
    },
    provider::{ChatCompletionStream, ClaudeStream, Provider, ResponsesEventStream, Translation},
};

/// Serves Claude requests on a chat-only provider by converting them to
/// OpenAI requests and the answers back.
pub struct ClaudeAdapter {
    inner: Arc<dyn Provider>,
}

impl ClaudeAdapter {
    pub fn new(inner: Arc<dyn Provider>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Provider for ClaudeAdapter {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn chat(&self, request: ChatCompletionRequest) -> LlmResult<ChatCompletionResponse> {
        self.inner.chat(request).await
    }

    async fn chat_stream(&self, request: ChatCompletionRequest) -> LlmResult<ChatCompletionStream> {
        self.inner.chat_stream(request).await
    }

    async fn claude_chat(&self, request: ClaudeRequest) -> LlmResult<ClaudeResponse> {
        let model = request.model.clone();

        let mut chat = ChatCompletionRequest::try_from(request)?;
        chat.stream = false;

        let mut response = openai_to_claude(self.inner.chat(chat).await?);

        if response.model.is_empty() {
            response.model = model;
        }

        Ok(response)
    }

    async fn claude_chat_stream(&self, request: ClaudeRequest) -> LlmResult<ClaudeStream> {
        let mut chat = ChatCompletionRequest::try_from(request)?;
        chat.stream = true;

        Ok(ClaudeStream::Chat {
            chunks: self.inner.chat_stream(chat).await?,
            translation: Translation::Relay,
        })
    }

    async fn embeddings(&self, request: EmbeddingRequest) -> LlmResult<EmbeddingResponse> {
        self.inner.embeddings(request).await
    }

    async fn image_generation(&self, request: ImageRequest) -> LlmResult<ImageResponse> {
        self.inner.image_generation(request).await
    }

    async fn responses(&self, request: ResponsesRequest) -> LlmResult<ResponsesResponse> {
        self.inner.responses(request).await
    }

    async fn responses_stream(&self, request: ResponsesRequest) -> LlmResult<ResponsesEventStream> {
        self.inner.responses_stream(request).await
    }
}
