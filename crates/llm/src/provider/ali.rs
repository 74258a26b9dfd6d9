//! Alibaba DashScope in OpenAI-compatible mode.
//!
//! Claude requests are converted to chat. Streams carrying tools go through
//! the stateful relay engine so tool-call fragments get merged; plain
//! conversations are translated chunk by chunk.

use async_trait::async_trait;
use secrecy::SecretString;

use crate::{
    convert::openai_to_claude,
    error::LlmResult,
    messages::{
        claude::{ClaudeRequest, ClaudeResponse},
        openai::{ChatCompletionRequest, ChatCompletionResponse, EmbeddingRequest, EmbeddingResponse},
    },
    provider::{ChatCompletionStream, ClaudeStream, Provider, Translation, openai::OpenAiProvider},
};

pub(crate) const DEFAULT_ALI_API_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";

pub(crate) struct AliProvider {
    inner: OpenAiProvider,
}

impl AliProvider {
    pub fn new(name: String, base_url: String, key: SecretString, prefix_errors: bool) -> LlmResult<Self> {
        Ok(Self {
            inner: OpenAiProvider::new(name, base_url, key, prefix_errors)?,
        })
    }
}

#[async_trait]
impl Provider for AliProvider {
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
        let response = self.inner.chat(ChatCompletionRequest::try_from(request)?).await?;

        let mut response = openai_to_claude(response);

        if response.model.is_empty() {
            response.model = model;
        }

        Ok(response)
    }

    async fn claude_chat_stream(&self, request: ClaudeRequest) -> LlmResult<ClaudeStream> {
        let translation = if request.has_tools() {
            log::debug!("Tool calls requested, relaying Ali stream through the relay engine");
            Translation::Relay
        } else {
            Translation::PerChunk
        };

        let chunks = self.inner.chat_stream(ChatCompletionRequest::try_from(request)?).await?;

        Ok(ClaudeStream::Chat { chunks, translation })
    }

    async fn embeddings(&self, request: EmbeddingRequest) -> LlmResult<EmbeddingResponse> {
        self.inner.embeddings(request).await
    }
}
