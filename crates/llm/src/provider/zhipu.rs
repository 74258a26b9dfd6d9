//! Zhipu GLM: OpenAI-compatible chat plus a native Claude endpoint.

use async_trait::async_trait;
use secrecy::SecretString;

use crate::{
    error::LlmResult,
    messages::{
        claude::{ClaudeRequest, ClaudeResponse},
        openai::{ChatCompletionRequest, ChatCompletionResponse, EmbeddingRequest, EmbeddingResponse},
    },
    provider::{
        ChatCompletionStream, ClaudeStream, Provider,
        anthropic::{AnthropicProvider, ClaudeAuth},
        openai::OpenAiProvider,
    },
};

pub(crate) const DEFAULT_ZHIPU_API_URL: &str = "https://open.bigmodel.cn/api";

pub(crate) struct ZhipuProvider {
    chat: OpenAiProvider,
    claude: AnthropicProvider,
    name: String,
}

impl ZhipuProvider {
    /// `base_url` is the API root; chat lives under `/paas/v4` and Claude
    /// messages under `/anthropic/v1/messages`.
    pub fn new(name: String, base_url: &str, key: SecretString, prefix_errors: bool) -> LlmResult<Self> {
        let base_url = base_url.trim_end_matches('/');

        Ok(Self {
            chat: OpenAiProvider::new(name.clone(), format!("{base_url}/paas/v4"), key.clone(), prefix_errors)?,
            claude: AnthropicProvider::new(
                name.clone(),
                format!("{base_url}/anthropic/v1/messages"),
                key,
                ClaudeAuth::Bearer,
                prefix_errors,
            )?,
            name,
        })
    }
}

#[async_trait]
impl Provider for ZhipuProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, request: ChatCompletionRequest) -> LlmResult<ChatCompletionResponse> {
        self.chat.chat(request).await
    }

    async fn chat_stream(&self, request: ChatCompletionRequest) -> LlmResult<ChatCompletionStream> {
        self.chat.chat_stream(request).await
    }

    async fn claude_chat(&self, request: ClaudeRequest) -> LlmResult<ClaudeResponse> {
        self.claude.claude_chat(request).await
    }

    async fn claude_chat_stream(&self, request: ClaudeRequest) -> LlmResult<ClaudeStream> {
        self.claude.claude_chat_stream(request).await
    }

    async fn embeddings(&self, request: EmbeddingRequest) -> LlmResult<EmbeddingResponse> {
        self.chat.embeddings(request).await
    }
}
