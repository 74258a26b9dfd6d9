//! OpenAI-compatible backends: OpenAI itself and every vendor exposing the
//! same `/chat/completions` surface.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};

use crate::{
    error::LlmResult,
    http_client::build_http_client,
    messages::openai::{
        ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, EmbeddingRequest, EmbeddingResponse,
        ImageRequest, ImageResponse, ResponsesRequest, ResponsesResponse, ResponsesStreamEvent,
    },
    provider::{ChatCompletionStream, Provider, ResponsesEventStream},
    requester::{Requester, json_event_stream, openai_error},
};

pub(crate) const DEFAULT_OPENAI_API_URL: &str = "https://api.openai.com/v1";

pub(crate) struct OpenAiProvider {
    client: Client,
    requester: Requester,
    base_url: String,
    key: SecretString,
    name: String,
}

impl OpenAiProvider {
    pub fn new(name: String, base_url: String, key: SecretString, prefix_errors: bool) -> LlmResult<Self> {
        Ok(Self {
            client: build_http_client()?,
            requester: Requester::new(openai_error, prefix_errors),
            base_url: base_url.trim_end_matches('/').to_string(),
            key,
            name,
        })
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(self.key.expose_secret())
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, mut request: ChatCompletionRequest) -> LlmResult<ChatCompletionResponse> {
        log::debug!("Sending chat completion for model {} to {}", request.model, self.name);

        request.stream = false;
        let builder = Requester::json_body(self.post("/chat/completions"), &request)?;

        self.requester.send(builder).await
    }

    async fn chat_stream(&self, mut request: ChatCompletionRequest) -> LlmResult<ChatCompletionStream> {
        log::debug!("Sending streaming chat completion for model {} to {}", request.model, self.name);

        request.stream = true;
        let builder = Requester::json_body(self.post("/chat/completions"), &request)?;
        let response = self.requester.send_raw(builder).await?;

        Ok(json_event_stream::<ChatCompletionChunk>(response))
    }

    async fn embeddings(&self, request: EmbeddingRequest) -> LlmResult<EmbeddingResponse> {
        let builder = Requester::json_body(self.post("/embeddings"), &request)?;
        self.requester.send(builder).await
    }

    async fn image_generation(&self, request: ImageRequest) -> LlmResult<ImageResponse> {
        let builder = Requester::json_body(self.post("/images/generations"), &request)?;
        self.requester.send(builder).await
    }

    async fn responses(&self, mut request: ResponsesRequest) -> LlmResult<ResponsesResponse> {
        request.stream = false;
        let builder = Requester::json_body(self.post("/responses"), &request)?;
        self.requester.send(builder).await
    }

    async fn responses_stream(&self, mut request: ResponsesRequest) -> LlmResult<ResponsesEventStream> {
        log::debug!("Sending streaming responses call for model {} to {}", request.model, self.name);

        request.stream = true;
        let builder = Requester::json_body(self.post("/responses"), &request)?;
        let response = self.requester.send_raw(builder).await?;

        Ok(json_event_stream::<ResponsesStreamEvent>(response))
    }
}
