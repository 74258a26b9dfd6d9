//! Google Gemini through `generateContent`, spoken to in OpenAI terms.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};

use crate::{
    convert::gemini::{GeminiChunkMapper, gemini_to_openai},
    error::{LlmError, LlmResult},
    http_client::build_http_client,
    messages::{
        gemini::{GeminiRequest, GeminiResponse},
        openai::{ChatCompletionRequest, ChatCompletionResponse},
    },
    provider::{ChatCompletionStream, Provider},
    requester::{Requester, gemini_error, json_event_stream},
};

pub(crate) const DEFAULT_GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub(crate) struct GeminiProvider {
    client: Client,
    requester: Requester,
    base_url: String,
    key: SecretString,
    name: String,
}

impl GeminiProvider {
    pub fn new(name: String, base_url: String, key: SecretString, prefix_errors: bool) -> LlmResult<Self> {
        Ok(Self {
            client: build_http_client()?,
            requester: Requester::new(gemini_error, prefix_errors),
            base_url: base_url.trim_end_matches('/').to_string(),
            key,
            name,
        })
    }

    fn post(&self, model: &str, method: &str) -> RequestBuilder {
        self.client
            .post(format!("{}/models/{model}:{method}", self.base_url))
            .header("x-goog-api-key", self.key.expose_secret())
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, request: ChatCompletionRequest) -> LlmResult<ChatCompletionResponse> {
        log::debug!("Sending generateContent for model {} to {}", request.model, self.name);

        let model = request.model.clone();
        let body = GeminiRequest::from(request);
        let builder = Requester::json_body(self.post(&model, "generateContent"), &body)?;

        let response: GeminiResponse = self.requester.send(builder).await?;

        if response.candidates.is_empty() {
            return Err(LlmError::DecodeResponseFailed("no candidates".to_string()));
        }

        Ok(gemini_to_openai(response, &model))
    }

    async fn chat_stream(&self, request: ChatCompletionRequest) -> LlmResult<ChatCompletionStream> {
        log::debug!("Sending streamGenerateContent for model {} to {}", request.model, self.name);

        let model = request.model.clone();
        let body = GeminiRequest::from(request);

        let builder = Requester::json_body(self.post(&model, "streamGenerateContent"), &body)?.query(&[("alt", "sse")]);
        let response = self.requester.send_raw(builder).await?;

        let mut mapper = GeminiChunkMapper::new(model);

        let chunks = json_event_stream::<GeminiResponse>(response)
            .map(move |event| event.map(|event| mapper.map(event)))
            .boxed();

        Ok(chunks)
    }
}
