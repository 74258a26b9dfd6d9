//! Native Claude Messages backends.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};

use crate::{
    error::LlmResult,
    http_client::build_http_client,
    messages::claude::{ClaudeRequest, ClaudeResponse, ClaudeStreamEvent},
    provider::{ClaudeStream, Provider},
    requester::{Requester, claude_error, json_event_stream},
};

pub(crate) const DEFAULT_ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// How the key is presented to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClaudeAuth {
    /// `x-api-key` plus `anthropic-version`, as Anthropic expects.
    ApiKey,
    /// `Authorization: Bearer`, used by vendors hosting a Claude-compatible endpoint.
    Bearer,
}

pub(crate) struct AnthropicProvider {
    client: Client,
    requester: Requester,
    messages_url: String,
    key: SecretString,
    auth: ClaudeAuth,
    name: String,
}

impl AnthropicProvider {
    pub fn new(
        name: String,
        messages_url: String,
        key: SecretString,
        auth: ClaudeAuth,
        prefix_errors: bool,
    ) -> LlmResult<Self> {
        Ok(Self {
            client: build_http_client()?,
            requester: Requester::new(claude_error, prefix_errors),
            messages_url,
            key,
            auth,
            name,
        })
    }

    fn post(&self) -> RequestBuilder {
        let builder = self.client.post(&self.messages_url);

        match self.auth {
            ClaudeAuth::ApiKey => builder
                .header("x-api-key", self.key.expose_secret())
                .header("anthropic-version", ANTHROPIC_VERSION),
            ClaudeAuth::Bearer => builder.bearer_auth(self.key.expose_secret()),
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn claude_chat(&self, mut request: ClaudeRequest) -> LlmResult<ClaudeResponse> {
        log::debug!("Sending Claude message for model {} to {}", request.model, self.name);

        request.stream = Some(false);
        let builder = Requester::json_body(self.post(), &request)?;

        self.requester.send(builder).await
    }

    async fn claude_chat_stream(&self, mut request: ClaudeRequest) -> LlmResult<ClaudeStream> {
        log::debug!("Sending streaming Claude message for model {} to {}", request.model, self.name);

        request.stream = Some(true);
        let builder = Requester::json_body(self.post(), &request)?;
        let response = self.requester.send_raw(builder).await?;

        Ok(ClaudeStream::Native(json_event_stream::<ClaudeStreamEvent>(response)))
    }
}
