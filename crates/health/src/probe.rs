use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{Duration, Instant},
};

use config::{ChannelConfig, HealthConfig, RelayConfig};
use futures::{StreamExt, stream::BoxStream};
use llm::{
    LlmError,
    messages::{
        claude::{ClaudeMessage, ClaudeMessageContent, ClaudeRequest, ClaudeRole},
        openai::{
            ChatCompletionRequest, ChatMessage, ChatRole, EmbeddingInput, EmbeddingRequest, ImageRequest,
            ResponsesRequest, Usage,
        },
    },
    provider::{self, Capability, ClaudeStream, ProviderHandle},
};

use crate::{
    classify::{ModelCategory, classify},
    collaborators::{ConsumptionLog, ConsumptionRecord},
    error::{HealthError, HealthResult},
};

const PROBE_PROMPT: &str = "You just need to output 'hi' next.";
const PROBE_MAX_TOKENS: u32 = 10;

/// Error text left behind when an upstream answered a non-streaming call
/// with an event stream.
const EVENT_STREAM_MARKERS: &[&str] = &["data:", "invalid character 'd'", "streaming response"];

/// Probe log entries are attributed to the root user, free of charge.
const PROBE_USER_ID: u64 = 1;
const PROBE_CLIENT_ADDRESS: &str = "127.0.0.1";

/// A successful probe.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSuccess {
    pub model: String,
    pub category: ModelCategory,
    /// The upstream only answered in streaming mode.
    pub stream: bool,
    pub usage: Usage,
}

/// Sends minimal synthetic requests to a channel.
#[derive(Clone)]
pub struct Prober {
    relay: RelayConfig,
    health: HealthConfig,
    log: Arc<dyn ConsumptionLog>,
}

impl Prober {
    pub fn new(relay: RelayConfig, health: HealthConfig, log: Arc<dyn ConsumptionLog>) -> Self {
        Self { relay, health, log }
    }

    /// Probes one channel with `model`, or its configured test model.
    ///
    /// The request is sent non-streaming first. If the failure shows the
    /// upstream answered with an event stream anyway, a chat or responses
    /// model is probed once more in streaming mode, where the first fragment within the
    /// stream timeout counts as success. Every attempt that reaches the
    /// provider is written to the consumption log.
    pub async fn test_one(&self, channel: &ChannelConfig, model: Option<&str>) -> HealthResult<ProbeSuccess> {
        let model = model
            .filter(|model| !model.is_empty())
            .or(channel.test_model.as_deref())
            .filter(|model| !model.is_empty())
            .ok_or(HealthError::MissingTestModel(channel.id))?
            .to_string();

        let category = classify(&model);

        if category == ModelCategory::Unsupported {
            return Err(HealthError::UnsupportedModel(model));
        }

        let handle = provider::resolve(channel, &self.relay).await?;

        log::debug!(
            "Probing channel {} ({}) with {category} model {model}",
            channel.id,
            channel.name
        );

        let started = Instant::now();

        let result = match self.call(&handle, category, &model).await {
            Err(error) if sent_event_stream(&error) => {
                log::debug!("Channel {} answered with an event stream, probing in streaming mode", channel.id);

                self.call_stream(&handle, category, &model)
                    .await
                    .map(|usage| (usage, true))
            }
            result => result.map(|usage| (usage, false)),
        };

        self.journal(channel, &model, started.elapsed(), &result).await;

        let (usage, stream) = result?;

        Ok(ProbeSuccess {
            model,
            category,
            stream,
            usage,
        })
    }

    async fn call(&self, handle: &ProviderHandle, category: ModelCategory, model: &str) -> llm::Result<Usage> {
        match category {
            ModelCategory::Embeddings => {
                let request = EmbeddingRequest {
                    model: model.to_string(),
                    input: EmbeddingInput::Single("hi".to_string()),
                };

                Ok(handle.embeddings(request).await?.usage.unwrap_or_default())
            }
            ModelCategory::Image => {
                let request = ImageRequest {
                    model: model.to_string(),
                    prompt: "A cute cat".to_string(),
                    n: 1,
                    size: None,
                };

                handle.image_generation(request).await?;

                Ok(Usage::default())
            }
            ModelCategory::Responses => {
                let usage = handle
                    .responses(responses_request(model, false))
                    .await?
                    .usage
                    .unwrap_or_default();

                Ok(Usage::new(usage.input_tokens, usage.output_tokens))
            }
            ModelCategory::Chat | ModelCategory::Unsupported => {
                if handle.supports(Capability::Chat) {
                    let response = handle.chat(chat_request(model, None, false)).await?;
                    return Ok(response.usage.unwrap_or_default());
                }

                let response = handle.claude_chat(claude_request(model, false)).await?;

                Ok(Usage::new(response.usage.input_tokens, response.usage.output_tokens))
            }
        }
    }

    async fn call_stream(&self, handle: &ProviderHandle, category: ModelCategory, model: &str) -> llm::Result<Usage> {
        let timeout = self.health.stream_timeout_for(model);

        match category {
            ModelCategory::Chat => chat_stream(handle, model, timeout).await,
            ModelCategory::Responses => {
                let events = handle.responses_stream(responses_request(model, true)).await?;
                first_fragment(events, timeout).await
            }
            category => Err(LlmError::ChannelError(format!(
                "{category} models cannot be probed in streaming mode"
            ))),
        }
    }

    async fn journal(
        &self,
        channel: &ChannelConfig,
        model: &str,
        elapsed: Duration,
        result: &llm::Result<(Usage, bool)>,
    ) {
        let mut metadata = BTreeMap::from([
            ("test_type".to_string(), "channel_test".to_string()),
            ("channel_name".to_string(), channel.name.clone()),
            ("channel_type".to_string(), channel.r#type.to_string()),
        ]);

        let (usage, stream, content) = match result {
            Ok((usage, false)) => (*usage, false, "channel test succeeded"),
            Ok((usage, true)) => (*usage, true, "channel test succeeded (stream)"),
            Err(error) => {
                metadata.insert("error".to_string(), error.to_string());
                (Usage::default(), false, "channel test failed")
            }
        };

        self.log
            .append(ConsumptionRecord {
                user_id: PROBE_USER_ID,
                channel_id: channel.id,
                model: model.to_string(),
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                quota: 0,
                content: content.to_string(),
                elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                stream,
                metadata,
                client_address: PROBE_CLIENT_ADDRESS.to_string(),
            })
            .await;
    }
}

fn sent_event_stream(error: &LlmError) -> bool {
    let text = error.to_string();
    EVENT_STREAM_MARKERS.iter().any(|marker| text.contains(marker))
}

async fn chat_stream(handle: &ProviderHandle, model: &str, timeout: Duration) -> llm::Result<Usage> {
    if handle.supports(Capability::ChatStream) {
        let chunks = handle
            .chat_stream(chat_request(model, Some(PROBE_MAX_TOKENS), true))
            .await?;

        return first_fragment(chunks, timeout).await;
    }

    match handle.claude_chat_stream(claude_request(model, true)).await? {
        ClaudeStream::Native(events) => first_fragment(events, timeout).await,
        ClaudeStream::Chat { chunks, .. } => first_fragment(chunks, timeout).await,
    }
}

fn responses_request(model: &str, stream: bool) -> ResponsesRequest {
    ResponsesRequest {
        model: model.to_string(),
        input: PROBE_PROMPT.to_string(),
        max_output_tokens: None,
        stream,
    }
}

fn chat_request(model: &str, max_tokens: Option<u32>, stream: bool) -> ChatCompletionRequest {
    ChatCompletionRequest {
        model: model.to_string(),
        messages: vec![ChatMessage::text(ChatRole::User, PROBE_PROMPT)],
        max_tokens,
        temperature: None,
        top_p: None,
        stop: None,
        tools: None,
        tool_choice: None,
        parallel_tool_calls: None,
        stream,
    }
}

fn claude_request(model: &str, stream: bool) -> ClaudeRequest {
    ClaudeRequest {
        model: model.to_string(),
        messages: vec![ClaudeMessage {
            role: ClaudeRole::User,
            content: ClaudeMessageContent::Text(PROBE_PROMPT.to_string()),
        }],
        system: None,
        max_tokens: PROBE_MAX_TOKENS,
        temperature: None,
        top_p: None,
        top_k: None,
        stop_sequences: None,
        tools: None,
        tool_choice: None,
        stream: Some(stream),
        metadata: None,
        thinking: None,
    }
}

/// Succeeds on the first fragment arriving within `timeout`.
async fn first_fragment<T>(mut fragments: BoxStream<'static, llm::Result<T>>, timeout: Duration) -> llm::Result<Usage> {
    match tokio::time::timeout(timeout, fragments.next()).await {
        Ok(Some(Ok(_))) => Ok(Usage::default()),
        Ok(Some(Err(error))) => Err(error),
        Ok(None) => Err(LlmError::ConnectionError("stream ended without data".to_string())),
        Err(_) => Err(LlmError::ConnectionError(format!(
            "no stream data within {}s",
            timeout.as_secs()
        ))),
    }
}
