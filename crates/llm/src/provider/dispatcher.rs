use std::sync::Arc;

use config::{ChannelConfig, ChannelType, RelayConfig};

use crate::{
    error::{LlmError, LlmResult},
    provider::{
        Capability, CapabilitySet, Provider, ProviderHandle,
        ali::{AliProvider, DEFAULT_ALI_API_URL},
        anthropic::{AnthropicProvider, ClaudeAuth, DEFAULT_ANTHROPIC_API_URL},
        bedrock::BedrockProvider,
        gemini::{DEFAULT_GEMINI_API_URL, GeminiProvider},
        openai::{DEFAULT_OPENAI_API_URL, OpenAiProvider},
        vertex::VertexProvider,
        zhipu::{DEFAULT_ZHIPU_API_URL, ZhipuProvider},
    },
};

/// Default endpoint and capabilities of the OpenAI-compatible families.
fn openai_compatible(channel_type: ChannelType) -> Option<(&'static str, CapabilitySet)> {
    let with_embeddings = CapabilitySet::chat().with(Capability::Embeddings);

    let entry = match channel_type {
        ChannelType::OpenAI => (
            DEFAULT_OPENAI_API_URL,
            with_embeddings
                .with(Capability::ImageGeneration)
                .with(Capability::Responses)
                .with(Capability::ResponsesStream),
        ),
        ChannelType::OpenRouter => ("https://openrouter.ai/api/v1", CapabilitySet::chat()),
        ChannelType::Deepseek => ("https://api.deepseek.com/v1", CapabilitySet::chat()),
        ChannelType::Moonshot => ("https://api.moonshot.cn/v1", CapabilitySet::chat()),
        ChannelType::Mistral => ("https://api.mistral.ai/v1", with_embeddings),
        ChannelType::Groq => ("https://api.groq.com/openai/v1", CapabilitySet::chat()),
        ChannelType::Ollama => ("http://localhost:11434/v1", with_embeddings),
        ChannelType::Siliconflow => ("https://api.siliconflow.cn/v1", with_embeddings),
        ChannelType::XAI => ("https://api.x.ai/v1", CapabilitySet::chat()),
        _ => return None,
    };

    Some(entry)
}

/// Builds the provider handle for a channel.
pub async fn resolve(channel: &ChannelConfig, relay: &RelayConfig) -> LlmResult<ProviderHandle> {
    let name = channel.name.clone();
    let key = channel.key.clone();
    let prefix = relay.provider_error_prefix;
    let base_url = |default: &str| channel.base_url.clone().unwrap_or_else(|| default.to_string());

    log::debug!("Resolving provider for channel {} ({})", channel.id, channel.r#type);

    let (provider, capabilities): (Arc<dyn Provider>, CapabilitySet) = match channel.r#type {
        ChannelType::Anthropic => (
            Arc::new(AnthropicProvider::new(
                name,
                format!("{}/messages", base_url(DEFAULT_ANTHROPIC_API_URL).trim_end_matches('/')),
                key,
                ClaudeAuth::ApiKey,
                prefix,
            )?),
            CapabilitySet::claude(),
        ),
        ChannelType::Zhipu => (
            Arc::new(ZhipuProvider::new(name, &base_url(DEFAULT_ZHIPU_API_URL), key, prefix)?),
            CapabilitySet::chat()
                .union(CapabilitySet::claude())
                .with(Capability::Embeddings),
        ),
        ChannelType::Ali => (
            Arc::new(AliProvider::new(name, base_url(DEFAULT_ALI_API_URL), key, prefix)?),
            CapabilitySet::chat()
                .union(CapabilitySet::claude())
                .with(Capability::Embeddings),
        ),
        ChannelType::Gemini => (
            Arc::new(GeminiProvider::new(name, base_url(DEFAULT_GEMINI_API_URL), key, prefix)?),
            CapabilitySet::chat(),
        ),
        ChannelType::Bedrock => (
            Arc::new(BedrockProvider::new(name, &key, channel.base_url.as_deref()).await?),
            CapabilitySet::claude(),
        ),
        ChannelType::VertexAI => (
            Arc::new(VertexProvider::new(name, &key, channel.base_url.as_deref(), prefix)?),
            CapabilitySet::claude(),
        ),
        ChannelType::Custom => {
            let Some(url) = channel.base_url.clone() else {
                return Err(LlmError::InternalError(Some(format!(
                    "channel {} is a custom channel without base_url",
                    channel.id
                ))));
            };

            (
                Arc::new(OpenAiProvider::new(name, url, key, prefix)?),
                CapabilitySet::chat().with(Capability::Embeddings),
            )
        }
        other => match openai_compatible(other) {
            Some((default_url, capabilities)) => (
                Arc::new(OpenAiProvider::new(name, base_url(default_url), key, prefix)?),
                capabilities,
            ),
            None => {
                log::warn!("Channel {} has unsupported type {other}", channel.id);
                return Err(LlmError::ChannelError(format!("channel type {other} is not supported")));
            }
        },
    };

    Ok(ProviderHandle::new(provider, capabilities))
}
