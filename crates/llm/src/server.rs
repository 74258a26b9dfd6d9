use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use config::Config;

use crate::{
    error::{LlmError, LlmResult},
    provider::{self, ProviderHandle},
    relay::ClaudeRelay,
};

/// Picks the channel that serves a model.
#[async_trait]
pub trait ChannelSelector: Send + Sync {
    /// Id of an enabled channel serving `model`, if any.
    async fn select(&self, model: &str) -> Option<u64>;
}

/// Shared state of the relay endpoints.
#[derive(Clone)]
pub(crate) struct LlmServer {
    shared: Arc<LlmServerInner>,
}

struct LlmServerInner {
    /// Provider handles by channel id, built once at startup.
    handles: HashMap<u64, ProviderHandle>,
    selector: Arc<dyn ChannelSelector>,
    relay: ClaudeRelay,
}

impl LlmServer {
    /// Resolves every configured channel. Channels that cannot be resolved are
    /// logged and left out; requests routed to them fail with a channel error.
    pub async fn new(config: &Config, selector: Arc<dyn ChannelSelector>) -> Self {
        let mut handles = HashMap::with_capacity(config.channels.len());

        for channel in &config.channels {
            match provider::resolve(channel, &config.relay).await {
                Ok(handle) => {
                    handles.insert(channel.id, handle);
                }
                Err(e) => log::warn!("Channel {} ({}) is unavailable: {e}", channel.id, channel.name),
            }
        }

        log::debug!(
            "Relay initialized with {} of {} channel(s)",
            handles.len(),
            config.channels.len()
        );

        Self {
            shared: Arc::new(LlmServerInner {
                handles,
                selector,
                relay: ClaudeRelay::new(&config.relay),
            }),
        }
    }

    pub fn relay(&self) -> &ClaudeRelay {
        &self.shared.relay
    }

    /// Handle of the channel currently serving `model`.
    pub async fn handle_for(&self, model: &str) -> LlmResult<ProviderHandle> {
        let Some(channel_id) = self.shared.selector.select(model).await else {
            log::debug!("No enabled channel serves model {model}");
            return Err(LlmError::ChannelError(format!("no available channel for model {model}")));
        };

        match self.shared.handles.get(&channel_id) {
            Some(handle) => {
                log::debug!("Model {model} routed to channel {channel_id} ({})", handle.name());
                Ok(handle.clone())
            }
            None => Err(LlmError::ChannelError(format!("channel {channel_id} is not available"))),
        }
    }
}
