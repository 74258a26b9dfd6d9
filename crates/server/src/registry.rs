use std::{
    sync::{PoisonError, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use config::{ChannelConfig, ChannelStatus};
use health::{ChannelStore, CollaboratorError};
use llm::ChannelSelector;

struct ChannelEntry {
    config: ChannelConfig,
    response_time: Option<Duration>,
    /// Why the channel was last disabled automatically.
    disabled_reason: Option<String>,
}

/// The configured channels with their runtime status, kept in memory.
pub struct ChannelRegistry {
    entries: RwLock<Vec<ChannelEntry>>,
}

impl ChannelRegistry {
    pub fn new(channels: &[ChannelConfig]) -> Self {
        let entries = channels
            .iter()
            .map(|config| ChannelEntry {
                config: config.clone(),
                response_time: None,
                disabled_reason: None,
            })
            .collect();

        Self {
            entries: RwLock::new(entries),
        }
    }

    pub fn response_time(&self, id: u64) -> Option<Duration> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.iter().find(|entry| entry.config.id == id)?.response_time
    }

    pub fn disabled_reason(&self, id: u64) -> Option<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.iter().find(|entry| entry.config.id == id)?.disabled_reason.clone()
    }

    fn update<F>(&self, id: u64, f: F) -> Result<(), CollaboratorError>
    where
        F: FnOnce(&mut ChannelEntry),
    {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        match entries.iter_mut().find(|entry| entry.config.id == id) {
            Some(entry) => {
                f(entry);
                Ok(())
            }
            None => Err(CollaboratorError(format!("unknown channel {id}"))),
        }
    }
}

#[async_trait]
impl ChannelSelector for ChannelRegistry {
    /// First enabled channel, in configuration order, serving the model.
    async fn select(&self, model: &str) -> Option<u64> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);

        entries
            .iter()
            .find(|entry| entry.config.status.is_enabled() && entry.config.serves(model))
            .map(|entry| entry.config.id)
    }
}

#[async_trait]
impl ChannelStore for ChannelRegistry {
    async fn channel(&self, id: u64) -> Result<Option<ChannelConfig>, CollaboratorError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.iter().find(|entry| entry.config.id == id).map(|entry| entry.config.clone()))
    }

    async fn channels(&self) -> Result<Vec<ChannelConfig>, CollaboratorError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.iter().map(|entry| entry.config.clone()).collect())
    }

    async fn set_status(&self, id: u64, status: ChannelStatus, reason: &str) -> Result<(), CollaboratorError> {
        log::info!("Channel {id} is now {status}: {reason}");

        self.update(id, |entry| {
            entry.config.status = status;
            entry.disabled_reason = (status == ChannelStatus::AutoDisabled).then(|| reason.to_string());
        })
    }

    async fn update_response_time(&self, id: u64, elapsed: Duration) -> Result<(), CollaboratorError> {
        self.update(id, |entry| entry.response_time = Some(elapsed))
    }
}
