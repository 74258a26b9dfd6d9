//! Interfaces the monitor needs from the rest of the system.

use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use config::{ChannelConfig, ChannelStatus};
use serde::Serialize;

use crate::error::CollaboratorError;

/// Channel lookup and mutation.
#[async_trait]
pub trait ChannelStore: Send + Sync {
    async fn channel(&self, id: u64) -> Result<Option<ChannelConfig>, CollaboratorError>;

    async fn channels(&self) -> Result<Vec<ChannelConfig>, CollaboratorError>;

    /// Changes a channel's status. `reason` explains an automatic change.
    async fn set_status(&self, id: u64, status: ChannelStatus, reason: &str) -> Result<(), CollaboratorError>;

    async fn update_response_time(&self, id: u64, elapsed: Duration) -> Result<(), CollaboratorError>;
}

/// One entry of the consumption log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsumptionRecord {
    pub user_id: u64,
    pub channel_id: u64,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub quota: i64,
    pub content: String,
    pub elapsed_ms: u64,
    pub stream: bool,
    pub metadata: BTreeMap<String, String>,
    pub client_address: String,
}

#[async_trait]
pub trait ConsumptionLog: Send + Sync {
    async fn append(&self, record: ConsumptionRecord);
}

/// Delivers human-readable reports.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, title: &str, body: &str) -> Result<(), CollaboratorError>;
}
