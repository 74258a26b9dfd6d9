use llm::{LlmError, UpstreamError};
use thiserror::Error;

pub type HealthResult<T> = std::result::Result<T, HealthError>;

/// Failure reported by a store, log or notifier implementation.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct CollaboratorError(pub String);

#[derive(Debug, Error)]
pub enum HealthError {
    /// Another sweep holds the single-flight guard.
    #[error("a channel sweep is already running")]
    AlreadyRunning,

    #[error("channel {0} does not exist")]
    ChannelNotFound(u64),

    /// Neither the caller nor the channel named a model to probe with.
    #[error("channel {0} has no test model")]
    MissingTestModel(u64),

    #[error("model {0} cannot be probed")]
    UnsupportedModel(String),

    #[error("channel store failure: {0}")]
    Store(#[from] CollaboratorError),

    /// The probe request itself failed.
    #[error(transparent)]
    Probe(#[from] LlmError),
}

impl HealthError {
    /// The upstream's answer, when the probe reached the provider.
    pub fn upstream(&self) -> Option<&UpstreamError> {
        match self {
            Self::Probe(LlmError::Upstream(error)) => Some(error),
            _ => None,
        }
    }
}
