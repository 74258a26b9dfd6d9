//! Streaming relay and protocol conversion settings.

use std::time::Duration;

use duration_str::deserialize_duration;
use serde::Deserialize;

/// Settings for the request relay.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    /// Longest wait between two upstream stream fragments before the relay gives up.
    #[serde(deserialize_with = "deserialize_duration")]
    pub stream_read_timeout: Duration,
    /// Prefix upstream error messages with `Provider API error: `.
    pub provider_error_prefix: bool,
    /// Run the content-safety check before relaying a request.
    pub content_safety: bool,
    /// Keywords rejected by the built-in content-safety checker.
    pub blocked_keywords: Vec<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            stream_read_timeout: Duration::from_secs(60),
            provider_error_prefix: true,
            content_safety: false,
            blocked_keywords: Vec::new(),
        }
    }
}
