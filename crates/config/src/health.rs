//! Channel health monitor settings.

use std::time::Duration;

use duration_str::deserialize_duration;
use serde::Deserialize;

/// Settings for channel probes and fleet sweeps.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthConfig {
    /// Pause before each probe of a sweep.
    #[serde(deserialize_with = "deserialize_duration")]
    pub request_interval: Duration,
    /// Latency above which an enabled channel gets disabled. Zero means no threshold.
    #[serde(deserialize_with = "deserialize_duration")]
    pub disable_threshold: Duration,
    /// Allow probes to disable channels on credential or quota errors.
    pub auto_disable: bool,
    /// Minutes between automatic sweeps. Zero turns them off.
    pub frequency_minutes: u64,
    /// Read timeout for streaming probes.
    #[serde(deserialize_with = "deserialize_duration")]
    pub stream_timeout: Duration,
    /// Read timeout for streaming probes of slow backend families.
    #[serde(deserialize_with = "deserialize_duration")]
    pub slow_stream_timeout: Duration,
    /// Model name fragments identifying slow backend families.
    pub slow_stream_markers: Vec<String>,
    /// Webhook receiving sweep reports. Reports are logged when unset.
    pub notify_webhook: Option<String>,
}

impl HealthConfig {
    /// The stream read timeout to use when probing the given model.
    pub fn stream_timeout_for(&self, model: &str) -> Duration {
        if self.slow_stream_markers.iter().any(|marker| model.contains(marker.as_str())) {
            self.slow_stream_timeout
        } else {
            self.stream_timeout
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            request_interval: Duration::ZERO,
            disable_threshold: Duration::ZERO,
            auto_disable: true,
            frequency_minutes: 0,
            stream_timeout: Duration::from_secs(10),
            slow_stream_timeout: Duration::from_secs(15),
            slow_stream_markers: vec!["gemini".to_string()],
            notify_webhook: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::HealthConfig;

    #[test]
    fn gemini_models_get_the_longer_stream_timeout() {
        let config = HealthConfig::default();

        assert_eq!(config.stream_timeout_for("gemini-1.5-pro"), Duration::from_secs(15));
        assert_eq!(config.stream_timeout_for("gpt-4o-mini"), Duration::from_secs(10));
    }
}
