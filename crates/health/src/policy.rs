use std::time::Duration;

use config::HealthConfig;
use llm::UpstreamError;

use crate::error::HealthError;

/// Error types and codes meaning the credential or the account is unusable.
const DISABLING_CODES: &[&str] = &[
    "invalid_api_key",
    "authentication_error",
    "permission_error",
    "insufficient_quota",
    "account_deactivated",
    "billing_not_active",
    "organization_restricted",
];

/// Lowercase message fragments with the same meaning.
const DISABLING_MESSAGES: &[&str] = &[
    "incorrect api key",
    "invalid api key",
    "api key not valid",
    "api key expired",
    "api key has expired",
    "key is expired",
    "credit balance is too low",
    "insufficient balance",
    "exceeded your current quota",
    "organization has been disabled",
    "security token included in the request is invalid",
];

/// Decides when probes disable channels.
#[derive(Debug, Clone, Copy)]
pub struct DisablePolicy {
    auto_disable: bool,
    /// `None` when latency never disables.
    threshold: Option<Duration>,
}

impl DisablePolicy {
    pub fn new(config: &HealthConfig) -> Self {
        Self {
            auto_disable: config.auto_disable,
            threshold: (!config.disable_threshold.is_zero()).then_some(config.disable_threshold),
        }
    }

    pub fn threshold(&self) -> Option<Duration> {
        self.threshold
    }

    pub fn is_slow(&self, elapsed: Duration) -> bool {
        self.threshold.is_some_and(|threshold| elapsed > threshold)
    }

    /// Whether a probe failure should take the channel out of rotation.
    /// Only answers from the upstream count; local and network failures never do.
    pub fn should_disable(&self, error: &HealthError) -> bool {
        self.auto_disable && error.upstream().is_some_and(is_disabling)
    }
}

fn is_disabling(error: &UpstreamError) -> bool {
    if matches!(error.status, 401 | 403) {
        return true;
    }

    let listed = |value: &str| DISABLING_CODES.contains(&value);

    if listed(&error.error_type) || error.code.as_deref().is_some_and(listed) {
        return true;
    }

    let message = error.message.to_lowercase();
    DISABLING_MESSAGES.iter().any(|fragment| message.contains(fragment))
}
