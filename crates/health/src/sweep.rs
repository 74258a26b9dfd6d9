//! What a probe outcome means for a channel.

use std::time::Duration;

use config::ChannelStatus;

use crate::{error::HealthError, policy::DisablePolicy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Action {
    /// Take the channel out of rotation, with the reason.
    Disable(String),
    /// Put an automatically disabled channel back.
    Enable,
    Keep,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Decision {
    pub action: Action,
    /// Store the measured response time.
    pub record_latency: bool,
    /// Report line for this channel.
    pub note: String,
}

impl Decision {
    fn keep(note: impl Into<String>) -> Self {
        Self {
            action: Action::Keep,
            record_latency: false,
            note: note.into(),
        }
    }
}

pub(crate) fn seconds(elapsed: Duration) -> String {
    format!("{:.2}s", elapsed.as_secs_f64())
}

/// Applies the sweep decision matrix to one probe.
///
/// Disabled channels never get disabled again and only come back when they
/// were disabled automatically and answered in time. Enabled channels are
/// disabled for slowness or for a disabling error.
pub(crate) fn decide(
    status: ChannelStatus,
    outcome: Result<(), &HealthError>,
    elapsed: Duration,
    policy: &DisablePolicy,
) -> Decision {
    let took = seconds(elapsed);
    let slow = policy.is_slow(elapsed);

    if !status.is_enabled() {
        return match outcome {
            Err(error) => Decision::keep(format!("test error: {error}, status unchanged")),
            Ok(()) if slow => Decision::keep(format!("response time {took} exceeds threshold, skipped")),
            Ok(()) if status == ChannelStatus::AutoDisabled => Decision {
                action: Action::Enable,
                record_latency: true,
                note: format!("recovered in {took}, enabled"),
            },
            Ok(()) => Decision {
                action: Action::Keep,
                record_latency: true,
                note: "manually disabled, not restored automatically".to_string(),
            },
        };
    }

    if slow {
        let threshold = policy.threshold().map(seconds).unwrap_or_default();
        let reason = format!("response time {took} exceeds threshold {threshold}");

        return Decision {
            note: format!("{reason}, disabled"),
            action: Action::Disable(reason),
            record_latency: false,
        };
    }

    match outcome {
        Err(error) if policy.should_disable(error) => Decision {
            action: Action::Disable(error.to_string()),
            record_latency: false,
            note: format!("test error: {error}, disabled"),
        },
        Err(error) => Decision::keep(format!("test error: {error}")),
        Ok(()) => Decision {
            action: Action::Keep,
            record_latency: true,
            note: format!("test completed in {took}"),
        },
    }
}
