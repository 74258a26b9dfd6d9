use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use config::{ChannelConfig, ChannelStatus, Config};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::{
    collaborators::{ChannelStore, ConsumptionLog, Notifier},
    error::{HealthError, HealthResult},
    policy::DisablePolicy,
    probe::Prober,
    report::{REPORT_TITLE, SweepReport},
    scheduler,
    single_flight::SingleFlight,
    sweep::{Action, Decision, decide},
};

/// Outcome of testing one channel on demand.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestResult {
    pub success: bool,
    pub message: String,
    /// Seconds spent probing.
    pub time: f64,
}

/// Probes channels and keeps their status in line with the outcomes.
#[derive(Clone)]
pub struct HealthMonitor {
    shared: Arc<HealthMonitorInner>,
}

struct HealthMonitorInner {
    store: Arc<dyn ChannelStore>,
    notifier: Arc<dyn Notifier>,
    prober: Prober,
    policy: DisablePolicy,
    request_interval: Duration,
    frequency: Duration,
    flight: SingleFlight,
}

impl HealthMonitor {
    pub fn new(
        config: &Config,
        store: Arc<dyn ChannelStore>,
        log: Arc<dyn ConsumptionLog>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let health = &config.health;

        Self {
            shared: Arc::new(HealthMonitorInner {
                store,
                notifier,
                prober: Prober::new(config.relay.clone(), health.clone(), log),
                policy: DisablePolicy::new(health),
                request_interval: health.request_interval,
                frequency: Duration::from_secs(health.frequency_minutes.saturating_mul(60)),
                flight: SingleFlight::default(),
            }),
        }
    }

    /// Probes one channel. Probe failures are part of the result; a disabling
    /// failure also takes an enabled channel out of rotation.
    pub async fn test_channel(&self, id: u64, model: Option<&str>) -> HealthResult<TestResult> {
        let shared = &self.shared;
        let channel = shared.store.channel(id).await?.ok_or(HealthError::ChannelNotFound(id))?;

        let started = Instant::now();
        let outcome = shared.prober.test_one(&channel, model).await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(success) => {
                log::debug!("Channel {id} answered {} in {elapsed:?}", success.model);
                shared.store.update_response_time(id, elapsed).await?;

                Ok(TestResult {
                    success: true,
                    message: String::new(),
                    time: elapsed.as_secs_f64(),
                })
            }
            Err(error) => {
                log::warn!("Channel {id} ({}) failed its test: {error}", channel.name);

                if channel.status.is_enabled() && shared.policy.should_disable(&error) {
                    log::warn!("Disabling channel {id} ({})", channel.name);

                    shared
                        .store
                        .set_status(id, ChannelStatus::AutoDisabled, &error.to_string())
                        .await?;
                }

                Ok(TestResult {
                    success: false,
                    message: error.to_string(),
                    time: elapsed.as_secs_f64(),
                })
            }
        }
    }

    /// Lists the channels and sweeps them in the background. Fails with
    /// [`HealthError::AlreadyRunning`] while another sweep is in progress, and
    /// with [`HealthError::Store`] when the channels cannot be listed.
    pub async fn sweep(&self, notify: bool) -> HealthResult<()> {
        let Some(flight) = self.shared.flight.try_acquire() else {
            return Err(HealthError::AlreadyRunning);
        };

        let channels = self.shared.store.channels().await?;
        let monitor = self.clone();

        tokio::spawn(async move {
            let _flight = flight;
            monitor.run_sweep(&channels, notify).await;
        });

        Ok(())
    }

    pub fn is_sweeping(&self) -> bool {
        self.shared.flight.is_running()
    }

    /// Spawns the periodic sweep, unless it is turned off.
    pub fn spawn_scheduler(&self) -> Option<JoinHandle<()>> {
        let every = self.shared.frequency;

        if every.is_zero() {
            return None;
        }

        log::info!("Sweeping channels every {} minute(s)", every.as_secs() / 60);

        Some(tokio::spawn(scheduler::run(self.clone(), every)))
    }

    /// Probes channels one after another and applies the decision matrix.
    pub(crate) async fn run_sweep(&self, channels: &[ChannelConfig], notify: bool) -> SweepReport {
        let shared = &self.shared;
        let mut report = SweepReport::default();

        log::info!("Sweeping {} channel(s)", channels.len());

        for channel in channels {
            tokio::time::sleep(shared.request_interval).await;

            let started = Instant::now();
            let outcome = shared.prober.test_one(channel, None).await;
            let elapsed = started.elapsed();

            let decision = decide(channel.status, outcome.as_ref().map(|_| ()), elapsed, &shared.policy);

            if let Err(e) = self.apply(channel, &decision, elapsed).await {
                log::error!("Failed to update channel {}: {e}", channel.id);
            }

            report.push(channel, &decision.note);
        }

        if notify {
            let delivery = shared.notifier.send(REPORT_TITLE, &report.render()).await;

            if let Err(e) = delivery {
                log::error!("Failed to deliver the sweep report: {e}");
            }
        }

        log::info!("Channel sweep finished");

        report
    }

    async fn apply(&self, channel: &ChannelConfig, decision: &Decision, elapsed: Duration) -> HealthResult<()> {
        let store = &self.shared.store;

        match &decision.action {
            Action::Disable(reason) => {
                log::warn!("Disabling channel {} ({}): {reason}", channel.id, channel.name);
                store.set_status(channel.id, ChannelStatus::AutoDisabled, reason).await?;
            }
            Action::Enable => {
                log::info!("Enabling channel {} ({})", channel.id, channel.name);
                store
                    .set_status(channel.id, ChannelStatus::Enabled, "channel test succeeded")
                    .await?;
            }
            Action::Keep => (),
        }

        if decision.record_latency {
            store.update_response_time(channel.id, elapsed).await?;
        }

        Ok(())
    }
}
