//! HTTP surface of the gateway: relay endpoints, channel tests and liveness,
//! backed by in-memory channel state built from the configuration.

mod consumption;
mod error;
pub mod logger;
mod notify;
mod registry;

use std::{net::SocketAddr, sync::Arc};

use axum::{Router, http::StatusCode, routing::get};
use config::{Config, HealthConfig};
use health::{HealthMonitor, Notifier};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub use error::Error;
pub use registry::ChannelRegistry;

use crate::{
    consumption::LoggedConsumption,
    notify::{LogNotifier, WebhookNotifier},
};

pub type Result<T> = std::result::Result<T, Error>;

pub struct ServeConfig {
    pub listen_address: SocketAddr,
    pub config: Config,
    /// Stops the server gracefully when cancelled.
    pub shutdown_signal: CancellationToken,
}

pub async fn serve(
    ServeConfig {
        listen_address,
        config,
        shutdown_signal,
    }: ServeConfig,
) -> crate::Result<()> {
    let registry = Arc::new(ChannelRegistry::new(&config.channels));
    let monitor = HealthMonitor::new(&config, registry.clone(), Arc::new(LoggedConsumption), notifier(&config.health));

    let app = router(&config, registry, monitor.clone()).await;
    let listener = TcpListener::bind(listen_address).await.map_err(Error::Bind)?;

    log::info!(
        "Serving {} channel(s) at http://{listen_address}/v1/messages",
        config.channels.len()
    );

    let scheduler = monitor.spawn_scheduler();

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown_signal.cancelled().await })
        .await
        .map_err(Error::Server)?;

    if let Some(scheduler) = scheduler {
        scheduler.abort();
    }

    log::info!("Server stopped");

    Ok(())
}

/// All gateway routes over the given channel state.
pub async fn router(config: &Config, registry: Arc<ChannelRegistry>, monitor: HealthMonitor) -> Router {
    let mut app = llm::router(config, registry).await.merge(channel_test::router(monitor));

    if config.server.health.enabled {
        app = app.route(&config.server.health.path, get(|| async { StatusCode::OK }));
    }

    app
}

fn notifier(config: &HealthConfig) -> Arc<dyn Notifier> {
    let Some(url) = &config.notify_webhook else {
        return Arc::new(LogNotifier);
    };

    match WebhookNotifier::new(url.clone()) {
        Ok(notifier) => Arc::new(notifier),
        Err(e) => {
            log::warn!("Sweep reports will be logged instead of posted: {e}");
            Arc::new(LogNotifier)
        }
    }
}
