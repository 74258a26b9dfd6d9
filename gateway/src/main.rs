use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use anyhow::Context;
use args::Args;
use clap::Parser;
use config::Config;
use server::ServeConfig;
use tokio_util::sync::CancellationToken;

mod args;

const DEFAULT_LISTEN_ADDRESS: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 3000);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    server::logger::init(&args.log);

    let config = Config::load(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config.display()))?;

    let listen_address = args
        .listen_address
        .or(config.server.listen_address)
        .unwrap_or(DEFAULT_LISTEN_ADDRESS);

    let shutdown_signal = CancellationToken::new();
    let ctrl_c = shutdown_signal.clone();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                log::info!("Received ctrl-c, shutting down");
                ctrl_c.cancel();
            }
            Err(e) => log::error!("Failed to listen for ctrl-c: {e}"),
        }
    });

    server::serve(ServeConfig {
        listen_address,
        config,
        shutdown_signal,
    })
    .await
    .context("server failed")?;

    Ok(())
}
