use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "gateway", version, about = "Relays Claude and OpenAI requests to upstream channels")]
pub struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "GATEWAY_CONFIG_PATH", default_value = "./gateway.toml")]
    pub config: PathBuf,

    /// Overrides `server.listen_address` from the configuration.
    #[arg(short, long, env = "GATEWAY_LISTEN_ADDRESS")]
    pub listen_address: Option<SocketAddr>,

    /// Log filter, e.g. `info` or `server=debug,llm=debug`.
    #[arg(long, env = "GATEWAY_LOG", default_value = "info")]
    pub log: String,
}
