//! Configuration for the relay gateway.

mod channel;
mod error;
mod health;
mod loader;
mod relay;
mod server;

use std::path::Path;

use serde::Deserialize;

pub use channel::{ChannelConfig, ChannelStatus, ChannelType};
pub use error::Error;
pub use health::HealthConfig;
pub use relay::RelayConfig;
pub use server::{HealthEndpointConfig, ServerConfig};

pub type Result<T> = std::result::Result<T, Error>;

/// Root of the gateway configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Streaming relay and conversion settings.
    pub relay: RelayConfig,
    /// Channel health monitor settings.
    pub health: HealthConfig,
    /// Upstream channels, in routing order.
    pub channels: Vec<ChannelConfig>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> crate::Result<Config> {
        loader::load(path)
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use crate::Config;

    #[test]
    fn all_values() {
        let config = indoc! {r#"
            [server]
            listen_address = "127.0.0.1:8080"

            [server.health]
            enabled = false
            path = "/status"

            [relay]
            stream_read_timeout = "30s"
            provider_error_prefix = false
            content_safety = true
            blocked_keywords = ["forbidden"]

            [health]
            request_interval = "2s"
            disable_threshold = "20s"
            auto_disable = false
            frequency_minutes = 30
            stream_timeout = "8s"
            slow_stream_timeout = "20s"
            slow_stream_markers = ["gemini", "vertex"]
            notify_webhook = "https://hooks.example.com/notify"

            [[channels]]
            id = 7
            name = "primary"
            type = "openai"
            key = "sk-test"
            base_url = "https://api.example.com"
            status = "auto_disabled"
            weight = 3
            test_model = "gpt-4o-mini"
            models = ["gpt-4o-mini", "gpt-4o"]
        "#};

        let config: Config = toml::from_str(config).unwrap();

        insta::assert_debug_snapshot!(&config, @r#"
        Config {
            server: ServerConfig {
                listen_address: Some(
                    127.0.0.1:8080,
                ),
                health: HealthEndpointConfig {
                    enabled: false,
                    path: "/status",
                },
            },
            relay: RelayConfig {
                stream_read_timeout: 30s,
                provider_error_prefix: false,
                content_safety: true,
                blocked_keywords: [
                    "forbidden",
                ],
            },
            health: HealthConfig {
                request_interval: 2s,
                disable_threshold: 20s,
                auto_disable: false,
                frequency_minutes: 30,
                stream_timeout: 8s,
                slow_stream_timeout: 20s,
                slow_stream_markers: [
                    "gemini",
                    "vertex",
                ],
                notify_webhook: Some(
                    "https://hooks.example.com/notify",
                ),
            },
            channels: [
                ChannelConfig {
                    id: 7,
                    name: "primary",
                    type: OpenAI,
                    key: SecretBox<str>([REDACTED]),
                    base_url: Some(
                        "https://api.example.com",
                    ),
                    status: AutoDisabled,
                    weight: 3,
                    test_model: Some(
                        "gpt-4o-mini",
                    ),
                    models: [
                        "gpt-4o-mini",
                        "gpt-4o",
                    ],
                },
            ],
        }
        "#);
    }

    #[test]
    fn defaults() {
        let config: Config = toml::from_str("").unwrap();

        insta::assert_debug_snapshot!(&config, @r#"
        Config {
            server: ServerConfig {
                listen_address: None,
                health: HealthEndpointConfig {
                    enabled: true,
                    path: "/health",
                },
            },
            relay: RelayConfig {
                stream_read_timeout: 60s,
                provider_error_prefix: true,
                content_safety: false,
                blocked_keywords: [],
            },
            health: HealthConfig {
                request_interval: 0ns,
                disable_threshold: 0ns,
                auto_disable: true,
                frequency_minutes: 0,
                stream_timeout: 10s,
                slow_stream_timeout: 15s,
                slow_stream_markers: [
                    "gemini",
                ],
                notify_webhook: None,
            },
            channels: [],
        }
        "#);
    }
}
