use std::time::Duration;

use axum::http;
use reqwest::Client;

use crate::error::{LlmError, LlmResult};

/// Builder shared by every HTTP-based provider. Streams are bounded by the
/// relay read timeout, so only connection setup has a deadline here.
pub(crate) fn default_http_client_builder() -> reqwest::ClientBuilder {
    let mut headers = http::HeaderMap::new();
    headers.insert(http::header::CONNECTION, http::HeaderValue::from_static("keep-alive"));

    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        // Idle connections are recycled quickly so DNS changes get picked up.
        .pool_idle_timeout(Some(Duration::from_secs(5)))
        .tcp_nodelay(true)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .default_headers(headers)
}

pub(crate) fn build_http_client() -> LlmResult<Client> {
    default_http_client_builder().build().map_err(|e| {
        log::error!("Failed to create HTTP client: {e}");
        LlmError::InternalError(None)
    })
}
