use std::time::Duration;

use async_trait::async_trait;
use health::{CollaboratorError, Notifier};
use serde::Serialize;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Writes reports to the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, title: &str, body: &str) -> Result<(), CollaboratorError> {
        log::info!("{title}\n{body}");
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookMessage<'a> {
    title: &'a str,
    body: &'a str,
}

/// Posts reports as `{"title", "body"}` JSON to a webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Result<Self, CollaboratorError> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .map_err(|e| CollaboratorError(format!("failed to build webhook client: {e}")))?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, title: &str, body: &str) -> Result<(), CollaboratorError> {
        let response = self
            .client
            .post(&self.url)
            .json(&WebhookMessage { title, body })
            .send()
            .await
            .map_err(|e| CollaboratorError(format!("webhook request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(CollaboratorError(format!("webhook answered {}", response.status())));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
    use health::Notifier;
    use insta::assert_json_snapshot;
    use serde_json::Value;
    use tokio::net::TcpListener;

    use super::WebhookNotifier;

    async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        format!("http://{address}")
    }

    #[tokio::test]
    async fn reports_are_posted_as_json() {
        let received = Arc::new(Mutex::new(Vec::new()));

        let url = serve(
            Router::new()
                .route(
                    "/hook",
                    post(|State(received): State<Arc<Mutex<Vec<Value>>>>, Json(body): Json<Value>| async move {
                        received.lock().unwrap().push(body);
                        StatusCode::NO_CONTENT
                    }),
                )
                .with_state(received.clone()),
        )
        .await;

        let notifier = WebhookNotifier::new(format!("{url}/hook")).unwrap();
        notifier.send("Channel test finished", "**Channel a - #1 - enabled** : ok").await.unwrap();

        let received = received.lock().unwrap();

        assert_json_snapshot!(&received[0], @r#"
        {
          "body": "**Channel a - #1 - enabled** : ok",
          "title": "Channel test finished"
        }
        "#);
    }

    #[tokio::test]
    async fn failure_status_is_an_error() {
        let url = serve(Router::new().route("/hook", post(|| async { StatusCode::BAD_GATEWAY }))).await;

        let notifier = WebhookNotifier::new(format!("{url}/hook")).unwrap();

        assert!(notifier.send("t", "b").await.is_err());
    }
}
