//! Claude models published on Vertex AI (`rawPredict` / `streamRawPredict`).
//!
//! The channel key is `location|project_id|access_token`; the token is sent as
//! a bearer credential and must be refreshed by whoever manages the channel.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::{
    convert,
    error::{LlmError, LlmResult},
    http_client::build_http_client,
    messages::claude::{ClaudeRequest, ClaudeResponse, ClaudeStreamEvent},
    provider::{ClaudeStream, Provider},
    requester::{Requester, claude_error, json_event_stream},
};

const VERTEX_ANTHROPIC_VERSION: &str = "vertex-2023-10-16";

#[derive(Debug)]
struct VertexCredentials {
    location: String,
    project_id: String,
    access_token: SecretString,
}

impl VertexCredentials {
    fn parse(key: &SecretString) -> LlmResult<Self> {
        let parts: Vec<&str> = key.expose_secret().split('|').map(str::trim).collect();

        let [location, project_id, access_token] = parts.as_slice() else {
            return Err(LlmError::InternalError(Some(
                "Vertex AI key must be location|project_id|access_token".to_string(),
            )));
        };

        Ok(Self {
            location: location.to_string(),
            project_id: project_id.to_string(),
            access_token: access_token.to_string().into(),
        })
    }

    /// The `global` location has no regional host.
    fn default_host(&self) -> String {
        match self.location.as_str() {
            "global" => "https://aiplatform.googleapis.com".to_string(),
            location => format!("https://{location}-aiplatform.googleapis.com"),
        }
    }
}

pub(crate) struct VertexProvider {
    client: Client,
    requester: Requester,
    /// `.../publishers/anthropic/models`, the model and method are appended per call.
    models_url: String,
    access_token: SecretString,
    name: String,
}

impl VertexProvider {
    pub fn new(name: String, key: &SecretString, base_url: Option<&str>, prefix_errors: bool) -> LlmResult<Self> {
        let credentials = VertexCredentials::parse(key)?;

        let host = base_url.map_or_else(|| credentials.default_host(), |url| url.trim_end_matches('/').to_string());
        let models_url = format!(
            "{host}/v1/projects/{}/locations/{}/publishers/anthropic/models",
            credentials.project_id, credentials.location
        );

        Ok(Self {
            client: build_http_client()?,
            requester: Requester::new(claude_error, prefix_errors),
            models_url,
            access_token: credentials.access_token,
            name,
        })
    }

    fn post(&self, model: &str, method: &str) -> RequestBuilder {
        self.client
            .post(format!("{}/{model}:{method}", self.models_url))
            .bearer_auth(self.access_token.expose_secret())
    }
}

/// The model travels in the URL; the body names the Vertex API version instead.
fn predict_body(request: &ClaudeRequest, stream: bool) -> LlmResult<Value> {
    convert::validate(request)?;

    let mut body = serde_json::to_value(request)
        .map_err(|e| LlmError::InvalidRequest(format!("Failed to serialize request: {e}")))?;

    if let Value::Object(map) = &mut body {
        map.remove("model");
        map.insert("stream".to_string(), Value::Bool(stream));
        map.insert(
            "anthropic_version".to_string(),
            Value::String(VERTEX_ANTHROPIC_VERSION.to_string()),
        );
    }

    Ok(body)
}

#[async_trait]
impl Provider for VertexProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn claude_chat(&self, request: ClaudeRequest) -> LlmResult<ClaudeResponse> {
        log::debug!("Sending rawPredict for model {} to {}", request.model, self.name);

        let body = predict_body(&request, false)?;
        let builder = Requester::json_body(self.post(&request.model, "rawPredict"), &body)?;

        self.requester.send(builder).await
    }

    async fn claude_chat_stream(&self, request: ClaudeRequest) -> LlmResult<ClaudeStream> {
        log::debug!("Sending streamRawPredict for model {} to {}", request.model, self.name);

        let body = predict_body(&request, true)?;
        let builder = Requester::json_body(self.post(&request.model, "streamRawPredict"), &body)?;
        let response = self.requester.send_raw(builder).await?;

        Ok(ClaudeStream::Native(json_event_stream::<ClaudeStreamEvent>(response)))
    }
}

#[cfg(test)]
mod tests {
    use axum::{Json, Router, extract::Path, http::HeaderMap, routing::post};
    use futures::StreamExt;
    use insta::assert_json_snapshot;
    use serde_json::{Value, json};
    use tokio::net::TcpListener;

    use super::VertexProvider;
    use crate::{
        error::LlmError,
        messages::claude::ClaudeRequest,
        provider::{ClaudeStream, Provider},
    };

    async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        format!("http://{address}")
    }

    fn request() -> ClaudeRequest {
        serde_json::from_value(json!({
            "model": "claude-3-5-sonnet@20240620",
            "max_tokens": 32,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap()
    }

    fn provider(url: &str) -> VertexProvider {
        VertexProvider::new(
            "vertex".to_string(),
            &"us-east5|my-project|ya29.token".to_string().into(),
            Some(url),
            true,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn raw_predict_carries_the_model_in_the_path() {
        let router = Router::new().route(
            "/v1/projects/{project}/locations/{location}/publishers/anthropic/models/{call}",
            post(|Path((project, location, call)): Path<(String, String, String)>| async move {
                Json(json!({
                    "id": "msg_1",
                    "type": "message",
                    "role": "assistant",
                    "model": "claude-3-5-sonnet",
                    "content": [{"type": "text", "text": format!("{project}/{location}/{call}")}],
                    "stop_reason": "end_turn",
                    "usage": {"input_tokens": 3, "output_tokens": 2}
                }))
            }),
        );
        let url = serve(router).await;

        let response = provider(&url).claude_chat(request()).await.unwrap();

        assert_json_snapshot!(response.content, @r#"
        [
          {
            "type": "text",
            "text": "my-project/us-east5/claude-3-5-sonnet@20240620:rawPredict"
          }
        ]
        "#);
    }

    #[tokio::test]
    async fn body_names_the_vertex_version() {
        let router = Router::new().route(
            "/v1/projects/{project}/locations/{location}/publishers/anthropic/models/{call}",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(headers["authorization"], "Bearer ya29.token");
                assert!(body.get("model").is_none());
                assert_eq!(body["anthropic_version"], "vertex-2023-10-16");
                assert_eq!(body["stream"], true);

                (
                    [("content-type", "text/event-stream")],
                    concat!(
                        "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"id\":\"m\",\"type\":\"message\",\"role\":\"assistant\",\"content\":[],\"model\":\"c\",\"usage\":{\"input_tokens\":1,\"output_tokens\":1}}}\n\n",
                        "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
                    ),
                )
            }),
        );
        let url = serve(router).await;

        let ClaudeStream::Native(events) = provider(&url).claude_chat_stream(request()).await.unwrap() else {
            unreachable!("Vertex streams are native Claude events");
        };
        let names: Vec<_> = events
            .map(|event| event.unwrap().event_name().to_string())
            .collect()
            .await;

        assert_eq!(names, ["message_start", "message_stop"]);
    }

    #[test]
    fn key_needs_three_parts() {
        let result = VertexProvider::new("v".to_string(), &"us-east5|project".to_string().into(), None, true);

        assert!(matches!(result, Err(LlmError::InternalError(Some(_)))));
    }
}
