//! Outbound HTTP calls with normalized failure handling.
//!
//! [`Requester::send`] materializes and decodes the body, [`Requester::send_raw`]
//! hands the live response over for streaming. Both turn failure statuses into
//! [`LlmError::Upstream`] through a provider-specific [`ErrorParser`].

use eventsource_stream::Eventsource;
use futures::{StreamExt, stream::BoxStream};
use reqwest::{RequestBuilder, Response, header::CONTENT_TYPE};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, json};

use crate::error::{LlmError, LlmResult, UpstreamError};

/// Message prefix some resellers answer with when a quota group is exhausted.
/// Such errors are reported as 429 whatever the upstream status.
const RATE_LIMIT_MESSAGE_PREFIX: &str = "当前分组";

const PROVIDER_ERROR_PREFIX: &str = "Provider API error: ";

/// Error details extracted from a failure body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ParsedError {
    pub message: String,
    pub error_type: Option<String>,
    pub code: Option<String>,
}

/// Parses a provider's error body. `None` when the body has another shape.
pub(crate) type ErrorParser = fn(&[u8]) -> Option<ParsedError>;

/// OpenAI shape: `{"error": {"message", "type", "code"}}`.
pub(crate) fn openai_error(body: &[u8]) -> Option<ParsedError> {
    let value: Value = serde_json::from_slice(body).ok()?;
    let error = value.get("error")?;

    Some(ParsedError {
        message: error.get("message")?.as_str()?.to_string(),
        error_type: error.get("type").and_then(Value::as_str).map(str::to_string),
        code: error.get("code").and_then(scalar_to_string),
    })
}

/// Claude shape: `{"type": "error", "error": {"type", "message"}}`.
pub(crate) fn claude_error(body: &[u8]) -> Option<ParsedError> {
    let value: Value = serde_json::from_slice(body).ok()?;
    let error = value.get("error")?;
    let error_type = error.get("type").and_then(Value::as_str).map(str::to_string);

    Some(ParsedError {
        message: error.get("message")?.as_str()?.to_string(),
        code: error_type.clone(),
        error_type,
    })
}

/// Gemini shape: `{"error": {"code": 400, "message", "status"}}`.
pub(crate) fn gemini_error(body: &[u8]) -> Option<ParsedError> {
    let value: Value = serde_json::from_slice(body).ok()?;
    let error = value.get("error")?;

    Some(ParsedError {
        message: error.get("message")?.as_str()?.to_string(),
        error_type: error.get("status").and_then(Value::as_str).map(str::to_string),
        code: error.get("code").and_then(scalar_to_string),
    })
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) struct Requester {
    error_parser: ErrorParser,
    prefix_errors: bool,
}

impl Requester {
    pub fn new(error_parser: ErrorParser, prefix_errors: bool) -> Self {
        Self {
            error_parser,
            prefix_errors,
        }
    }

    /// Serializes `body` as the JSON payload of `request`.
    pub fn json_body<B: Serialize>(request: RequestBuilder, body: &B) -> LlmResult<RequestBuilder> {
        let body = sonic_rs::to_vec(body)
            .map_err(|e| LlmError::InvalidRequest(format!("Failed to serialize request: {e}")))?;

        Ok(request.header(CONTENT_TYPE, "application/json").body(body))
    }

    /// Sends the request and decodes the body into `T`.
    pub async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> LlmResult<T> {
        let response = self.send_raw(request).await?;

        let body = response.text().await.map_err(|e| {
            log::error!("Failed to read upstream response body: {e}");
            LlmError::ConnectionError(format!("Failed to read response body: {e}"))
        })?;

        decode(&body)
    }

    /// Sends the request and returns the live response when its status is a success.
    pub async fn send_raw(&self, request: RequestBuilder) -> LlmResult<Response> {
        let response = request.send().await.map_err(|e| {
            log::error!("Upstream request failed: {e}");
            LlmError::ConnectionError(format!("Failed to send request: {e}"))
        })?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(self.upstream_error(response).await)
        }
    }

    async fn upstream_error(&self, response: Response) -> LlmError {
        let status = response.status().as_u16();

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.contains("application/json"));

        let body = response.bytes().await.unwrap_or_default();
        log::error!("Upstream answered {status}: {}", String::from_utf8_lossy(&body));

        let mut error = UpstreamError::from_status(status);
        error.message.clear();

        match (self.error_parser)(&body).filter(|parsed| !parsed.message.is_empty()) {
            Some(parsed) => {
                if parsed.message.starts_with(RATE_LIMIT_MESSAGE_PREFIX) {
                    error.status = 429;
                }

                error.message = parsed.message;

                if let Some(error_type) = parsed.error_type {
                    error.error_type = error_type;
                }

                error.code = parsed.code;
                error.param = None;
            }
            None if is_json => error.message = String::from_utf8_lossy(&body).into_owned(),
            None => (),
        }

        if error.message.is_empty() {
            error.message = format!("bad response status code {status}");
        }

        if self.prefix_errors {
            error.message = format!("{PROVIDER_ERROR_PREFIX}{}", error.message);
        }

        LlmError::Upstream(error)
    }
}

/// Decodes a buffered body. A body that turns out to be an event stream is
/// folded into one non-streaming completion before decoding.
pub(crate) fn decode<T: DeserializeOwned>(body: &str) -> LlmResult<T> {
    if body.trim_start().starts_with("data:") {
        log::warn!("Received an event stream for a non-streaming request, folding it");

        let folded = fold_event_stream(body)?;

        return serde_json::from_value(folded).map_err(|e| LlmError::DecodeResponseFailed(e.to_string()));
    }

    serde_json::from_str(body).map_err(|e| {
        log::error!("Failed to decode upstream response: {e}");
        LlmError::DecodeResponseFailed(e.to_string())
    })
}

/// Merges the text deltas of an OpenAI chunk stream, keeping the last
/// non-empty finish reason.
fn fold_event_stream(body: &str) -> LlmResult<Value> {
    let chunks: Vec<Value> = body
        .lines()
        .filter_map(|line| line.trim().strip_prefix("data:"))
        .map(str::trim)
        .filter(|data| !data.is_empty() && *data != "[DONE]")
        .filter_map(|data| serde_json::from_str(data).ok())
        .collect();

    let Some(first) = chunks.first() else {
        return Err(LlmError::DecodeResponseFailed(
            "no valid JSON chunks found in streaming response".to_string(),
        ));
    };

    let mut content = String::new();
    let mut finish_reason = "stop".to_string();

    for choice in chunks.iter().filter_map(|chunk| chunk.pointer("/choices/0")) {
        if let Some(text) = choice.pointer("/delta/content").and_then(Value::as_str) {
            content.push_str(text);
        }

        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str).filter(|r| !r.is_empty()) {
            finish_reason = reason.to_string();
        }
    }

    Ok(json!({
        "id": first.get("id").cloned().unwrap_or(Value::Null),
        "object": "chat.completion",
        "created": first.get("created").cloned().unwrap_or(Value::Null),
        "model": first.get("model").cloned().unwrap_or(Value::Null),
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": finish_reason,
        }],
        "usage": {"prompt_tokens": 0, "completion_tokens": 0, "total_tokens": 0},
    }))
}

/// Decodes the `data:` payloads of an event-stream response as JSON values of
/// type `T`. The stream ends on `[DONE]` or when the body ends; a broken
/// connection yields an error item. Payloads that fail to parse are skipped.
pub(crate) fn json_event_stream<T>(response: Response) -> BoxStream<'static, LlmResult<T>>
where
    T: DeserializeOwned + Send + 'static,
{
    response
        .bytes_stream()
        .eventsource()
        .take_while(|event| futures::future::ready(!matches!(event, Ok(event) if event.data == "[DONE]")))
        .filter_map(|event| async move {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    log::error!("Upstream stream failed: {e}");
                    return Some(Err(LlmError::ConnectionError(format!("Stream error: {e}"))));
                }
            };

            if event.data.trim().is_empty() {
                return None;
            }

            match sonic_rs::from_str::<T>(&event.data) {
                Ok(item) => Some(Ok(item)),
                Err(e) => {
                    log::warn!("Skipping undecodable stream event: {e}");
                    None
                }
            }
        })
        .boxed()
}

#[cfg(test)]
mod tests {
    use axum::{Router, http::StatusCode, response::IntoResponse, routing::post};
    use futures::StreamExt;
    use insta::assert_json_snapshot;
    use tokio::net::TcpListener;

    use super::{Requester, claude_error, decode, json_event_stream, openai_error};
    use crate::{error::LlmError, messages::openai::ChatCompletionResponse};

    async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        format!("http://{address}")
    }

    fn upstream(error: LlmError) -> super::UpstreamError {
        match error {
            LlmError::Upstream(error) => error,
            other => unreachable!("expected an upstream error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failure_body_is_parsed_and_prefixed() {
        let router = Router::new().route(
            "/",
            post(|| async {
                (
                    StatusCode::UNAUTHORIZED,
                    [("content-type", "application/json")],
                    r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error","code":"invalid_api_key"}}"#,
                )
            }),
        );
        let url = serve(router).await;

        let requester = Requester::new(openai_error, true);
        let error = requester.send_raw(reqwest::Client::new().post(&url)).await.unwrap_err();

        assert_json_snapshot!(upstream(error), @r#"
        {
          "status": 401,
          "message": "Provider API error: Incorrect API key provided",
          "type": "invalid_request_error",
          "code": "invalid_api_key",
          "param": null
        }
        "#);
    }

    #[tokio::test]
    async fn quota_group_message_becomes_rate_limited() {
        let router = Router::new().route(
            "/",
            post(|| async {
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    r#"{"error":{"message":"当前分组上游负载已饱和","type":"new_api_error"}}"#,
                )
            }),
        );
        let url = serve(router).await;

        let requester = Requester::new(openai_error, false);
        let error = upstream(requester.send_raw(reqwest::Client::new().post(&url)).await.unwrap_err());

        assert_eq!(error.status, 429);
        assert_eq!(error.error_type, "new_api_error");
    }

    #[tokio::test]
    async fn unparseable_failure_keeps_the_status_code() {
        let router = Router::new().route("/", post(|| async { StatusCode::BAD_GATEWAY.into_response() }));
        let url = serve(router).await;

        let requester = Requester::new(claude_error, false);
        let error = upstream(requester.send_raw(reqwest::Client::new().post(&url)).await.unwrap_err());

        assert_eq!(error.message, "bad response status code 502");
        assert_eq!(error.code.as_deref(), Some("bad_response_status_code"));
        assert_eq!(error.param.as_deref(), Some("502"));
    }

    #[test]
    fn event_stream_body_is_folded() {
        let body = concat!(
            "data: {\"id\":\"c1\",\"created\":7,\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"length\"}]}\n\n",
            "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"\"}]}\n\n",
            "data: [DONE]\n\n",
        );

        let response: ChatCompletionResponse = decode(body).unwrap();

        assert_json_snapshot!(response, @r#"
        {
          "id": "c1",
          "object": "chat.completion",
          "created": 7,
          "model": "m",
          "choices": [
            {
              "index": 0,
              "message": {
                "role": "assistant",
                "content": "Hello"
              },
              "finish_reason": "length"
            }
          ],
          "usage": {
            "prompt_tokens": 0,
            "completion_tokens": 0,
            "total_tokens": 0
          }
        }
        "#);
    }

    #[test]
    fn garbage_is_a_decode_failure() {
        let error = decode::<ChatCompletionResponse>("<html>").unwrap_err();
        assert!(matches!(error, LlmError::DecodeResponseFailed(_)));

        let error = decode::<ChatCompletionResponse>("data: [DONE]\n\n").unwrap_err();
        assert!(matches!(error, LlmError::DecodeResponseFailed(_)));
    }

    #[tokio::test]
    async fn event_stream_stops_at_done() {
        let router = Router::new().route(
            "/",
            post(|| async {
                (
                    [("content-type", "text/event-stream")],
                    "data: {\"n\":1}\n\ndata: not json\n\ndata: {\"n\":2}\n\ndata: [DONE]\n\ndata: {\"n\":3}\n\n",
                )
            }),
        );
        let url = serve(router).await;

        let response = reqwest::Client::new().post(&url).send().await.unwrap();
        let items: Vec<serde_json::Value> = json_event_stream(response)
            .map(|item| item.unwrap())
            .collect()
            .await;

        assert_eq!(items, vec![serde_json::json!({"n": 1}), serde_json::json!({"n": 2})]);
    }
}
