use std::{convert::Infallible, sync::Arc};

use axum::{
    Router,
    body::Body,
    extract::{Json, State},
    http::header,
    response::{IntoResponse, Response, Sse, sse::Event},
    routing::post,
};
use axum_serde::Sonic;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

pub mod convert;
mod error;
mod http_client;
mod id;
pub mod messages;
pub mod provider;
pub mod relay;
mod requester;
mod server;
pub mod token_counter;

pub use error::{ClaudeErrorReply, ClaudeResult, LlmError, LlmResult as Result, UpstreamError};
pub use server::ChannelSelector;

use crate::{
    messages::{claude::ClaudeRequest, openai::ChatCompletionRequest},
    relay::ChannelSink,
    server::LlmServer,
};

/// Frames buffered between the relay task and the response body.
const STREAM_BUFFER: usize = 64;

/// Creates an axum router for the relay endpoints.
pub async fn router(config: &config::Config, selector: Arc<dyn ChannelSelector>) -> Router {
    let server = LlmServer::new(config, selector).await;

    Router::new()
        .route("/v1/messages", post(claude_messages))
        .route("/v1/chat/completions", post(chat_completions))
        .with_state(server)
}

/// Handle Claude Messages requests.
///
/// Streaming requests are relayed from a spawned task into the response body.
/// Dropping the body cancels the relay.
async fn claude_messages(
    State(server): State<LlmServer>,
    Sonic(request): Sonic<ClaudeRequest>,
) -> ClaudeResult<Response> {
    log::debug!(
        "Claude messages handler called for model {} with {} messages, streaming: {}",
        request.model,
        request.messages.len(),
        request.is_stream()
    );

    let handle = server.handle_for(&request.model).await?;

    if !request.is_stream() {
        let response = server.relay().message(&handle, request).await?;
        return Ok(Json(response).into_response());
    }

    let prepared = server.relay().open_stream(&handle, request).await?;

    let (mut sink, frames) = ChannelSink::channel(STREAM_BUFFER);
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();

    tokio::spawn(async move {
        match prepared.relay(&mut sink, cancel).await {
            Ok(usage) => log::debug!("Claude stream finished, usage: {usage:?}"),
            Err(LlmError::BackgroundTaskHandled) => log::debug!("Background task answered locally"),
            Err(e) => log::debug!("Claude stream ended with error: {e}"),
        }
    });

    let body = frames.map(move |frame| {
        let _guard = &guard;
        Ok::<_, Infallible>(frame)
    });

    let headers = [
        (header::CONTENT_TYPE, "text/event-stream"),
        (header::CACHE_CONTROL, "no-cache"),
    ];

    Ok((headers, Body::from_stream(body)).into_response())
}

/// Handle OpenAI chat completion requests on chat-capable channels.
async fn chat_completions(
    State(server): State<LlmServer>,
    Sonic(request): Sonic<ChatCompletionRequest>,
) -> Result<Response> {
    log::debug!(
        "Chat completions handler called for model {}, streaming: {}",
        request.model,
        request.stream
    );

    let handle = server.handle_for(&request.model).await?;

    if !request.stream {
        let response = handle.chat(request).await?;
        return Ok(Json(response).into_response());
    }

    let chunks = handle.chat_stream(request).await?;

    let events = chunks.map(|chunk| {
        let data = match chunk {
            Ok(chunk) => sonic_rs::to_string(&chunk).unwrap_or_else(|e| {
                log::error!("Failed to serialize chunk: {e}");
                r#"{"error":"serialization failed"}"#.to_string()
            }),
            Err(e) => {
                log::error!("Stream error: {e}");
                serde_json::json!({
                    "error": {"message": e.client_message(), "type": e.error_type(), "code": e.code()}
                })
                .to_string()
            }
        };

        Ok::<_, Infallible>(Event::default().data(data))
    });

    let with_done = events.chain(futures::stream::once(async {
        Ok::<_, Infallible>(Event::default().data("[DONE]"))
    }));

    Ok(Sse::new(with_done).into_response())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::{Json, Router, routing::post};
    use indoc::formatdoc;
    use insta::assert_json_snapshot;
    use serde_json::{Value, json};
    use tokio::net::TcpListener;

    use super::ChannelSelector;

    struct FirstChannel;

    #[async_trait]
    impl ChannelSelector for FirstChannel {
        async fn select(&self, model: &str) -> Option<u64> {
            (model != "unknown").then_some(1)
        }
    }

    async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        format!("http://{address}")
    }

    async fn gateway(upstream: &str) -> String {
        let config: config::Config = toml::from_str(&formatdoc! {r#"
            [[channels]]
            id = 1
            name = "upstream"
            type = "custom"
            key = "sk-test"
            base_url = "{upstream}"
        "#})
        .unwrap();

        serve(super::router(&config, Arc::new(FirstChannel)).await).await
    }

    #[tokio::test]
    async fn claude_message_through_chat_channel() {
        let upstream = serve(Router::new().route(
            "/chat/completions",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["messages"][0]["role"], "system");

                Json(json!({
                    "id": "chatcmpl-1",
                    "model": "gpt-4o",
                    "choices": [{
                        "index": 0,
                        "message": {"role": "assistant", "content": "Hi there"},
                        "finish_reason": "stop"
                    }],
                    "usage": {"prompt_tokens": 9, "completion_tokens": 2, "total_tokens": 11}
                }))
            }),
        ))
        .await;

        let gateway = gateway(&upstream).await;

        let response: Value = reqwest::Client::new()
            .post(format!("{gateway}/v1/messages"))
            .json(&json!({
                "model": "gpt-4o",
                "max_tokens": 32,
                "system": "You are terse.",
                "messages": [{"role": "user", "content": "hello"}]
            }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_json_snapshot!(response, @r#"
        {
          "content": [
            {
              "text": "Hi there",
              "type": "text"
            }
          ],
          "id": "msg_chatcmpl-1",
          "model": "gpt-4o",
          "role": "assistant",
          "stop_reason": "end_turn",
          "stop_sequence": null,
          "type": "message",
          "usage": {
            "input_tokens": 9,
            "output_tokens": 2
          }
        }
        "#);
    }

    #[tokio::test]
    async fn claude_stream_through_chat_channel() {
        let upstream = serve(Router::new().route(
            "/chat/completions",
            post(|| async {
                (
                    [("content-type", "text/event-stream")],
                    concat!(
                        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"}}]}\n\n",
                        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"}}]}\n\n",
                        "data: [DONE]\n\n",
                    ),
                )
            }),
        ))
        .await;

        let gateway = gateway(&upstream).await;

        let response = reqwest::Client::new()
            .post(format!("{gateway}/v1/messages"))
            .json(&json!({
                "model": "gpt-4o",
                "max_tokens": 32,
                "stream": true,
                "messages": [{"role": "user", "content": "hello"}]
            }))
            .send()
            .await
            .unwrap();

        assert_eq!(response.headers()["content-type"], "text/event-stream");

        let body = response.text().await.unwrap();
        let names: Vec<_> = body
            .lines()
            .filter_map(|line| line.strip_prefix("event: "))
            .collect();

        assert_eq!(
            names,
            [
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
    }

    #[tokio::test]
    async fn unknown_model_is_a_claude_error() {
        let gateway = gateway("http://127.0.0.1:9").await;

        let response = reqwest::Client::new()
            .post(format!("{gateway}/v1/messages"))
            .json(&json!({
                "model": "unknown",
                "max_tokens": 32,
                "messages": [{"role": "user", "content": "hello"}]
            }))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 501);

        let body: Value = response.json().await.unwrap();

        assert_json_snapshot!(body, @r#"
        {
          "error": {
            "message": "no available channel for model unknown",
            "type": "channel_error"
          },
          "type": "error"
        }
        "#);
    }

    #[tokio::test]
    async fn openai_stream_ends_with_done() {
        let upstream = serve(Router::new().route(
            "/chat/completions",
            post(|| async {
                (
                    [("content-type", "text/event-stream")],
                    concat!(
                        "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hey\"}}]}\n\n",
                        "data: [DONE]\n\n",
                    ),
                )
            }),
        ))
        .await;

        let gateway = gateway(&upstream).await;

        let body = reqwest::Client::new()
            .post(format!("{gateway}/v1/chat/completions"))
            .json(&json!({
                "model": "gpt-4o",
                "stream": true,
                "messages": [{"role": "user", "content": "hello"}]
            }))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();

        let data: Vec<_> = body.lines().filter_map(|line| line.strip_prefix("data: ")).collect();

        assert_eq!(data.len(), 2);
        assert!(data[0].contains("\"Hey\""));
        assert_eq!(data[1], "[DONE]");
    }
}
