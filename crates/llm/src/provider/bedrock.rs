//! AWS Bedrock serving Claude models through `InvokeModel`.
//!
//! The Claude request body is sent as-is, minus `model` and `stream`, with the
//! Bedrock `anthropic_version` marker. Streamed payload parts are Claude events.

use async_trait::async_trait;
use aws_config::Region;
use aws_credential_types::Credentials;
use aws_sdk_bedrockruntime::{Client as BedrockRuntimeClient, error::ProvideErrorMetadata, types::ResponseStream};
use aws_smithy_runtime_api::client::result::SdkError;
use aws_smithy_types::Blob;
use futures::stream;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::{
    convert,
    error::{LlmError, LlmResult, UpstreamError},
    messages::claude::{ClaudeRequest, ClaudeResponse, ClaudeStreamEvent},
    provider::{ClaudeStream, Provider},
};

const BEDROCK_ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";

/// Parsed `region|access_key_id|secret_access_key[|session_token]` channel key.
struct BedrockCredentials {
    region: String,
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl BedrockCredentials {
    fn parse(key: &SecretString) -> LlmResult<Self> {
        let mut parts = key.expose_secret().split('|').map(str::trim);

        let (Some(region), Some(access_key_id), Some(secret_access_key)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(LlmError::InternalError(Some(
                "Bedrock key must be region|access_key_id|secret_access_key".to_string(),
            )));
        };

        Ok(Self {
            region: region.to_string(),
            access_key_id: access_key_id.to_string(),
            secret_access_key: secret_access_key.to_string(),
            session_token: parts.next().filter(|t| !t.is_empty()).map(str::to_string),
        })
    }
}

pub(crate) struct BedrockProvider {
    client: BedrockRuntimeClient,
    name: String,
}

impl BedrockProvider {
    pub async fn new(name: String, key: &SecretString, base_url: Option<&str>) -> LlmResult<Self> {
        let credentials = BedrockCredentials::parse(key)?;

        let loader = aws_config::from_env()
            .region(Region::new(credentials.region))
            .credentials_provider(Credentials::new(
                credentials.access_key_id,
                credentials.secret_access_key,
                credentials.session_token,
                None,
                "relay_channel",
            ));

        let mut sdk_config = loader.load().await;

        if let Some(base_url) = base_url {
            log::debug!("Using custom Bedrock endpoint: {base_url}");
            sdk_config = sdk_config.into_builder().endpoint_url(base_url).build();
        }

        Ok(Self {
            client: BedrockRuntimeClient::new(&sdk_config),
            name,
        })
    }
}

/// Request body for `InvokeModel`.
fn invoke_body(request: &ClaudeRequest) -> LlmResult<Vec<u8>> {
    convert::validate(request)?;

    let mut body = serde_json::to_value(request)
        .map_err(|e| LlmError::InvalidRequest(format!("Failed to serialize request: {e}")))?;

    if let Value::Object(map) = &mut body {
        map.remove("model");
        map.remove("stream");
        map.insert(
            "anthropic_version".to_string(),
            Value::String(BEDROCK_ANTHROPIC_VERSION.to_string()),
        );
    }

    serde_json::to_vec(&body).map_err(|e| LlmError::InvalidRequest(format!("Failed to serialize request: {e}")))
}

#[async_trait]
impl Provider for BedrockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn claude_chat(&self, request: ClaudeRequest) -> LlmResult<ClaudeResponse> {
        log::debug!("Invoking Bedrock model {}", request.model);

        let body = invoke_body(&request)?;

        let output = self
            .client
            .invoke_model()
            .model_id(&request.model)
            .content_type("application/json")
            .accept("application/json")
            .body(Blob::new(body))
            .send()
            .await
            .map_err(|e| {
                log::error!("Failed to invoke Bedrock model: {e:?}");
                handle_bedrock_error(e)
            })?;

        let mut response: ClaudeResponse = serde_json::from_slice(output.body().as_ref())
            .map_err(|e| LlmError::DecodeResponseFailed(e.to_string()))?;

        if response.model.is_empty() {
            response.model = request.model;
        }

        Ok(response)
    }

    async fn claude_chat_stream(&self, request: ClaudeRequest) -> LlmResult<ClaudeStream> {
        log::debug!("Invoking Bedrock model {} with response stream", request.model);

        let body = invoke_body(&request)?;

        let output = self
            .client
            .invoke_model_with_response_stream()
            .model_id(&request.model)
            .content_type("application/json")
            .body(Blob::new(body))
            .send()
            .await
            .map_err(|e| {
                log::error!("Failed to invoke Bedrock response stream: {e:?}");
                handle_bedrock_error(e)
            })?;

        let events = stream::unfold(output.body, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(Some(ResponseStream::Chunk(part))) => {
                        let Some(bytes) = part.bytes() else { continue };

                        match serde_json::from_slice::<ClaudeStreamEvent>(bytes.as_ref()) {
                            Ok(event) => return Some((Ok(event), receiver)),
                            Err(e) => log::warn!("Skipping undecodable Bedrock stream event: {e}"),
                        }
                    }
                    Ok(Some(_)) => continue,
                    Ok(None) => return None,
                    Err(e) => {
                        log::error!("Bedrock stream error: {e:?}");
                        return Some((Err(LlmError::ConnectionError(format!("Stream error: {e:?}"))), receiver));
                    }
                }
            }
        });

        Ok(ClaudeStream::Native(Box::pin(events)))
    }
}

/// Maps Bedrock service errors onto the upstream error shape.
fn handle_bedrock_error<E, R>(error: SdkError<E, R>) -> LlmError
where
    E: ProvideErrorMetadata + std::fmt::Debug,
    R: std::fmt::Debug,
{
    match &error {
        SdkError::ServiceError(service_error) => {
            let err = service_error.err();
            let message = err.message().unwrap_or("Unknown error").to_string();
            let code = err.code().unwrap_or("UnknownError");

            let status = match code {
                "AccessDeniedException" => 403,
                "UnrecognizedClientException" => 401,
                "ResourceNotFoundException" => 404,
                "ThrottlingException" => 429,
                "ValidationException" => 400,
                "ModelTimeoutException" => 504,
                "ServiceUnavailableException" => 503,
                _ => 500,
            };

            LlmError::Upstream(UpstreamError {
                status,
                message,
                error_type: "upstream_error".to_string(),
                code: Some(code.to_string()),
                param: None,
            })
        }
        _ => LlmError::ConnectionError(format!("{error:?}")),
    }
}
