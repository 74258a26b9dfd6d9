use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::messages::claude::{ClaudeErrorBody, ClaudeErrorResponse};

pub type LlmResult<T> = std::result::Result<T, LlmError>;

/// Error reported by an upstream provider, normalized to the OpenAI error shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamError {
    /// HTTP status the provider answered with.
    pub status: u16,
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
    pub code: Option<String>,
    pub param: Option<String>,
}

impl UpstreamError {
    /// Error built from a status alone, when the body carried nothing useful.
    pub fn from_status(status: u16) -> Self {
        Self {
            status,
            message: format!("bad response status code {status}"),
            error_type: "upstream_error".to_string(),
            code: Some("bad_response_status_code".to_string()),
            param: Some(status.to_string()),
        }
    }
}

/// Relay errors with their HTTP status and wire representation.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The client request failed validation.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The content safety gate refused the request.
    #[error("{message}")]
    ContentRejected { code: String, message: String },

    /// The selected channel cannot serve the operation.
    #[error("{0}")]
    ChannelError(String),

    /// The provider answered with a failure status.
    #[error("{}", .0.message)]
    Upstream(UpstreamError),

    /// Network or connection error.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The provider answered with a body we could not decode.
    #[error("Failed to decode upstream response: {0}")]
    DecodeResponseFailed(String),

    /// Internal server error.
    /// If Some(message), it came from a provider and can be shown.
    /// If None, it's an internal error and should not leak details.
    #[error("Internal server error")]
    InternalError(Option<String>),

    /// The request was a client housekeeping task answered locally.
    #[error("Background task handled locally")]
    BackgroundTaskHandled,
}

impl LlmError {
    pub fn channel_not_implemented() -> Self {
        Self::ChannelError("channel not implemented".to_string())
    }

    /// Get the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::ContentRejected { .. } => StatusCode::BAD_REQUEST,
            Self::ChannelError(_) => StatusCode::NOT_IMPLEMENTED,
            Self::Upstream(error) => StatusCode::from_u16(error.status).unwrap_or(StatusCode::BAD_GATEWAY),
            Self::ConnectionError(_) => StatusCode::BAD_GATEWAY,
            Self::DecodeResponseFailed(_) | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BackgroundTaskHandled => StatusCode::OK,
        }
    }

    /// Get the error type string for the response.
    pub fn error_type(&self) -> &str {
        match self {
            Self::InvalidRequest(_) | Self::ContentRejected { .. } => "invalid_request",
            Self::ChannelError(_) => "channel_error",
            Self::Upstream(error) => &error.error_type,
            Self::ConnectionError(_) => "upstream_error",
            Self::DecodeResponseFailed(_) => "decode_response_failed",
            Self::InternalError(_) => "internal_error",
            Self::BackgroundTaskHandled => "background_task",
        }
    }

    /// Machine-readable error code.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::InvalidRequest(_) => Some("invalid_request"),
            Self::ContentRejected { code, .. } => Some(code),
            Self::ChannelError(_) => Some("channel_not_implemented"),
            Self::Upstream(error) => error.code.as_deref(),
            Self::ConnectionError(_) => Some("http_request_failed"),
            Self::DecodeResponseFailed(_) => Some("decode_response_failed"),
            Self::InternalError(_) => Some("internal_error"),
            Self::BackgroundTaskHandled => None,
        }
    }

    /// Message that is safe to expose to API consumers.
    pub fn client_message(&self) -> String {
        match self {
            Self::InternalError(Some(provider_msg)) => provider_msg.clone(),
            Self::InternalError(None) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    /// Claude-shaped error body.
    pub fn to_claude(&self) -> ClaudeErrorResponse {
        ClaudeErrorResponse::new(ClaudeErrorBody {
            r#type: self.error_type().to_string(),
            message: self.client_message(),
        })
    }
}

/// Error response format compatible with OpenAI API.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorDetails,
}

#[derive(Debug, Serialize)]
struct ErrorDetails {
    message: String,
    r#type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

impl IntoResponse for LlmError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let error_response = ErrorResponse {
            error: ErrorDetails {
                message: self.client_message(),
                r#type: self.error_type().to_string(),
                code: self.code().map(str::to_string),
            },
        };

        (status, Json(error_response)).into_response()
    }
}

/// Wrapper rendering an [`LlmError`] in the Claude error shape.
pub struct ClaudeErrorReply {
    status: StatusCode,
    body: ClaudeErrorResponse,
}

impl From<LlmError> for ClaudeErrorReply {
    fn from(error: LlmError) -> Self {
        Self {
            status: error.status_code(),
            body: error.to_claude(),
        }
    }
}

impl IntoResponse for ClaudeErrorReply {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

pub type ClaudeResult<T> = std::result::Result<T, ClaudeErrorReply>;
