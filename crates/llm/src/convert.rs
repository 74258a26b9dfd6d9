//! Pure mappings between the Claude, OpenAI and Gemini schemas.

mod chunk;
mod claude_request;
mod claude_response;
pub mod gemini;

pub use chunk::chunk_to_claude_event;
pub(crate) use claude_request::validate;
pub use claude_response::openai_to_claude;

use crate::messages::{claude::StopReason, openai::FinishReason};

/// Maps an OpenAI finish reason to its Claude stop reason. Anything outside
/// the four documented values ends the turn.
pub fn stop_reason(finish_reason: Option<&FinishReason>) -> StopReason {
    match finish_reason {
        Some(FinishReason::Length) => StopReason::MaxTokens,
        Some(FinishReason::ToolCalls) => StopReason::ToolUse,
        Some(FinishReason::ContentFilter) => StopReason::StopSequence,
        Some(FinishReason::Stop | FinishReason::FunctionCall | FinishReason::Other(_)) | None => StopReason::EndTurn,
    }
}
