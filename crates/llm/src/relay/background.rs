//! Housekeeping prompts coding assistants send alongside real work. They are
//! answered locally with an empty message instead of spending upstream quota.

use crate::{
    id::background_message_id,
    messages::claude::{ClaudeRequest, ClaudeResponse, ClaudeRole, ClaudeStreamEvent, ClaudeUsage, StopReason, StreamMessage},
};

const BACKGROUND_TASK_MARKERS: [&str; 3] = [
    "Summarize this coding conversation",
    "write a 5-10 word title",
    "Analyze if this message indicates a new conversation topic",
];

/// Whether any system text carries a background task marker.
pub fn is_background_task(request: &ClaudeRequest) -> bool {
    let Some(system) = &request.system else {
        return false;
    };

    system
        .texts()
        .iter()
        .any(|text| BACKGROUND_TASK_MARKERS.iter().any(|marker| text.contains(marker)))
}

/// Empty, finished message.
pub(crate) fn response(model: &str) -> ClaudeResponse {
    ClaudeResponse {
        id: background_message_id(),
        r#type: "message".to_string(),
        role: ClaudeRole::Assistant,
        content: Vec::new(),
        model: model.to_string(),
        stop_reason: Some(StopReason::EndTurn),
        stop_sequence: None,
        usage: ClaudeUsage::default(),
    }
}

/// `message_start` of an already finished message, then `message_stop`.
pub(crate) fn events(model: &str) -> [ClaudeStreamEvent; 2] {
    let mut message = StreamMessage::new(background_message_id(), model, ClaudeUsage::default());
    message.stop_reason = Some(StopReason::EndTurn);

    [ClaudeStreamEvent::MessageStart { message }, ClaudeStreamEvent::MessageStop]
}
