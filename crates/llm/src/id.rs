//! Identifiers minted by the relay.

use std::sync::atomic::{AtomicU64, Ordering};

use jiff::Timestamp;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Id for a tool call the client sent without one. Unique within the process.
pub(crate) fn tool_call_id() -> String {
    let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("call_{}_{sequence}", Timestamp::now().as_nanosecond())
}

/// `msg_<millis>` for a relayed stream.
pub(crate) fn message_id() -> String {
    format!("msg_{}", Timestamp::now().as_millisecond())
}

/// `msg_bg_<millis>` for a locally answered background task.
pub(crate) fn background_message_id() -> String {
    format!("msg_bg_{}", Timestamp::now().as_millisecond())
}

pub(crate) fn unix_seconds() -> u64 {
    u64::try_from(Timestamp::now().as_second()).unwrap_or_default()
}

pub(crate) fn unix_millis() -> i64 {
    Timestamp::now().as_millisecond()
}
