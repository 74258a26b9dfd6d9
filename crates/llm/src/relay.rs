//! Relaying provider output to Claude clients.
//!
//! [`ClaudeRelay`] is the entry point. Streams are driven by [`drive`] through
//! one of three handlers: [`StreamRelay`] for chat streams needing tool-call
//! merging, [`PerChunkRelay`] for plain chat streams and [`NativeRelay`] for
//! upstreams that already emit Claude events.

mod background;
mod claude;
mod driver;
mod engine;
mod native;
mod per_chunk;
mod safety;
mod sink;

pub use background::is_background_task;
pub use claude::{ClaudeRelay, PreparedStream};
pub use driver::{FragmentHandler, drive};
pub use engine::{RelayState, StreamRelay};
pub use native::NativeRelay;
pub use per_chunk::PerChunkRelay;
pub use safety::{KeywordChecker, SafetyChecker, SafetyVerdict};
pub use sink::{ChannelSink, EventSink, SinkClosed};
