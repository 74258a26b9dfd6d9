use async_trait::async_trait;
use futures::{Stream, stream};
use tokio::sync::mpsc;

use crate::messages::claude::ClaudeStreamEvent;

/// The consumer of a relayed stream went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkClosed;

/// Destination of relayed Claude events.
#[async_trait]
pub trait EventSink: Send {
    async fn send(&mut self, event: &ClaudeStreamEvent) -> Result<(), SinkClosed>;
}

/// Sink writing SSE frames into a bounded channel, read back as an HTTP body.
pub struct ChannelSink {
    sender: mpsc::Sender<String>,
}

impl ChannelSink {
    /// A sink and the stream of frames written into it. Dropping the stream
    /// closes the sink.
    pub fn channel(buffer: usize) -> (Self, impl Stream<Item = String> + Send + 'static) {
        let (sender, receiver) = mpsc::channel(buffer);

        let frames = stream::unfold(receiver, |mut receiver| async move {
            let frame = receiver.recv().await?;
            Some((frame, receiver))
        });

        (Self { sender }, frames)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn send(&mut self, event: &ClaudeStreamEvent) -> Result<(), SinkClosed> {
        self.sender.send(event.to_sse_frame()).await.map_err(|_| SinkClosed)
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::{ChannelSink, EventSink, SinkClosed};
    use crate::messages::claude::ClaudeStreamEvent;

    #[tokio::test]
    async fn frames_are_sse_encoded() {
        let (mut sink, frames) = ChannelSink::channel(4);

        sink.send(&ClaudeStreamEvent::MessageStop).await.unwrap();
        drop(sink);

        let frames: Vec<_> = frames.collect().await;
        assert_eq!(frames, ["event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n"]);
    }

    #[tokio::test]
    async fn dropped_reader_closes_the_sink() {
        let (mut sink, frames) = ChannelSink::channel(4);
        drop(frames);

        assert_eq!(sink.send(&ClaudeStreamEvent::Ping).await, Err(SinkClosed));
    }
}
