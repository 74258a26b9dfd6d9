use std::time::Duration;

use futures::{StreamExt, stream::BoxStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{LlmError, LlmResult},
    messages::claude::{ClaudeStreamEvent, ClaudeUsage},
    relay::sink::EventSink,
};

const FRAGMENT_BUFFER: usize = 32;

/// Per-stream translation state driven by [`drive`].
pub trait FragmentHandler: Send {
    type Fragment: Send + 'static;

    fn on_fragment(&mut self, fragment: Self::Fragment, out: &mut Vec<ClaudeStreamEvent>);

    /// The upstream signalled a clean end of stream.
    fn on_end(&mut self, out: &mut Vec<ClaudeStreamEvent>);

    fn is_closed(&self) -> bool;

    /// The consumer is gone, drop everything from here on.
    fn close(&mut self);

    /// Usage reported to the client, once known.
    fn usage(&self) -> Option<ClaudeUsage> {
        None
    }
}

/// Pumps `fragments` through `handler` into `sink`.
///
/// Upstream fragments are read by a dedicated task. The loop waits at most
/// `read_timeout` for each fragment. Cancellation or a closed sink ends the
/// relay quietly; a transport error or a timeout emits an `error` event and
/// is returned.
pub async fn drive<H, S>(
    fragments: BoxStream<'static, LlmResult<H::Fragment>>,
    mut handler: H,
    sink: &mut S,
    read_timeout: Duration,
    cancel: CancellationToken,
) -> LlmResult<H>
where
    H: FragmentHandler,
    S: EventSink + ?Sized,
{
    let (data_tx, mut data_rx) = mpsc::channel(FRAGMENT_BUFFER);
    let (error_tx, mut error_rx) = mpsc::channel(1);

    let pump = tokio::spawn(async move {
        let mut fragments = fragments;

        while let Some(item) = fragments.next().await {
            match item {
                Ok(fragment) => {
                    if data_tx.send(fragment).await.is_err() {
                        return;
                    }
                }
                Err(error) => {
                    let _ = error_tx.send(error).await;
                    return;
                }
            }
        }
    });

    let result = relay_loop(&mut handler, sink, &mut data_rx, &mut error_rx, read_timeout, &cancel).await;

    pump.abort();

    match result {
        Ok(()) => Ok(handler),
        Err(error) => {
            log::error!("Stream relay failed: {error}");

            if !handler.is_closed() && !cancel.is_cancelled() {
                let event = ClaudeStreamEvent::error(error.error_type(), error.client_message());
                let _ = sink.send(&event).await;
            }

            Err(error)
        }
    }
}

async fn relay_loop<H, S>(
    handler: &mut H,
    sink: &mut S,
    data_rx: &mut mpsc::Receiver<H::Fragment>,
    error_rx: &mut mpsc::Receiver<LlmError>,
    read_timeout: Duration,
    cancel: &CancellationToken,
) -> LlmResult<()>
where
    H: FragmentHandler,
    S: EventSink + ?Sized,
{
    loop {
        let mut events = Vec::new();
        let mut ended = false;

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                log::debug!("Client went away, abandoning the stream");
                handler.close();
                return Ok(());
            }
            fragment = data_rx.recv() => match fragment {
                Some(fragment) => handler.on_fragment(fragment, &mut events),
                None => {
                    // The pump reports its error before dropping the data sender.
                    if let Ok(error) = error_rx.try_recv() {
                        return Err(error);
                    }

                    handler.on_end(&mut events);
                    ended = true;
                }
            },
            Some(error) = error_rx.recv() => return Err(error),
            _ = tokio::time::sleep(read_timeout) => {
                return Err(LlmError::ConnectionError(format!(
                    "no data from upstream within {}s",
                    read_timeout.as_secs()
                )));
            }
        }

        for event in &events {
            if cancel.is_cancelled() || sink.send(event).await.is_err() {
                log::debug!("Client disconnected, dropping the rest of the stream");
                handler.close();
                return Ok(());
            }
        }

        if ended || handler.is_closed() {
            return Ok(());
        }
    }
}
