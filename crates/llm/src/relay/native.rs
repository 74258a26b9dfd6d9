use crate::{
    messages::claude::{ClaudeStreamEvent, ClaudeUsage},
    relay::driver::FragmentHandler,
};

/// Forwards events of a backend that already speaks Claude, recording usage
/// on the way.
#[derive(Debug, Default)]
pub struct NativeRelay {
    closed: bool,
    input_tokens: u32,
    usage: Option<ClaudeUsage>,
}

impl NativeRelay {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FragmentHandler for NativeRelay {
    type Fragment = ClaudeStreamEvent;

    fn on_fragment(&mut self, fragment: ClaudeStreamEvent, out: &mut Vec<ClaudeStreamEvent>) {
        if self.closed {
            return;
        }

        match &fragment {
            ClaudeStreamEvent::MessageStart { message } => self.input_tokens = message.usage.input_tokens,
            ClaudeStreamEvent::MessageDelta { usage, .. } => {
                let input_tokens = if usage.input_tokens > 0 {
                    usage.input_tokens
                } else {
                    self.input_tokens
                };

                self.usage = Some(ClaudeUsage::new(input_tokens, usage.output_tokens));
            }
            ClaudeStreamEvent::MessageStop => self.closed = true,
            _ => (),
        }

        out.push(fragment);
    }

    fn on_end(&mut self, _: &mut Vec<ClaudeStreamEvent>) {
        if !self.closed {
            log::warn!("Native Claude stream ended before message_stop");
        }

        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn usage(&self) -> Option<ClaudeUsage> {
        self.usage.clone()
    }
}
