use config::ChannelConfig;

pub const REPORT_TITLE: &str = "Channel test finished";

/// Characters with inline meaning in markdown.
const MARKDOWN_SPECIALS: &[char] = &['\\', '`', '*', '_', '~', '[', ']', '<', '>', '|', '#'];

/// Markdown summary of a sweep, one paragraph per channel.
#[derive(Debug, Default)]
pub struct SweepReport {
    sections: Vec<String>,
}

impl SweepReport {
    pub fn push(&mut self, channel: &ChannelConfig, note: &str) {
        let status = if channel.status.is_enabled() { "enabled" } else { "disabled" };

        self.sections.push(format!(
            "**Channel {} - #{} - {status}** : {}",
            escape_markdown(&channel.name),
            channel.id,
            escape_markdown(note)
        ));
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn render(&self) -> String {
        self.sections.join("\n\n")
    }
}

pub fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());

    for c in text.chars() {
        if MARKDOWN_SPECIALS.contains(&c) {
            escaped.push('\\');
        }

        escaped.push(c);
    }

    escaped
}
