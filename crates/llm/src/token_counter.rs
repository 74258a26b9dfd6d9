//! Token estimates for backends that do not report usage.

use std::sync::OnceLock;

use tiktoken_rs::{CoreBPE, cl100k_base};

use crate::messages::{
    claude::{ClaudeContent, ClaudeMessageContent, ClaudeRequest},
    openai::ChatCompletionResponse,
};

fn encoder() -> Option<&'static CoreBPE> {
    static ENCODER: OnceLock<Option<CoreBPE>> = OnceLock::new();

    ENCODER
        .get_or_init(|| match cl100k_base() {
            Ok(bpe) => Some(bpe),
            Err(e) => {
                log::warn!("Failed to load cl100k_base tokenizer, falling back to character estimates: {e}");
                None
            }
        })
        .as_ref()
}

/// Estimated token count of `text`. Falls back to a quarter of the character
/// count when no tokenizer is available.
pub fn estimate(text: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }

    let count = match encoder() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => text.chars().count().div_ceil(4),
    };

    u32::try_from(count).unwrap_or(u32::MAX)
}

/// Estimated completion tokens of an OpenAI response: every tool call counted
/// as `tool_use:<name>:<arguments>` plus the concatenated text.
pub fn estimate_completion(response: &ChatCompletionResponse) -> u32 {
    let mut text = String::new();
    let mut tokens = 0;

    for choice in &response.choices {
        text.push_str(&choice.message.text_content());

        for call in choice.message.tool_calls.iter().flatten() {
            tokens += estimate(&format!("tool_use:{}:{}", call.function.name, call.function.arguments));
        }
    }

    tokens + estimate(&text)
}

/// Estimated prompt tokens of a Claude request: system texts and every text
/// block of every message.
pub fn estimate_prompt(request: &ClaudeRequest) -> u32 {
    let mut text = request.system_text();

    for message in &request.messages {
        match &message.content {
            ClaudeMessageContent::Text(t) => {
                text.push('\n');
                text.push_str(t);
            }
            ClaudeMessageContent::Blocks(blocks) => {
                for block in blocks {
                    match block {
                        ClaudeContent::Text { text: t, .. } => {
                            text.push('\n');
                            text.push_str(t);
                        }
                        ClaudeContent::ToolUse { name, input, .. } => {
                            text.push('\n');
                            text.push_str(name);
                            text.push_str(&input.to_string());
                        }
                        ClaudeContent::ToolResult { content, .. } => {
                            text.push('\n');
                            match content.as_str() {
                                Some(s) => text.push_str(s),
                                None => text.push_str(&content.to_string()),
                            }
                        }
                        _ => (),
                    }
                }
            }
        }
    }

    estimate(&text)
}

#[cfg(test)]
mod tests {
    use super::estimate;

    #[test]
    fn empty_text_has_no_tokens() {
        assert_eq!(estimate(""), 0);
    }

    #[test]
    fn short_text_has_a_few_tokens() {
        let tokens = estimate("Hello, world!");
        assert!((1..=8).contains(&tokens), "unexpected estimate {tokens}");
    }
}
