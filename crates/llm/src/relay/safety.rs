use async_trait::async_trait;

use crate::{
    error::{LlmError, LlmResult},
    messages::claude::{ClaudeContent, ClaudeMessageContent, ClaudeRequest},
};

/// Outcome of a content safety check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyVerdict {
    pub safe: bool,
    pub reason: String,
    pub code: String,
}

impl SafetyVerdict {
    pub fn safe() -> Self {
        Self {
            safe: true,
            reason: String::new(),
            code: String::new(),
        }
    }
}

/// Decides whether a request may be forwarded upstream.
#[async_trait]
pub trait SafetyChecker: Send + Sync {
    async fn check(&self, content: &str) -> SafetyVerdict;
}

/// Rejects content containing any configured keyword, ignoring case.
#[derive(Debug, Clone)]
pub struct KeywordChecker {
    keywords: Vec<String>,
}

impl KeywordChecker {
    pub fn new(keywords: &[String]) -> Self {
        Self {
            keywords: keywords
                .iter()
                .map(|keyword| keyword.trim().to_lowercase())
                .filter(|keyword| !keyword.is_empty())
                .collect(),
        }
    }
}

#[async_trait]
impl SafetyChecker for KeywordChecker {
    async fn check(&self, content: &str) -> SafetyVerdict {
        let content = content.to_lowercase();

        match self.keywords.iter().find(|keyword| content.contains(keyword.as_str())) {
            Some(keyword) => SafetyVerdict {
                safe: false,
                reason: format!("content contains blocked keyword \"{keyword}\""),
                code: "content_blocked".to_string(),
            },
            None => SafetyVerdict::safe(),
        }
    }
}

/// Text of every message, one per line.
fn message_text(request: &ClaudeRequest) -> String {
    let mut texts = Vec::new();

    for message in &request.messages {
        match &message.content {
            ClaudeMessageContent::Text(text) => texts.push(text.as_str()),
            ClaudeMessageContent::Blocks(blocks) => {
                for block in blocks {
                    match block {
                        ClaudeContent::Text { text, .. } => texts.push(text.as_str()),
                        ClaudeContent::ToolResult { content, .. } => {
                            if let Some(text) = content.as_str() {
                                texts.push(text);
                            }
                        }
                        _ => (),
                    }
                }
            }
        }
    }

    texts.join("\n")
}

/// Fails with [`LlmError::ContentRejected`] when the checker refuses the
/// request's messages.
pub(crate) async fn gate(checker: &dyn SafetyChecker, request: &ClaudeRequest) -> LlmResult<()> {
    let verdict = checker.check(&message_text(request)).await;

    if verdict.safe {
        return Ok(());
    }

    log::warn!("Request for model {} rejected by content safety: {}", request.model, verdict.reason);

    Err(LlmError::ContentRejected {
        code: verdict.code,
        message: verdict.reason,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{KeywordChecker, gate};
    use crate::{error::LlmError, messages::claude::ClaudeRequest};

    fn request(content: serde_json::Value) -> ClaudeRequest {
        serde_json::from_value(json!({
            "model": "m",
            "max_tokens": 16,
            "messages": [{"role": "user", "content": content}]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn keywords_match_without_case() {
        let checker = KeywordChecker::new(&["Forbidden".to_string(), " ".to_string()]);

        let rejected = gate(&checker, &request(json!([{"type": "text", "text": "this is FORBIDDEN"}]))).await;

        let Err(LlmError::ContentRejected { code, message }) = rejected else {
            unreachable!("keyword must be rejected");
        };

        assert_eq!(code, "content_blocked");
        assert_eq!(message, "content contains blocked keyword \"forbidden\"");
        assert_eq!(
            LlmError::ContentRejected { code, message }.status_code().as_u16(),
            400
        );
    }

    #[tokio::test]
    async fn clean_requests_pass() {
        let checker = KeywordChecker::new(&["forbidden".to_string()]);

        assert!(gate(&checker, &request(json!("hello there"))).await.is_ok());
    }
}
