//! Upstream channel definitions.

use secrecy::SecretString;
use serde::Deserialize;

/// Backend family of a channel. The discriminants are the stable numeric codes
/// persisted by channel stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChannelType {
    OpenAI = 1,
    Custom = 8,
    Anthropic = 14,
    Zhipu = 16,
    Ali = 17,
    OpenRouter = 20,
    Gemini = 25,
    Deepseek = 28,
    Moonshot = 29,
    Mistral = 30,
    Groq = 31,
    Bedrock = 32,
    Ollama = 39,
    VertexAI = 42,
    Siliconflow = 45,
    XAI = 56,
}

impl ChannelType {
    /// The numeric code of this backend family.
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// Administrative state of a channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChannelStatus {
    Unknown = 0,
    #[default]
    Enabled = 1,
    ManuallyDisabled = 2,
    AutoDisabled = 3,
}

impl ChannelStatus {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn is_enabled(self) -> bool {
        matches!(self, Self::Enabled)
    }
}

/// A configured upstream backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    /// Unique channel identifier.
    pub id: u64,
    /// Display name used in logs and reports.
    pub name: String,
    /// Backend family.
    #[serde(rename = "type")]
    pub r#type: ChannelType,
    /// Credential for the backend. Bedrock channels use
    /// `region|access_key_id|secret_access_key[|session_token]`.
    /// Vertex AI channels use `location|project_id|access_token`.
    pub key: SecretString,
    /// Overrides the backend family's default endpoint.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Initial status.
    #[serde(default)]
    pub status: ChannelStatus,
    /// Routing weight.
    #[serde(default)]
    pub weight: u32,
    /// Model used by health probes when none is given explicitly.
    #[serde(default)]
    pub test_model: Option<String>,
    /// Models served by the channel. An empty list serves any model.
    #[serde(default)]
    pub models: Vec<String>,
}

impl ChannelConfig {
    /// Whether this channel can serve the given model.
    pub fn serves(&self, model: &str) -> bool {
        self.models.is_empty() || self.models.iter().any(|m| m == model)
    }
}
