use std::fmt;

/// An operation a provider handle can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Chat,
    ChatStream,
    ClaudeChat,
    ClaudeChatStream,
    Embeddings,
    ImageGeneration,
    Responses,
    ResponsesStream,
}

impl Capability {
    const ALL: [Capability; 8] = [
        Capability::Chat,
        Capability::ChatStream,
        Capability::ClaudeChat,
        Capability::ClaudeChatStream,
        Capability::Embeddings,
        Capability::ImageGeneration,
        Capability::Responses,
        Capability::ResponsesStream,
    ];

    const fn bit(self) -> u8 {
        1 << self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Chat => "chat",
            Capability::ChatStream => "chat-stream",
            Capability::ClaudeChat => "claude-chat",
            Capability::ClaudeChatStream => "claude-chat-stream",
            Capability::Embeddings => "embeddings",
            Capability::ImageGeneration => "image-generation",
            Capability::Responses => "responses",
            Capability::ResponsesStream => "responses-stream",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of [`Capability`] values, fixed when a provider is constructed.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn with(self, capability: Capability) -> Self {
        Self(self.0 | capability.bit())
    }

    /// Chat and chat streaming.
    pub const fn chat() -> Self {
        Self::empty().with(Capability::Chat).with(Capability::ChatStream)
    }

    /// Native Claude messages, streaming included.
    pub const fn claude() -> Self {
        Self::empty()
            .with(Capability::ClaudeChat)
            .with(Capability::ClaudeChatStream)
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn supports(self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    pub fn iter(self) -> impl Iterator<Item = Capability> {
        Capability::ALL.into_iter().filter(move |c| self.supports(*c))
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

impl fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(Capability::as_str)).finish()
    }
}
