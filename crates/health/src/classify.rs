use std::{fmt, sync::OnceLock};

use regex::Regex;

/// What kind of request a model answers, which decides the probe shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelCategory {
    Unsupported,
    Embeddings,
    Image,
    Responses,
    Chat,
}

impl ModelCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unsupported => "unsupported",
            Self::Embeddings => "embeddings",
            Self::Image => "image",
            Self::Responses => "responses",
            Self::Chat => "chat",
        }
    }
}

impl fmt::Display for ModelCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification rules in priority order. The first matching pattern wins,
/// so a name matching both the unsupported and the embeddings rule (`rerank`)
/// is unsupported. Names matching nothing are chat models.
const RULES: &[(&str, ModelCategory)] = &[
    (
        r"^tts|rerank|whisper|speech|^mj_|^chirp",
        ModelCategory::Unsupported,
    ),
    (
        r"^text-|embed|Embed|rerank|davinci|babbage|bge-|e5-|LLM2Vec|retrieval|uae-|gte-|jina-clip|jina-embeddings",
        ModelCategory::Embeddings,
    ),
    (
        r"flux|diffusion|stabilityai|sd-|dall|cogview|janus|image",
        ModelCategory::Image,
    ),
    (r"^o[1-9]", ModelCategory::Responses),
];

fn rules() -> &'static [(Regex, ModelCategory)] {
    static COMPILED: OnceLock<Vec<(Regex, ModelCategory)>> = OnceLock::new();

    COMPILED.get_or_init(|| {
        RULES
            .iter()
            .map(|(pattern, category)| {
                let regex = Regex::new(pattern).expect("classification patterns must compile");
                (regex, *category)
            })
            .collect()
    })
}

/// Classifies a model name by the first matching rule.
pub fn classify(model: &str) -> ModelCategory {
    rules()
        .iter()
        .find(|(regex, _)| regex.is_match(model))
        .map(|(_, category)| *category)
        .unwrap_or(ModelCategory::Chat)
}
