//! Engine identifiers and per-engine configuration.
//!
//! An engine is a user-facing conversational mode; the provider is the
//! backend vendor behind it. Two engines (CHATGPT and ASSISTANT) share
//! the same provider but interact with it in completely different ways.

use std::fmt::{Display, Formatter};

use bprovider::{ModelPurpose, ProviderId, default_model};

use crate::ChatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Engine {
    ChatGpt,
    Assistant,
    Gemini,
    Vertex,
}

impl Engine {
    /// Normalizes a raw engine identifier to canonical upper case and
    /// resolves it. Empty input is a config error.
    pub fn parse(raw: &str) -> Result<Self, ChatError> {
        let canonical = raw.trim().to_uppercase();
        if canonical.is_empty() {
            return Err(ChatError::config("AI engine is required"));
        }

        match canonical.as_str() {
            "CHATGPT" => Ok(Self::ChatGpt),
            "ASSISTANT" => Ok(Self::Assistant),
            "GEMINI" => Ok(Self::Gemini),
            "VERTEX" => Ok(Self::Vertex),
            _ => Err(ChatError::config(format!("invalid AI engine: '{raw}'"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChatGpt => "CHATGPT",
            Self::Assistant => "ASSISTANT",
            Self::Gemini => "GEMINI",
            Self::Vertex => "VERTEX",
        }
    }

    pub fn provider(&self) -> ProviderId {
        match self {
            Self::ChatGpt | Self::Assistant => ProviderId::OpenAi,
            Self::Gemini => ProviderId::Gemini,
            Self::Vertex => ProviderId::Vertex,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::ChatGpt => default_model(ModelPurpose::Chat),
            Self::Assistant => default_model(ModelPurpose::Assistant),
            Self::Gemini => default_model(ModelPurpose::Gemini),
            Self::Vertex => default_model(ModelPurpose::Vertex),
        }
    }
}

impl Display for Engine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for one engine, fixed at build time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineConfig {
    pub model: Option<String>,
    pub assistant_id: Option<String>,
}

impl EngineConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_assistant_id(mut self, assistant_id: impl Into<String>) -> Self {
        self.assistant_id = Some(assistant_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChatErrorKind;

    #[test]
    fn engines_parse_case_insensitively() {
        assert_eq!(Engine::parse("chatgpt").expect("parse"), Engine::ChatGpt);
        assert_eq!(Engine::parse(" ASSISTANT ").expect("parse"), Engine::Assistant);
        assert_eq!(Engine::parse("Gemini").expect("parse"), Engine::Gemini);

        let error = Engine::parse("").expect_err("empty must fail");
        assert_eq!(error.kind, ChatErrorKind::Config);
        assert_eq!(error.message, "AI engine is required");

        let error = Engine::parse("eliza").expect_err("unknown must fail");
        assert_eq!(error.kind, ChatErrorKind::Config);
    }

    #[test]
    fn engines_map_to_providers_and_default_models() {
        assert_eq!(Engine::ChatGpt.provider(), ProviderId::OpenAi);
        assert_eq!(Engine::Assistant.provider(), ProviderId::OpenAi);
        assert_eq!(Engine::Gemini.provider(), ProviderId::Gemini);
        assert_eq!(Engine::Vertex.provider(), ProviderId::Vertex);

        assert_eq!(Engine::ChatGpt.default_model(), "gpt-3.5-turbo");
        assert_eq!(Engine::Gemini.default_model(), "gemini-pro");
        assert_eq!(Engine::Vertex.default_model(), "gemini-pro-vision");
    }
}
