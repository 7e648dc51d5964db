//! Message codecs for the three backend shape families.
//!
//! Every backend wants conversation turns in one of three shapes:
//! role/content pairs (chat completions and the assistant thread API),
//! role/parts pairs (the Vertex generative API), or a bare parts array
//! (the Gemini generative API). The orchestrator picks a
//! [`MessageShape`] per engine and never branches on wire shape itself.
//!
//! Encoding is idempotent: input that is already a structured message
//! passes through unchanged, so a replayed history is never wrapped
//! twice.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Model,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Model => "model",
        }
    }
}

/// A role/content message (chat-completion family).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// One element of a normalized response. A part either carries literal
/// text or it does not; non-text payloads survive as empty parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Part {
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            text: Some(value.into()),
        }
    }

    pub fn empty() -> Self {
        Self { text: None }
    }
}

/// A role/parts message (generative family).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartsMessage {
    pub role: ChatRole,
    pub parts: Vec<Part>,
}

impl PartsMessage {
    pub fn new(role: ChatRole, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![Part::text(text)],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendMessage {
    RoleContent(ChatMessage),
    RoleParts(PartsMessage),
    PartsOnly(Vec<Part>),
}

/// Caller input for one turn: plain text, or a message already in a
/// backend shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageInput {
    Text(String),
    Prebuilt(BackendMessage),
}

impl MessageInput {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }
}

impl From<&str> for MessageInput {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MessageInput {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageShape {
    RoleContent,
    RoleParts,
    PartsOnly,
}

impl MessageShape {
    /// Wraps plain text in this family's message shape. A prebuilt
    /// message passes through untouched. `role` defaults to `User`.
    pub fn encode(
        &self,
        input: MessageInput,
        role: Option<ChatRole>,
    ) -> Result<BackendMessage, ProviderError> {
        let text = match input {
            MessageInput::Prebuilt(message) => return Ok(message),
            MessageInput::Text(text) => text,
        };

        if text.is_empty() {
            return Err(ProviderError::config("message content is required"));
        }

        let role = role.unwrap_or(ChatRole::User);
        Ok(match self {
            Self::RoleContent => BackendMessage::RoleContent(ChatMessage::new(role, text)),
            Self::RoleParts => BackendMessage::RoleParts(PartsMessage::new(role, text)),
            Self::PartsOnly => BackendMessage::PartsOnly(vec![Part::text(text)]),
        })
    }
}

/// How a backend response is handed back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseMode {
    /// Backend payload as received.
    Raw,
    /// Bare text of the first text-carrying part.
    Simple,
    /// The provider-agnostic parts sequence.
    #[default]
    Normalized,
}

/// A backend response after decoding, per the selected [`ResponseMode`].
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedResponse {
    Raw(Value),
    Simple(String),
    Normalized(Vec<Part>),
}

impl DecodedResponse {
    /// The normalized parts view; raw and simple payloads re-wrap their
    /// text so callers can always iterate parts.
    pub fn parts(&self) -> Vec<Part> {
        match self {
            Self::Raw(_) => Vec::new(),
            Self::Simple(text) => text_parts(text.clone()),
            Self::Normalized(parts) => parts.clone(),
        }
    }
}

/// Packs bare text into the normalized single-part response shape.
pub fn text_parts(text: impl Into<String>) -> Vec<Part> {
    vec![Part::text(text)]
}

/// The first part carrying literal text, if any.
pub fn first_text(parts: &[Part]) -> Option<&str> {
    parts.iter().find_map(|part| part.text.as_deref())
}

/// Renders aggregated text into the requested response mode, using `raw`
/// as the Raw payload.
pub fn render_text(text: String, raw: Value, mode: ResponseMode) -> DecodedResponse {
    match mode {
        ResponseMode::Raw => DecodedResponse::Raw(raw),
        ResponseMode::Simple => DecodedResponse::Simple(text),
        ResponseMode::Normalized => DecodedResponse::Normalized(text_parts(text)),
    }
}
