//! Small request-building helpers for facade consumers.

use crate::{
    ChatMessage, ChatRole, ProviderError, ProviderId, TalkOptions,
};

pub fn parse_provider_id(raw: &str) -> Result<ProviderId, ProviderError> {
    ProviderId::parse(raw)
}

pub fn user_message(content: impl Into<String>) -> ChatMessage {
    ChatMessage::new(ChatRole::User, content)
}

pub fn assistant_message(content: impl Into<String>) -> ChatMessage {
    ChatMessage::new(ChatRole::Assistant, content)
}

pub fn system_message(content: impl Into<String>) -> ChatMessage {
    ChatMessage::new(ChatRole::System, content)
}

/// Talk options targeting the named engine.
pub fn talk_to(engine: impl Into<String>) -> TalkOptions {
    TalkOptions::default().with_engine(engine)
}
