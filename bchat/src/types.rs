//! Session, turn, and talk request/reply types.

use std::sync::Arc;

use bcommon::SessionId;
use bprovider::{ChatMessage, ChatRole, Part, PartsMessage, StreamSink};
use serde::{Deserialize, Serialize};

/// One conversation turn in provider-neutral form. `response` stays
/// unset when the backend reply carried no literal text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub request: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

impl Turn {
    pub fn new(request: impl Into<String>, response: Option<String>) -> Self {
        Self {
            request: request.into(),
            response,
        }
    }
}

/// The client-side record of a conversation: its turn history plus
/// continuity metadata. History is persisted only in this neutral form
/// and re-projected into a backend shape on every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub turns: Vec<Turn>,
    pub system_prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

impl Session {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            turns: Vec::new(),
            system_prompt: system_prompt.into(),
            thread_id: None,
        }
    }
}

/// Re-renders stored turns into the role/content shape.
pub fn chat_history(turns: &[Turn]) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    for turn in turns {
        messages.push(ChatMessage::new(ChatRole::User, turn.request.clone()));
        if let Some(response) = &turn.response {
            messages.push(ChatMessage::new(ChatRole::Assistant, response.clone()));
        }
    }

    messages
}

/// Re-renders stored turns into the role/parts shape.
pub fn generative_history(turns: &[Turn]) -> Vec<PartsMessage> {
    let mut messages = Vec::new();
    for turn in turns {
        messages.push(PartsMessage::new(ChatRole::User, turn.request.clone()));
        if let Some(response) = &turn.response {
            messages.push(PartsMessage::new(ChatRole::Model, response.clone()));
        }
    }

    messages
}

/// Per-call options for [`crate::ChatService::talk`].
#[derive(Clone, Default)]
pub struct TalkOptions {
    pub engine: Option<String>,
    pub session_id: Option<SessionId>,
    pub sink: Option<Arc<dyn StreamSink>>,
    pub delete_thread: bool,
}

impl TalkOptions {
    pub fn with_engine(mut self, engine: impl Into<String>) -> Self {
        self.engine = Some(engine.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<SessionId>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn StreamSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn delete_thread_after(mut self) -> Self {
        self.delete_thread = true;
        self
    }
}

/// The reply to one talk call: the session it belongs to and the full
/// normalized parts sequence, so multi-part payloads survive even
/// though history stores only the extracted text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TalkReply {
    pub session_id: SessionId,
    pub response: Vec<Part>,
}

#[cfg(test)]
mod tests {
    use bprovider::first_text;

    use super::*;

    fn turns() -> Vec<Turn> {
        vec![
            Turn::new("Hello", Some("Hi there".to_string())),
            Turn::new("Still there?", None),
        ]
    }

    #[test]
    fn chat_history_skips_missing_responses() {
        let messages = chat_history(&turns());

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0], ChatMessage::new(ChatRole::User, "Hello"));
        assert_eq!(messages[1], ChatMessage::new(ChatRole::Assistant, "Hi there"));
        assert_eq!(messages[2], ChatMessage::new(ChatRole::User, "Still there?"));
    }

    #[test]
    fn generative_history_uses_the_model_role() {
        let messages = generative_history(&turns());

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, ChatRole::User);
        assert_eq!(messages[1].role, ChatRole::Model);
        assert_eq!(messages[1].parts, vec![Part::text("Hi there")]);
    }

    #[test]
    fn projection_round_trips_plain_text_turns() {
        let turns = vec![Turn::new("ask", Some("answer".to_string()))];

        let chat = chat_history(&turns);
        assert_eq!(chat[0].content, turns[0].request);
        assert_eq!(chat[1].content, turns[0].response.clone().unwrap());

        let generative = generative_history(&turns);
        assert_eq!(first_text(&generative[0].parts), Some("ask"));
        assert_eq!(first_text(&generative[1].parts), Some("answer"));
    }

    #[test]
    fn sessions_serialize_without_empty_optionals() {
        let session = Session::new("You are terse.");
        let json = serde_json::to_string(&session).expect("session should serialize");
        assert!(!json.contains("thread_id"));

        let parsed: Session = serde_json::from_str(&json).expect("session should parse");
        assert_eq!(parsed, session);
    }
}
