//! Conversational orchestration over heterogeneous generative backends.
//!
//! One [`ChatService::talk`] call speaks to whichever engine is asked
//! for, replays the session history in that backend's shape, and
//! persists the turn in a provider-neutral form.

mod engine;
mod error;
mod service;
mod store;
mod types;

pub mod prelude {
    pub use crate::{
        ChatBuilder, ChatError, ChatErrorKind, ChatService, Engine, EngineConfig,
        InMemorySessionStore, Session, SessionStore, TalkOptions, TalkReply, Turn,
    };
    pub use bcommon::SessionId;
    pub use bprovider::{ClientConfig, ClientManager, Part, StreamSink};
}

pub use engine::{Engine, EngineConfig};
pub use error::{ChatError, ChatErrorKind};
pub use service::{ChatBuilder, ChatService};
pub use store::{InMemorySessionStore, SessionStore};
pub use types::{
    Session, TalkOptions, TalkReply, Turn, chat_history, generative_history,
};
pub use bcommon::SessionId;
