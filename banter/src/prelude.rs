//! One-line import for the common banter surface.

pub use crate::{
    ChatError, ChatErrorKind, ChatService, ClientConfig, ClientManager, DecodedResponse, Engine,
    EngineConfig, InMemorySessionStore, LoopRegistry, LoopSettings, MessageInput, Part,
    ProviderError, ProviderErrorKind, ProviderId, ResponseMode, Session, SessionId, SessionStore,
    StreamSink, TalkOptions, TalkReply, Turn, build_chat, build_chat_with, client_manager,
    talk_to,
};
