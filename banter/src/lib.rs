//! Unified facade over the banter workspace crates.
//!
//! This crate is designed to be the single dependency for most
//! applications. It re-exports the workspace crates and provides
//! convenience utilities for common setup and talk flows.

pub mod prelude;
pub mod runtime;
pub mod util;

pub use bchat;
pub use bcommon;
pub use bpoll;
pub use bprovider;

pub use bchat::{
    ChatBuilder, ChatError, ChatErrorKind, ChatService, Engine, EngineConfig,
    InMemorySessionStore, Session, SessionStore, TalkOptions, TalkReply, Turn, chat_history,
    generative_history,
};
pub use bcommon::{BoxFuture, GenerationSettings, MetadataMap, SessionId};
pub use bpoll::{LoopError, LoopOutcome, LoopRegistry, LoopSettings};
pub use bprovider::{
    Assistant, AssistantDeletion, AssistantExchange, AssistantParams, AssistantPromptOptions,
    AssistantTool, BackendClient, BufferConverter, ChatMessage, ChatPromptOptions, ChatRole,
    ClientConfig, ClientManager, DecodedResponse, DeletionStatus, EventQuery, FileObject,
    FileRemoval, FineTuningJob, GeminiClient, GenerativePromptOptions, JobEvent, MessageInput,
    ModelCatalog, ModelDescriptor, OpenAiClient, Part, ProviderError, ProviderErrorKind,
    ProviderId, ResponseMode, StreamSink, TokenCounter, TrainingCase, UploadConverter,
    UploadInput, VertexClient, build_training_case, build_training_file, first_text, text_parts,
};

pub use runtime::{build_chat, build_chat_with, client_manager, client_manager_with_http};
pub use util::{
    assistant_message, parse_provider_id, system_message, talk_to, user_message,
};
