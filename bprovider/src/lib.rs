//! Backend clients for the banter conversational orchestration
//! workspace: a model capability catalog, message codecs for the three
//! backend shape families, and per-provider clients behind one lazy,
//! cached manager.

mod catalog;
mod client;
mod codec;
mod credentials;
mod error;
mod stream;
mod token;
mod upload;

pub mod adapters;

pub use adapters::assistants::{
    Assistant, AssistantDeletion, AssistantExchange, AssistantFile, AssistantParams,
    AssistantPromptOptions, AssistantTool, AssistantsApi, AssistantsHttpApi,
    DEFAULT_ASSISTANT_NAME, DEFAULT_INSTRUCTIONS, FileRemoval, LIST_PAGE_LIMIT,
    MessageContentBlock, Run, RunStatus, TextBlock, Thread, ThreadMessage,
};
pub use adapters::fine_tuning::{
    COMPLETION_MARKER, EventQuery, FineTuningApi, FineTuningHttpApi, FineTuningJob, JobEvent,
    TrainingCase, build_training_case, build_training_file,
};
pub use adapters::gemini::{
    GEMINI_BASE_URL, GeminiApi, GeminiClient, GeminiHttpApi, GenerativeChunk,
    GenerativePromptOptions, GenerativeRequest,
};
pub use adapters::openai::{
    ChatCompletion, ChatCompletionRequest, ChatDelta, ChatPromptOptions, DeletionStatus,
    FileObject, ModelInfo, OPENAI_BASE_URL, OpenAiApi, OpenAiClient, OpenAiHttpApi,
};
pub use adapters::vertex::{
    VERTEX_DEFAULT_LOCATION, VERTEX_PREDICTION_HOST, VertexApi, VertexClient, VertexHttpApi,
};
pub use catalog::{
    EMBEDDING_001, EMBEDDING_GECKO_ML001, GEMINI_PRO, GEMINI_PRO_VISION, GPT_4, GPT_4_1106,
    GPT_4_VISION, GPT_35_TURBO, GPT_35_TURBO_1106, ModelCatalog, ModelDescriptor, ModelPurpose,
    TEXT_EMBEDDING_ADA_002, default_model,
};
pub use client::{BackendClient, ClientConfig, ClientManager, ProviderId};
pub use codec::{
    BackendMessage, ChatMessage, ChatRole, DecodedResponse, MessageInput, MessageShape, Part,
    PartsMessage, ResponseMode, first_text, render_text, text_parts,
};
pub use credentials::SecretString;
pub use error::{ProviderError, ProviderErrorKind};
pub use stream::{SinkError, StreamSink, deliver_quietly};
pub use token::{
    HeuristicTokenCounter, TOKEN_RATIO, TOKEN_SAFE_RATIO, TokenCounter, token_safe,
};
pub use upload::{BufferConverter, UploadConverter, UploadInput, UploadLease, UploadPayload};
