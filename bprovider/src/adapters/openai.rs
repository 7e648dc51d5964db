//! OpenAI client: chat completions, model listing, embeddings, and the
//! file API, over a swappable typed transport.

use std::sync::Arc;

use bcommon::BoxFuture;
use reqwest::{Client, multipart};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapters::assistants::{AssistantsApi, AssistantsHttpApi};
use crate::adapters::fine_tuning::{FineTuningApi, FineTuningHttpApi};
use crate::adapters::{read_json, read_sse_payloads, transport_error};
use crate::{
    BackendMessage, ChatMessage, DecodedResponse, HeuristicTokenCounter, MessageInput,
    MessageShape, ModelPurpose, ProviderError, ResponseMode, SecretString, StreamSink,
    TokenCounter, UploadConverter, UploadInput, UploadPayload, default_model, deliver_quietly,
    render_text, text_parts,
};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// A chat-completion request in the role/content shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
}

/// A finished completion, with the backend payload preserved for raw
/// response mode.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatCompletion {
    pub model: String,
    pub content: String,
    pub raw: Value,
}

/// One incremental piece of a streamed completion.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatDelta {
    pub content: String,
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub owned_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileObject {
    pub id: String,
    pub filename: Option<String>,
    pub purpose: Option<String>,
    pub bytes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeletionStatus {
    pub id: String,
    pub deleted: bool,
}

pub trait OpenAiApi: Send + Sync {
    fn chat_complete<'a>(
        &'a self,
        request: ChatCompletionRequest,
    ) -> BoxFuture<'a, Result<ChatCompletion, ProviderError>>;

    fn chat_stream<'a>(
        &'a self,
        request: ChatCompletionRequest,
    ) -> BoxFuture<'a, Result<Vec<ChatDelta>, ProviderError>>;

    fn list_models<'a>(&'a self) -> BoxFuture<'a, Result<Vec<ModelInfo>, ProviderError>>;

    fn create_embedding<'a>(
        &'a self,
        model: String,
        input: String,
    ) -> BoxFuture<'a, Result<Vec<f32>, ProviderError>>;

    fn upload_file<'a>(
        &'a self,
        payload: UploadPayload,
        purpose: String,
    ) -> BoxFuture<'a, Result<FileObject, ProviderError>>;

    fn list_files<'a>(&'a self) -> BoxFuture<'a, Result<Vec<FileObject>, ProviderError>>;

    fn delete_file<'a>(
        &'a self,
        file_id: &'a str,
    ) -> BoxFuture<'a, Result<DeletionStatus, ProviderError>>;
}

/// HTTP transport over the production endpoints.
#[derive(Debug, Clone)]
pub struct OpenAiHttpApi {
    client: Client,
    base_url: String,
    api_key: Arc<SecretString>,
}

impl OpenAiHttpApi {
    pub fn new(client: Client, api_key: Arc<SecretString>) -> Self {
        Self {
            client,
            base_url: OPENAI_BASE_URL.to_string(),
            api_key,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn build_api_request(request: &ChatCompletionRequest) -> ChatApiRequest {
        ChatApiRequest {
            model: request.model.clone(),
            messages: request
                .messages
                .iter()
                .map(|message| ChatApiMessage {
                    role: message.role.as_str().to_string(),
                    content: message.content.clone(),
                })
                .collect(),
            stream: request.stream,
        }
    }
}

impl OpenAiApi for OpenAiHttpApi {
    fn chat_complete<'a>(
        &'a self,
        request: ChatCompletionRequest,
    ) -> BoxFuture<'a, Result<ChatCompletion, ProviderError>> {
        Box::pin(async move {
            let body = Self::build_api_request(&request);
            let response = self
                .client
                .post(self.endpoint("chat/completions"))
                .bearer_auth(self.api_key.expose())
                .json(&body)
                .send()
                .await
                .map_err(transport_error)?;

            let raw: Value = read_json(response).await?;
            let parsed: ChatApiResponse =
                serde_json::from_value(raw.clone()).map_err(|err| {
                    ProviderError::backend(format!("malformed completion payload: {err}"))
                })?;

            let choice = parsed.choices.into_iter().next().ok_or_else(|| {
                ProviderError::backend("completion response did not include choices")
            })?;

            Ok(ChatCompletion {
                model: parsed.model,
                content: choice.message.content.unwrap_or_default(),
                raw,
            })
        })
    }

    fn chat_stream<'a>(
        &'a self,
        mut request: ChatCompletionRequest,
    ) -> BoxFuture<'a, Result<Vec<ChatDelta>, ProviderError>> {
        Box::pin(async move {
            request.stream = true;
            let body = Self::build_api_request(&request);
            let response = self
                .client
                .post(self.endpoint("chat/completions"))
                .bearer_auth(self.api_key.expose())
                .json(&body)
                .send()
                .await
                .map_err(transport_error)?;

            let payloads = read_sse_payloads(response).await?;
            let mut deltas = Vec::new();

            for payload in payloads {
                let raw: Value = serde_json::from_str(&payload)
                    .map_err(|err| ProviderError::backend(err.to_string()))?;
                let parsed: ChatApiStreamResponse = serde_json::from_value(raw.clone())
                    .map_err(|err| ProviderError::backend(err.to_string()))?;

                let content = parsed
                    .choices
                    .first()
                    .and_then(|choice| choice.delta.content.clone())
                    .unwrap_or_default();

                deltas.push(ChatDelta { content, raw });
            }

            Ok(deltas)
        })
    }

    fn list_models<'a>(&'a self) -> BoxFuture<'a, Result<Vec<ModelInfo>, ProviderError>> {
        Box::pin(async move {
            let response = self
                .client
                .get(self.endpoint("models"))
                .bearer_auth(self.api_key.expose())
                .send()
                .await
                .map_err(transport_error)?;

            let parsed: ListEnvelope<ModelInfo> = read_json(response).await?;
            Ok(parsed.data)
        })
    }

    fn create_embedding<'a>(
        &'a self,
        model: String,
        input: String,
    ) -> BoxFuture<'a, Result<Vec<f32>, ProviderError>> {
        Box::pin(async move {
            let response = self
                .client
                .post(self.endpoint("embeddings"))
                .bearer_auth(self.api_key.expose())
                .json(&EmbeddingApiRequest { model, input })
                .send()
                .await
                .map_err(transport_error)?;

            let parsed: ListEnvelope<EmbeddingApiItem> = read_json(response).await?;
            let first = parsed.data.into_iter().next().ok_or_else(|| {
                ProviderError::backend("embedding response did not include data")
            })?;

            Ok(first.embedding)
        })
    }

    fn upload_file<'a>(
        &'a self,
        payload: UploadPayload,
        purpose: String,
    ) -> BoxFuture<'a, Result<FileObject, ProviderError>> {
        Box::pin(async move {
            let part = multipart::Part::bytes(payload.content).file_name(payload.file_name);
            let form = multipart::Form::new().text("purpose", purpose).part("file", part);

            let response = self
                .client
                .post(self.endpoint("files"))
                .bearer_auth(self.api_key.expose())
                .multipart(form)
                .send()
                .await
                .map_err(transport_error)?;

            read_json(response).await
        })
    }

    fn list_files<'a>(&'a self) -> BoxFuture<'a, Result<Vec<FileObject>, ProviderError>> {
        Box::pin(async move {
            let response = self
                .client
                .get(self.endpoint("files"))
                .bearer_auth(self.api_key.expose())
                .send()
                .await
                .map_err(transport_error)?;

            let parsed: ListEnvelope<FileObject> = read_json(response).await?;
            Ok(parsed.data)
        })
    }

    fn delete_file<'a>(
        &'a self,
        file_id: &'a str,
    ) -> BoxFuture<'a, Result<DeletionStatus, ProviderError>> {
        Box::pin(async move {
            let response = self
                .client
                .delete(self.endpoint(&format!("files/{file_id}")))
                .bearer_auth(self.api_key.expose())
                .send()
                .await
                .map_err(transport_error)?;

            read_json(response).await
        })
    }
}

/// Options for one chat-completion prompt.
#[derive(Clone, Default)]
pub struct ChatPromptOptions {
    pub model: Option<String>,
    pub history: Vec<ChatMessage>,
    pub mode: ResponseMode,
    pub sink: Option<Arc<dyn StreamSink>>,
}

impl ChatPromptOptions {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }

    pub fn with_mode(mut self, mode: ResponseMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn StreamSink>) -> Self {
        self.sink = Some(sink);
        self
    }
}

/// The OpenAI backend handle: the core API plus the assistant and
/// fine-tuning surfaces, bundled with a token counter.
#[derive(Clone)]
pub struct OpenAiClient {
    api: Arc<dyn OpenAiApi>,
    assistants: Arc<dyn AssistantsApi>,
    tuning: Arc<dyn FineTuningApi>,
    tokens: Arc<dyn TokenCounter>,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("OpenAiClient")
    }
}

impl OpenAiClient {
    pub fn new(
        api: Arc<dyn OpenAiApi>,
        assistants: Arc<dyn AssistantsApi>,
        tuning: Arc<dyn FineTuningApi>,
        tokens: Arc<dyn TokenCounter>,
    ) -> Self {
        Self {
            api,
            assistants,
            tuning,
            tokens,
        }
    }

    /// Builds a client over the production HTTP endpoints.
    pub fn over_http(http: Client, api_key: impl Into<String>) -> Self {
        let api_key = Arc::new(SecretString::new(api_key));
        Self::new(
            Arc::new(OpenAiHttpApi::new(http.clone(), Arc::clone(&api_key))),
            Arc::new(AssistantsHttpApi::new(http.clone(), Arc::clone(&api_key))),
            Arc::new(FineTuningHttpApi::new(http, api_key)),
            Arc::new(HeuristicTokenCounter),
        )
    }

    /// Swaps in an exact tokenizer.
    pub fn with_token_counter(mut self, tokens: Arc<dyn TokenCounter>) -> Self {
        self.tokens = tokens;
        self
    }

    pub(crate) fn assistants_api(&self) -> &Arc<dyn AssistantsApi> {
        &self.assistants
    }

    pub(crate) fn files_api(&self) -> &Arc<dyn OpenAiApi> {
        &self.api
    }

    pub(crate) fn tuning_api(&self) -> &Arc<dyn FineTuningApi> {
        &self.tuning
    }

    pub fn count_tokens(&self, text: &str) -> u32 {
        self.tokens.count_tokens(text)
    }

    /// Sends one turn (plus re-rendered history) to the chat-completion
    /// endpoint. With a sink configured the call streams, delivering the
    /// accumulated text so far on every chunk; the return value is the
    /// final snapshot.
    pub async fn prompt_chat(
        &self,
        input: MessageInput,
        options: ChatPromptOptions,
    ) -> Result<DecodedResponse, ProviderError> {
        let message = match MessageShape::RoleContent.encode(input, None)? {
            BackendMessage::RoleContent(message) => message,
            _ => {
                return Err(ProviderError::config(
                    "chat prompts expect a role/content message",
                ));
            }
        };

        let mut messages = options.history;
        messages.push(message);

        let request = ChatCompletionRequest {
            model: options
                .model
                .unwrap_or_else(|| default_model(ModelPurpose::Chat).to_string()),
            messages,
            stream: options.sink.is_some(),
        };

        let Some(sink) = options.sink else {
            let completion = self.api.chat_complete(request).await?;
            return Ok(render_text(completion.content, completion.raw, options.mode));
        };

        let deltas = self.api.chat_stream(request).await?;
        let mut aggregated = String::new();
        let mut last_raw = Value::Null;

        for delta in deltas {
            aggregated.push_str(&delta.content);
            let snapshot = match options.mode {
                ResponseMode::Raw => DecodedResponse::Raw(delta.raw.clone()),
                ResponseMode::Simple => DecodedResponse::Simple(aggregated.clone()),
                ResponseMode::Normalized => {
                    DecodedResponse::Normalized(text_parts(aggregated.clone()))
                }
            };

            deliver_quietly(Some(&sink), snapshot).await;
            last_raw = delta.raw;
        }

        Ok(render_text(aggregated, last_raw, options.mode))
    }

    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        self.api.list_models().await
    }

    pub async fn create_embedding(
        &self,
        input: &str,
        model: Option<&str>,
    ) -> Result<Vec<f32>, ProviderError> {
        if input.trim().is_empty() {
            return Err(ProviderError::config("text is required"));
        }

        let model = model
            .unwrap_or(default_model(ModelPurpose::OpenAiEmbedding))
            .to_string();
        self.api.create_embedding(model, input.to_string()).await
    }

    /// Converts the input into a stream payload, submits it, and
    /// releases the conversion on every exit path including upload
    /// failure.
    pub async fn upload_file(
        &self,
        converter: &dyn UploadConverter,
        input: UploadInput,
        purpose: &str,
        suffix: Option<&str>,
    ) -> Result<FileObject, ProviderError> {
        let lease = converter.convert(input, suffix).await?;
        let payload = lease.payload.clone();
        let result = self.api.upload_file(payload, purpose.to_string()).await;
        lease.release().await;
        result
    }

    pub async fn upload_for_assistants(
        &self,
        converter: &dyn UploadConverter,
        input: UploadInput,
    ) -> Result<FileObject, ProviderError> {
        self.upload_file(converter, input, "assistants", None).await
    }

    pub async fn upload_for_fine_tuning(
        &self,
        converter: &dyn UploadConverter,
        input: UploadInput,
    ) -> Result<FileObject, ProviderError> {
        self.upload_file(converter, input, "fine-tune", Some("jsonl"))
            .await
    }

    pub async fn list_files(&self) -> Result<Vec<FileObject>, ProviderError> {
        self.api.list_files().await
    }

    pub async fn delete_file(&self, file_id: &str) -> Result<DeletionStatus, ProviderError> {
        self.api.delete_file(file_id).await
    }
}

#[derive(Debug, Serialize)]
struct ChatApiRequest {
    model: String,
    messages: Vec<ChatApiMessage>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatApiResponse {
    model: String,
    choices: Vec<ChatApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatApiChoice {
    message: ChatApiAssistantMessage,
}

#[derive(Debug, Deserialize)]
struct ChatApiAssistantMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatApiStreamResponse {
    choices: Vec<ChatApiStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatApiStreamChoice {
    delta: ChatApiStreamDelta,
}

#[derive(Debug, Deserialize)]
struct ChatApiStreamDelta {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbeddingApiRequest {
    model: String,
    input: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiItem {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListEnvelope<T> {
    pub(crate) data: Vec<T>,
}
