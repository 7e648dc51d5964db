//! Assistant lifecycle: assistants, threads, messages, runs, and file
//! attachment over the stateful backend.
//!
//! Every operation is a direct round-trip; nothing is cached locally.
//! The one non-trivial flow is [`OpenAiClient::prompt_assistant`], which
//! drives a run to completion through the polling-loop registry.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bcommon::BoxFuture;
use bpoll::{LoopError, LoopRegistry, LoopSettings};
use futures_util::future::join_all;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapters::openai::{DeletionStatus, ListEnvelope, OpenAiClient};
use crate::adapters::{read_json, transport_error};
use crate::{
    BackendMessage, ChatMessage, DecodedResponse, MessageInput, MessageShape, ModelPurpose,
    Part, ProviderError, ResponseMode, SecretString, StreamSink, UploadConverter, UploadInput,
    default_model, deliver_quietly, text_parts,
};

pub const DEFAULT_ASSISTANT_NAME: &str = "Banter";
pub const DEFAULT_INSTRUCTIONS: &str = "You are a helpful assistant.";

/// Fixed page size for every list call against the stateful backend.
pub const LIST_PAGE_LIMIT: u32 = 100;

const BETA_HEADER: (&str, &str) = ("OpenAI-Beta", "assistants=v1");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantTool {
    #[serde(rename = "type")]
    pub kind: String,
}

impl AssistantTool {
    pub fn code_interpreter() -> Self {
        Self {
            kind: "code_interpreter".to_string(),
        }
    }

    pub fn retrieval() -> Self {
        Self {
            kind: "retrieval".to_string(),
        }
    }

    pub fn function() -> Self {
        Self {
            kind: "function".to_string(),
        }
    }
}

/// Create/update body for an assistant. Unset fields are filled with
/// workspace defaults on create and left untouched on update.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct AssistantParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<AssistantTool>>,
}

impl AssistantParams {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<AssistantTool>) -> Self {
        self.tools = Some(tools);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Assistant {
    pub id: String,
    pub name: Option<String>,
    pub model: Option<String>,
    pub instructions: Option<String>,
    #[serde(default)]
    pub tools: Vec<AssistantTool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Thread {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ThreadMessage {
    pub id: String,
    pub role: Option<String>,
    #[serde(default)]
    pub content: Vec<MessageContentBlock>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessageContentBlock {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub text: Option<TextBlock>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TextBlock {
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Expired,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    #[serde(default)]
    pub status: RunStatus,
    pub thread_id: Option<String>,
    pub assistant_id: Option<String>,
}

/// A file reference attached to an assistant.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AssistantFile {
    pub id: String,
}

/// Outcome of one detach+delete pair during a cascade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRemoval {
    pub file_id: String,
    pub detach: Result<DeletionStatus, ProviderError>,
    pub delete: Result<DeletionStatus, ProviderError>,
}

/// Result of a cascading assistant delete: the per-file cleanup report
/// plus the outcome of the assistant delete itself, reported
/// independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantDeletion {
    pub cleanup: Vec<FileRemoval>,
    pub deleted: Result<DeletionStatus, ProviderError>,
}

pub trait AssistantsApi: Send + Sync {
    fn create_assistant<'a>(
        &'a self,
        params: AssistantParams,
    ) -> BoxFuture<'a, Result<Assistant, ProviderError>>;

    fn get_assistant<'a>(
        &'a self,
        assistant_id: &'a str,
    ) -> BoxFuture<'a, Result<Assistant, ProviderError>>;

    fn update_assistant<'a>(
        &'a self,
        assistant_id: &'a str,
        params: AssistantParams,
    ) -> BoxFuture<'a, Result<Assistant, ProviderError>>;

    fn list_assistants<'a>(
        &'a self,
        limit: u32,
    ) -> BoxFuture<'a, Result<Vec<Assistant>, ProviderError>>;

    fn delete_assistant<'a>(
        &'a self,
        assistant_id: &'a str,
    ) -> BoxFuture<'a, Result<DeletionStatus, ProviderError>>;

    fn create_thread<'a>(&'a self) -> BoxFuture<'a, Result<Thread, ProviderError>>;

    fn get_thread<'a>(
        &'a self,
        thread_id: &'a str,
    ) -> BoxFuture<'a, Result<Thread, ProviderError>>;

    fn delete_thread<'a>(
        &'a self,
        thread_id: &'a str,
    ) -> BoxFuture<'a, Result<DeletionStatus, ProviderError>>;

    fn create_message<'a>(
        &'a self,
        thread_id: &'a str,
        message: ChatMessage,
    ) -> BoxFuture<'a, Result<ThreadMessage, ProviderError>>;

    fn list_messages<'a>(
        &'a self,
        thread_id: &'a str,
        limit: Option<u32>,
    ) -> BoxFuture<'a, Result<Vec<ThreadMessage>, ProviderError>>;

    fn create_run<'a>(
        &'a self,
        thread_id: &'a str,
        assistant_id: &'a str,
    ) -> BoxFuture<'a, Result<Run, ProviderError>>;

    fn get_run<'a>(
        &'a self,
        thread_id: &'a str,
        run_id: &'a str,
    ) -> BoxFuture<'a, Result<Run, ProviderError>>;

    fn attach_file<'a>(
        &'a self,
        assistant_id: &'a str,
        file_id: &'a str,
    ) -> BoxFuture<'a, Result<AssistantFile, ProviderError>>;

    fn detach_file<'a>(
        &'a self,
        assistant_id: &'a str,
        file_id: &'a str,
    ) -> BoxFuture<'a, Result<DeletionStatus, ProviderError>>;

    fn list_attached_files<'a>(
        &'a self,
        assistant_id: &'a str,
        limit: u32,
    ) -> BoxFuture<'a, Result<Vec<AssistantFile>, ProviderError>>;
}

/// HTTP transport over the beta assistant endpoints.
#[derive(Debug, Clone)]
pub struct AssistantsHttpApi {
    client: Client,
    base_url: String,
    api_key: Arc<SecretString>,
}

impl AssistantsHttpApi {
    pub fn new(client: Client, api_key: Arc<SecretString>) -> Self {
        Self {
            client,
            base_url: crate::adapters::openai::OPENAI_BASE_URL.to_string(),
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

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(self.endpoint(path))
            .bearer_auth(self.api_key.expose())
            .header(BETA_HEADER.0, BETA_HEADER.1)
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(self.endpoint(path))
            .bearer_auth(self.api_key.expose())
            .header(BETA_HEADER.0, BETA_HEADER.1)
    }

    fn delete(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .delete(self.endpoint(path))
            .bearer_auth(self.api_key.expose())
            .header(BETA_HEADER.0, BETA_HEADER.1)
    }
}

impl AssistantsApi for AssistantsHttpApi {
    fn create_assistant<'a>(
        &'a self,
        params: AssistantParams,
    ) -> BoxFuture<'a, Result<Assistant, ProviderError>> {
        Box::pin(async move {
            let response = self
                .post("assistants")
                .json(&params)
                .send()
                .await
                .map_err(transport_error)?;
            read_json(response).await
        })
    }

    fn get_assistant<'a>(
        &'a self,
        assistant_id: &'a str,
    ) -> BoxFuture<'a, Result<Assistant, ProviderError>> {
        Box::pin(async move {
            let response = self
                .get(&format!("assistants/{assistant_id}"))
                .send()
                .await
                .map_err(transport_error)?;
            read_json(response).await
        })
    }

    fn update_assistant<'a>(
        &'a self,
        assistant_id: &'a str,
        params: AssistantParams,
    ) -> BoxFuture<'a, Result<Assistant, ProviderError>> {
        Box::pin(async move {
            let response = self
                .post(&format!("assistants/{assistant_id}"))
                .json(&params)
                .send()
                .await
                .map_err(transport_error)?;
            read_json(response).await
        })
    }

    fn list_assistants<'a>(
        &'a self,
        limit: u32,
    ) -> BoxFuture<'a, Result<Vec<Assistant>, ProviderError>> {
        Box::pin(async move {
            let response = self
                .get("assistants")
                .query(&[("order", "asc"), ("limit", &limit.to_string())])
                .send()
                .await
                .map_err(transport_error)?;

            let parsed: ListEnvelope<Assistant> = read_json(response).await?;
            Ok(parsed.data)
        })
    }

    fn delete_assistant<'a>(
        &'a self,
        assistant_id: &'a str,
    ) -> BoxFuture<'a, Result<DeletionStatus, ProviderError>> {
        Box::pin(async move {
            let response = self
                .delete(&format!("assistants/{assistant_id}"))
                .send()
                .await
                .map_err(transport_error)?;
            read_json(response).await
        })
    }

    fn create_thread<'a>(&'a self) -> BoxFuture<'a, Result<Thread, ProviderError>> {
        Box::pin(async move {
            let response = self
                .post("threads")
                .json(&Value::Object(serde_json::Map::new()))
                .send()
                .await
                .map_err(transport_error)?;
            read_json(response).await
        })
    }

    fn get_thread<'a>(
        &'a self,
        thread_id: &'a str,
    ) -> BoxFuture<'a, Result<Thread, ProviderError>> {
        Box::pin(async move {
            let response = self
                .get(&format!("threads/{thread_id}"))
                .send()
                .await
                .map_err(transport_error)?;
            read_json(response).await
        })
    }

    fn delete_thread<'a>(
        &'a self,
        thread_id: &'a str,
    ) -> BoxFuture<'a, Result<DeletionStatus, ProviderError>> {
        Box::pin(async move {
            let response = self
                .delete(&format!("threads/{thread_id}"))
                .send()
                .await
                .map_err(transport_error)?;
            read_json(response).await
        })
    }

    fn create_message<'a>(
        &'a self,
        thread_id: &'a str,
        message: ChatMessage,
    ) -> BoxFuture<'a, Result<ThreadMessage, ProviderError>> {
        Box::pin(async move {
            let body = serde_json::json!({
                "role": message.role.as_str(),
                "content": message.content,
            });

            let response = self
                .post(&format!("threads/{thread_id}/messages"))
                .json(&body)
                .send()
                .await
                .map_err(transport_error)?;
            read_json(response).await
        })
    }

    fn list_messages<'a>(
        &'a self,
        thread_id: &'a str,
        limit: Option<u32>,
    ) -> BoxFuture<'a, Result<Vec<ThreadMessage>, ProviderError>> {
        Box::pin(async move {
            let mut request = self.get(&format!("threads/{thread_id}/messages"));
            if let Some(limit) = limit {
                request = request.query(&[("limit", limit.to_string())]);
            }

            let response = request.send().await.map_err(transport_error)?;
            let parsed: ListEnvelope<ThreadMessage> = read_json(response).await?;
            Ok(parsed.data)
        })
    }

    fn create_run<'a>(
        &'a self,
        thread_id: &'a str,
        assistant_id: &'a str,
    ) -> BoxFuture<'a, Result<Run, ProviderError>> {
        Box::pin(async move {
            let body = serde_json::json!({ "assistant_id": assistant_id });
            let response = self
                .post(&format!("threads/{thread_id}/runs"))
                .json(&body)
                .send()
                .await
                .map_err(transport_error)?;
            read_json(response).await
        })
    }

    fn get_run<'a>(
        &'a self,
        thread_id: &'a str,
        run_id: &'a str,
    ) -> BoxFuture<'a, Result<Run, ProviderError>> {
        Box::pin(async move {
            let response = self
                .get(&format!("threads/{thread_id}/runs/{run_id}"))
                .send()
                .await
                .map_err(transport_error)?;
            read_json(response).await
        })
    }

    fn attach_file<'a>(
        &'a self,
        assistant_id: &'a str,
        file_id: &'a str,
    ) -> BoxFuture<'a, Result<AssistantFile, ProviderError>> {
        Box::pin(async move {
            let body = serde_json::json!({ "file_id": file_id });
            let response = self
                .post(&format!("assistants/{assistant_id}/files"))
                .json(&body)
                .send()
                .await
                .map_err(transport_error)?;
            read_json(response).await
        })
    }

    fn detach_file<'a>(
        &'a self,
        assistant_id: &'a str,
        file_id: &'a str,
    ) -> BoxFuture<'a, Result<DeletionStatus, ProviderError>> {
        Box::pin(async move {
            let response = self
                .delete(&format!("assistants/{assistant_id}/files/{file_id}"))
                .send()
                .await
                .map_err(transport_error)?;
            read_json(response).await
        })
    }

    fn list_attached_files<'a>(
        &'a self,
        assistant_id: &'a str,
        limit: u32,
    ) -> BoxFuture<'a, Result<Vec<AssistantFile>, ProviderError>> {
        Box::pin(async move {
            let response = self
                .get(&format!("assistants/{assistant_id}/files"))
                .query(&[("limit", limit.to_string())])
                .send()
                .await
                .map_err(transport_error)?;

            let parsed: ListEnvelope<AssistantFile> = read_json(response).await?;
            Ok(parsed.data)
        })
    }
}

/// Options for one assistant exchange.
#[derive(Clone)]
pub struct AssistantPromptOptions {
    pub assistant_id: Option<String>,
    pub thread_id: Option<String>,
    pub params: AssistantParams,
    pub delete_thread: bool,
    pub mode: ResponseMode,
    pub sink: Option<Arc<dyn StreamSink>>,
    pub poll: LoopSettings,
}

impl Default for AssistantPromptOptions {
    fn default() -> Self {
        Self {
            assistant_id: None,
            thread_id: None,
            params: AssistantParams::default(),
            delete_thread: false,
            mode: ResponseMode::default(),
            sink: None,
            poll: LoopSettings::new(3, Duration::from_secs(2), Duration::from_secs(1)).silent(),
        }
    }
}

impl AssistantPromptOptions {
    pub fn with_assistant_id(mut self, assistant_id: impl Into<String>) -> Self {
        self.assistant_id = Some(assistant_id.into());
        self
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_params(mut self, params: AssistantParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn StreamSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_poll(mut self, poll: LoopSettings) -> Self {
        self.poll = poll;
        self
    }

    pub fn delete_thread_after(mut self) -> Self {
        self.delete_thread = true;
        self
    }
}

/// Everything one assistant exchange touched, plus the normalized reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantExchange {
    pub assistant: Assistant,
    pub thread: Thread,
    pub message_sent: ThreadMessage,
    pub run: Run,
    pub message_received: ThreadMessage,
    pub thread_deleted: Option<DeletionStatus>,
    pub response: Vec<Part>,
}

impl OpenAiClient {
    pub async fn create_assistant(
        &self,
        params: AssistantParams,
    ) -> Result<Assistant, ProviderError> {
        let mut params = params;
        params.model = params
            .model
            .or_else(|| Some(default_model(ModelPurpose::Assistant).to_string()));
        params.name = params.name.or_else(|| Some(DEFAULT_ASSISTANT_NAME.to_string()));
        params.instructions = params
            .instructions
            .or_else(|| Some(DEFAULT_INSTRUCTIONS.to_string()));
        params.tools = params.tools.or_else(|| {
            Some(vec![
                AssistantTool::code_interpreter(),
                AssistantTool::retrieval(),
            ])
        });

        self.assistants_api().create_assistant(params).await
    }

    pub async fn get_assistant(&self, assistant_id: &str) -> Result<Assistant, ProviderError> {
        self.assistants_api().get_assistant(assistant_id).await
    }

    pub async fn update_assistant(
        &self,
        assistant_id: &str,
        params: AssistantParams,
    ) -> Result<Assistant, ProviderError> {
        self.assistants_api()
            .update_assistant(assistant_id, params)
            .await
    }

    pub async fn list_assistants(&self) -> Result<Vec<Assistant>, ProviderError> {
        self.assistants_api().list_assistants(LIST_PAGE_LIMIT).await
    }

    /// Finds the assistant by id when one is given, else by name in the
    /// first listing page, else creates it.
    pub async fn ensure_assistant(
        &self,
        assistant_id: Option<&str>,
        params: AssistantParams,
    ) -> Result<Assistant, ProviderError> {
        if let Some(id) = assistant_id {
            return self.get_assistant(id).await;
        }

        let wanted = params
            .name
            .clone()
            .unwrap_or_else(|| DEFAULT_ASSISTANT_NAME.to_string());

        let listed = self.list_assistants().await?;
        if let Some(found) = listed
            .into_iter()
            .find(|assistant| assistant.name.as_deref() == Some(wanted.as_str()))
        {
            return Ok(found);
        }

        self.create_assistant(params).await
    }

    /// Deletes an assistant, cascading over its attached files first.
    /// Each file's detach and delete are attempted and reported
    /// independently; the assistant delete runs regardless and its
    /// outcome is reported alongside the cleanup.
    pub async fn delete_assistant(
        &self,
        assistant_id: &str,
    ) -> Result<AssistantDeletion, ProviderError> {
        let cleanup = self.delete_all_assistant_files(assistant_id).await?;
        let deleted = self.assistants_api().delete_assistant(assistant_id).await;

        Ok(AssistantDeletion { cleanup, deleted })
    }

    /// Detaches and deletes every file attached to the assistant,
    /// concurrently, one detach+delete pair per file.
    pub async fn delete_all_assistant_files(
        &self,
        assistant_id: &str,
    ) -> Result<Vec<FileRemoval>, ProviderError> {
        let files = self
            .assistants_api()
            .list_attached_files(assistant_id, LIST_PAGE_LIMIT)
            .await?;

        let removals = join_all(
            files
                .iter()
                .map(|file| self.remove_assistant_file(assistant_id, &file.id)),
        )
        .await;

        Ok(removals)
    }

    /// One detach+delete pair. Both halves are attempted and reported
    /// even when the first fails.
    pub async fn remove_assistant_file(&self, assistant_id: &str, file_id: &str) -> FileRemoval {
        let detach = self.assistants_api().detach_file(assistant_id, file_id).await;
        let delete = self.files_api().delete_file(file_id).await;

        FileRemoval {
            file_id: file_id.to_string(),
            detach,
            delete,
        }
    }

    pub async fn create_thread(&self) -> Result<Thread, ProviderError> {
        self.assistants_api().create_thread().await
    }

    pub async fn get_thread(&self, thread_id: &str) -> Result<Thread, ProviderError> {
        self.assistants_api().get_thread(thread_id).await
    }

    pub async fn delete_thread(&self, thread_id: &str) -> Result<DeletionStatus, ProviderError> {
        self.assistants_api().delete_thread(thread_id).await
    }

    pub async fn ensure_thread(&self, thread_id: Option<&str>) -> Result<Thread, ProviderError> {
        match thread_id {
            Some(id) => self.get_thread(id).await,
            None => self.create_thread().await,
        }
    }

    pub async fn create_message(
        &self,
        thread_id: &str,
        input: MessageInput,
    ) -> Result<ThreadMessage, ProviderError> {
        let message = expect_role_content(input)?;
        self.assistants_api().create_message(thread_id, message).await
    }

    pub async fn list_messages(
        &self,
        thread_id: &str,
    ) -> Result<Vec<ThreadMessage>, ProviderError> {
        self.assistants_api().list_messages(thread_id, None).await
    }

    pub async fn latest_message(
        &self,
        thread_id: &str,
    ) -> Result<Option<ThreadMessage>, ProviderError> {
        let messages = self.assistants_api().list_messages(thread_id, Some(1)).await?;
        Ok(messages.into_iter().next())
    }

    pub async fn create_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
    ) -> Result<Run, ProviderError> {
        self.assistants_api().create_run(thread_id, assistant_id).await
    }

    pub async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run, ProviderError> {
        self.assistants_api().get_run(thread_id, run_id).await
    }

    pub async fn attach_file(
        &self,
        assistant_id: &str,
        file_id: &str,
    ) -> Result<AssistantFile, ProviderError> {
        self.assistants_api().attach_file(assistant_id, file_id).await
    }

    pub async fn detach_file(
        &self,
        assistant_id: &str,
        file_id: &str,
    ) -> Result<DeletionStatus, ProviderError> {
        self.assistants_api().detach_file(assistant_id, file_id).await
    }

    pub async fn list_attached_files(
        &self,
        assistant_id: &str,
    ) -> Result<Vec<AssistantFile>, ProviderError> {
        self.assistants_api()
            .list_attached_files(assistant_id, LIST_PAGE_LIMIT)
            .await
    }

    /// Uploads for retrieval and attaches the file in one step.
    pub async fn upload_for_retrieval(
        &self,
        converter: &dyn UploadConverter,
        assistant_id: &str,
        input: UploadInput,
    ) -> Result<AssistantFile, ProviderError> {
        let file = self.upload_for_assistants(converter, input).await?;
        self.attach_file(assistant_id, &file.id).await
    }

    /// One stateful exchange: resolve the assistant and thread, post the
    /// message, start a run, and poll it to completion under a named
    /// loop. Only a `completed` run resolves; any other status schedules
    /// another poll until the attempt budget runs out.
    pub async fn prompt_assistant(
        &self,
        loops: &LoopRegistry,
        input: MessageInput,
        options: AssistantPromptOptions,
    ) -> Result<AssistantExchange, ProviderError> {
        let assistant = self
            .ensure_assistant(options.assistant_id.as_deref(), options.params.clone())
            .await?;
        let thread = self.ensure_thread(options.thread_id.as_deref()).await?;

        let message = expect_role_content(input)?;
        let message_sent = self
            .assistants_api()
            .create_message(&thread.id, message)
            .await?;

        let started = self
            .assistants_api()
            .create_run(&thread.id, &assistant.id)
            .await?;

        let loop_name = format!("assistant-run-{}", started.id);
        let finished: Arc<Mutex<Option<Run>>> = Arc::new(Mutex::new(None));

        let outcome = loops
            .run_loop(&loop_name, options.poll, |_attempt| {
                let assistants = Arc::clone(self.assistants_api());
                let finished = Arc::clone(&finished);
                let sink = options.sink.clone();
                let thread_id = thread.id.clone();
                let run_id = started.id.clone();
                let loop_name = loop_name.clone();
                let mode = options.mode;

                async move {
                    let current = assistants.get_run(&thread_id, &run_id).await?;

                    let snapshot = match mode {
                        ResponseMode::Raw => DecodedResponse::Raw(
                            serde_json::to_value(&current).unwrap_or(Value::Null),
                        ),
                        ResponseMode::Simple => DecodedResponse::Simple(String::new()),
                        ResponseMode::Normalized => {
                            DecodedResponse::Normalized(text_parts(""))
                        }
                    };
                    deliver_quietly(sink.as_ref(), snapshot).await;

                    if current.status == RunStatus::Completed {
                        *finished.lock().expect("run lock") = Some(current);
                        loops.end(&loop_name);
                    }

                    Ok::<(), ProviderError>(())
                }
            })
            .await;

        match outcome {
            Ok(_) => {}
            Err(LoopError::AlreadyActive { name }) => {
                return Err(ProviderError::config(format!(
                    "run is already being polled under '{name}'"
                )));
            }
            Err(LoopError::Task(error)) => return Err(error),
        }

        let run = finished.lock().expect("run lock").take().ok_or_else(|| {
            ProviderError::backend_retryable(format!(
                "run '{}' did not complete within the polling budget",
                started.id
            ))
        })?;

        let message_received = self
            .latest_message(&thread.id)
            .await?
            .ok_or_else(|| ProviderError::backend("thread has no messages"))?;

        let response = message_parts(&message_received);
        if response.is_empty() {
            return Err(ProviderError::backend("assistant reply contained no content"));
        }

        let thread_deleted = if options.delete_thread {
            Some(self.delete_thread(&thread.id).await?)
        } else {
            None
        };

        Ok(AssistantExchange {
            assistant,
            thread,
            message_sent,
            run,
            message_received,
            thread_deleted,
            response,
        })
    }
}

fn expect_role_content(input: MessageInput) -> Result<ChatMessage, ProviderError> {
    match MessageShape::RoleContent.encode(input, None)? {
        BackendMessage::RoleContent(message) => Ok(message),
        _ => Err(ProviderError::config(
            "assistant prompts expect a role/content message",
        )),
    }
}

fn message_parts(message: &ThreadMessage) -> Vec<Part> {
    message
        .content
        .iter()
        .map(|block| match &block.text {
            Some(text) => Part::text(text.value.clone()),
            None => Part::empty(),
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    /// Configurable in-memory assistant backend.
    pub struct FakeAssistantsApi {
        pub listed: Mutex<Vec<Assistant>>,
        pub created: Mutex<Vec<AssistantParams>>,
        pub attached: Mutex<Vec<String>>,
        pub detached: Mutex<Vec<String>>,
        pub deleted_assistants: Mutex<Vec<String>>,
        pub deleted_threads: Mutex<Vec<String>>,
        pub messages: Mutex<Vec<(String, ChatMessage)>>,
        pub polls: AtomicU32,
        pub complete_after: u32,
        pub latest_text: String,
        pub fail_detach_for: Option<String>,
    }

    impl Default for FakeAssistantsApi {
        fn default() -> Self {
            Self {
                listed: Mutex::new(Vec::new()),
                created: Mutex::new(Vec::new()),
                attached: Mutex::new(Vec::new()),
                detached: Mutex::new(Vec::new()),
                deleted_assistants: Mutex::new(Vec::new()),
                deleted_threads: Mutex::new(Vec::new()),
                messages: Mutex::new(Vec::new()),
                polls: AtomicU32::new(0),
                complete_after: 1,
                latest_text: "assistant thread reply".to_string(),
                fail_detach_for: None,
            }
        }
    }

    fn assistant(id: &str, name: &str) -> Assistant {
        Assistant {
            id: id.to_string(),
            name: Some(name.to_string()),
            model: Some("gpt-3.5-turbo".to_string()),
            instructions: None,
            tools: Vec::new(),
        }
    }

    impl AssistantsApi for FakeAssistantsApi {
        fn create_assistant<'a>(
            &'a self,
            params: AssistantParams,
        ) -> BoxFuture<'a, Result<Assistant, ProviderError>> {
            Box::pin(async move {
                let name = params.name.clone().unwrap_or_default();
                self.created.lock().expect("created lock").push(params);
                Ok(assistant("asst-created", &name))
            })
        }

        fn get_assistant<'a>(
            &'a self,
            assistant_id: &'a str,
        ) -> BoxFuture<'a, Result<Assistant, ProviderError>> {
            Box::pin(async move { Ok(assistant(assistant_id, "Banter")) })
        }

        fn update_assistant<'a>(
            &'a self,
            assistant_id: &'a str,
            params: AssistantParams,
        ) -> BoxFuture<'a, Result<Assistant, ProviderError>> {
            Box::pin(async move {
                let name = params.name.clone().unwrap_or_else(|| "Banter".to_string());
                Ok(assistant(assistant_id, &name))
            })
        }

        fn list_assistants<'a>(
            &'a self,
            _limit: u32,
        ) -> BoxFuture<'a, Result<Vec<Assistant>, ProviderError>> {
            Box::pin(async move { Ok(self.listed.lock().expect("listed lock").clone()) })
        }

        fn delete_assistant<'a>(
            &'a self,
            assistant_id: &'a str,
        ) -> BoxFuture<'a, Result<DeletionStatus, ProviderError>> {
            Box::pin(async move {
                self.deleted_assistants
                    .lock()
                    .expect("deleted lock")
                    .push(assistant_id.to_string());

                Ok(DeletionStatus {
                    id: assistant_id.to_string(),
                    deleted: true,
                })
            })
        }

        fn create_thread<'a>(&'a self) -> BoxFuture<'a, Result<Thread, ProviderError>> {
            Box::pin(async move {
                Ok(Thread {
                    id: "thread-new".to_string(),
                })
            })
        }

        fn get_thread<'a>(
            &'a self,
            thread_id: &'a str,
        ) -> BoxFuture<'a, Result<Thread, ProviderError>> {
            Box::pin(async move {
                Ok(Thread {
                    id: thread_id.to_string(),
                })
            })
        }

        fn delete_thread<'a>(
            &'a self,
            thread_id: &'a str,
        ) -> BoxFuture<'a, Result<DeletionStatus, ProviderError>> {
            Box::pin(async move {
                self.deleted_threads
                    .lock()
                    .expect("threads lock")
                    .push(thread_id.to_string());

                Ok(DeletionStatus {
                    id: thread_id.to_string(),
                    deleted: true,
                })
            })
        }

        fn create_message<'a>(
            &'a self,
            thread_id: &'a str,
            message: ChatMessage,
        ) -> BoxFuture<'a, Result<ThreadMessage, ProviderError>> {
            Box::pin(async move {
                self.messages
                    .lock()
                    .expect("messages lock")
                    .push((thread_id.to_string(), message));

                Ok(ThreadMessage {
                    id: "msg-sent".to_string(),
                    role: Some("user".to_string()),
                    content: Vec::new(),
                })
            })
        }

        fn list_messages<'a>(
            &'a self,
            _thread_id: &'a str,
            _limit: Option<u32>,
        ) -> BoxFuture<'a, Result<Vec<ThreadMessage>, ProviderError>> {
            Box::pin(async move {
                Ok(vec![ThreadMessage {
                    id: "msg-latest".to_string(),
                    role: Some("assistant".to_string()),
                    content: vec![MessageContentBlock {
                        kind: Some("text".to_string()),
                        text: Some(TextBlock {
                            value: self.latest_text.clone(),
                        }),
                    }],
                }])
            })
        }

        fn create_run<'a>(
            &'a self,
            thread_id: &'a str,
            assistant_id: &'a str,
        ) -> BoxFuture<'a, Result<Run, ProviderError>> {
            Box::pin(async move {
                Ok(Run {
                    id: "run-1".to_string(),
                    status: RunStatus::Queued,
                    thread_id: Some(thread_id.to_string()),
                    assistant_id: Some(assistant_id.to_string()),
                })
            })
        }

        fn get_run<'a>(
            &'a self,
            thread_id: &'a str,
            run_id: &'a str,
        ) -> BoxFuture<'a, Result<Run, ProviderError>> {
            Box::pin(async move {
                let polls = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
                let status = if polls >= self.complete_after {
                    RunStatus::Completed
                } else {
                    RunStatus::InProgress
                };

                Ok(Run {
                    id: run_id.to_string(),
                    status,
                    thread_id: Some(thread_id.to_string()),
                    assistant_id: None,
                })
            })
        }

        fn attach_file<'a>(
            &'a self,
            _assistant_id: &'a str,
            file_id: &'a str,
        ) -> BoxFuture<'a, Result<AssistantFile, ProviderError>> {
            Box::pin(async move {
                self.attached
                    .lock()
                    .expect("attached lock")
                    .push(file_id.to_string());

                Ok(AssistantFile {
                    id: file_id.to_string(),
                })
            })
        }

        fn detach_file<'a>(
            &'a self,
            _assistant_id: &'a str,
            file_id: &'a str,
        ) -> BoxFuture<'a, Result<DeletionStatus, ProviderError>> {
            Box::pin(async move {
                if self.fail_detach_for.as_deref() == Some(file_id) {
                    return Err(ProviderError::backend("detach rejected"));
                }

                self.detached
                    .lock()
                    .expect("detached lock")
                    .push(file_id.to_string());

                Ok(DeletionStatus {
                    id: file_id.to_string(),
                    deleted: true,
                })
            })
        }

        fn list_attached_files<'a>(
            &'a self,
            _assistant_id: &'a str,
            _limit: u32,
        ) -> BoxFuture<'a, Result<Vec<AssistantFile>, ProviderError>> {
            Box::pin(async move {
                Ok(self
                    .attached
                    .lock()
                    .expect("attached lock")
                    .iter()
                    .map(|id| AssistantFile { id: id.clone() })
                    .collect())
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::testing::FakeAssistantsApi;
    use super::*;
    use crate::HeuristicTokenCounter;
    use crate::adapters::fine_tuning::testing::FakeFineTuningApi;
    use crate::adapters::openai::testing::FakeOpenAiApi;
    use crate::stream::testing::RecordingSink;

    fn client(assistants: Arc<FakeAssistantsApi>, api: Arc<FakeOpenAiApi>) -> OpenAiClient {
        OpenAiClient::new(
            api,
            assistants,
            Arc::new(FakeFineTuningApi::default()),
            Arc::new(HeuristicTokenCounter),
        )
    }

    fn fast_poll(max_attempts: u32) -> LoopSettings {
        LoopSettings::new(max_attempts, Duration::ZERO, Duration::ZERO).silent()
    }

    #[tokio::test]
    async fn ensure_assistant_prefers_id_then_name_then_creates() {
        let assistants = Arc::new(FakeAssistantsApi::default());
        let client = client(assistants.clone(), Arc::new(FakeOpenAiApi::default()));

        let by_id = client
            .ensure_assistant(Some("asst-known"), AssistantParams::default())
            .await
            .expect("lookup should work");
        assert_eq!(by_id.id, "asst-known");

        // Nothing listed yet, so the assistant is created with defaults.
        let created = client
            .ensure_assistant(None, AssistantParams::default())
            .await
            .expect("create should work");
        assert_eq!(created.id, "asst-created");

        let recorded = assistants.created.lock().expect("created lock");
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].name.as_deref(), Some(DEFAULT_ASSISTANT_NAME));
        assert_eq!(recorded[0].model.as_deref(), Some("gpt-3.5-turbo"));
        assert_eq!(
            recorded[0].instructions.as_deref(),
            Some(DEFAULT_INSTRUCTIONS)
        );
        assert_eq!(recorded[0].tools.as_ref().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn ensure_assistant_finds_existing_by_name() {
        let assistants = Arc::new(FakeAssistantsApi::default());
        assistants.listed.lock().expect("listed lock").push(Assistant {
            id: "asst-existing".to_string(),
            name: Some(DEFAULT_ASSISTANT_NAME.to_string()),
            model: None,
            instructions: None,
            tools: Vec::new(),
        });

        let client = client(assistants.clone(), Arc::new(FakeOpenAiApi::default()));
        let found = client
            .ensure_assistant(None, AssistantParams::default())
            .await
            .expect("lookup should work");

        assert_eq!(found.id, "asst-existing");
        assert!(assistants.created.lock().expect("created lock").is_empty());
    }

    #[tokio::test]
    async fn delete_assistant_cascades_one_detach_delete_pair_per_file() {
        let assistants = Arc::new(FakeAssistantsApi::default());
        {
            let mut attached = assistants.attached.lock().expect("attached lock");
            attached.push("file-a".to_string());
            attached.push("file-b".to_string());
        }

        let api = Arc::new(FakeOpenAiApi::default());
        let client = client(assistants.clone(), api.clone());

        let deletion = client
            .delete_assistant("asst-1")
            .await
            .expect("cascade should run");

        assert_eq!(deletion.cleanup.len(), 2);
        for removal in &deletion.cleanup {
            assert!(removal.detach.is_ok(), "{} detach", removal.file_id);
            assert!(removal.delete.is_ok(), "{} delete", removal.file_id);
        }

        assert_eq!(assistants.detached.lock().expect("lock").len(), 2);
        assert_eq!(api.deleted_files.lock().expect("lock").len(), 2);
        assert_eq!(
            *assistants.deleted_assistants.lock().expect("lock"),
            vec!["asst-1".to_string()]
        );
        assert_eq!(
            deletion.deleted.expect("assistant delete should work").id,
            "asst-1"
        );
    }

    #[tokio::test]
    async fn cascade_reports_per_file_failures_independently() {
        let assistants = Arc::new(FakeAssistantsApi {
            fail_detach_for: Some("file-bad".to_string()),
            ..FakeAssistantsApi::default()
        });
        {
            let mut attached = assistants.attached.lock().expect("attached lock");
            attached.push("file-good".to_string());
            attached.push("file-bad".to_string());
        }

        let api = Arc::new(FakeOpenAiApi::default());
        let client = client(assistants.clone(), api.clone());

        let deletion = client
            .delete_assistant("asst-2")
            .await
            .expect("cascade should run");

        let bad = deletion
            .cleanup
            .iter()
            .find(|removal| removal.file_id == "file-bad")
            .expect("bad file reported");
        assert!(bad.detach.is_err());
        assert!(bad.delete.is_ok(), "delete still attempted");

        let good = deletion
            .cleanup
            .iter()
            .find(|removal| removal.file_id == "file-good")
            .expect("good file reported");
        assert!(good.detach.is_ok());
        assert!(good.delete.is_ok());

        // The top-level delete is reported regardless of cleanup failures.
        assert!(deletion.deleted.is_ok());
    }

    #[tokio::test]
    async fn prompt_assistant_polls_the_run_to_completion() {
        let assistants = Arc::new(FakeAssistantsApi {
            complete_after: 3,
            ..FakeAssistantsApi::default()
        });
        let client = client(assistants.clone(), Arc::new(FakeOpenAiApi::default()));
        let loops = LoopRegistry::new();
        let sink = Arc::new(RecordingSink::default());

        let exchange = client
            .prompt_assistant(
                &loops,
                MessageInput::from("What is a thread?"),
                AssistantPromptOptions::default()
                    .with_thread_id("thread-kept")
                    .with_sink(sink.clone())
                    .with_poll(fast_poll(10)),
            )
            .await
            .expect("exchange should complete");

        assert_eq!(exchange.thread.id, "thread-kept");
        assert_eq!(exchange.run.status, RunStatus::Completed);
        assert_eq!(exchange.response, vec![Part::text("assistant thread reply")]);
        assert!(exchange.thread_deleted.is_none());

        // One empty snapshot per poll.
        assert_eq!(sink.texts(), vec![String::new(); 3]);
        assert!(!loops.is_active("assistant-run-run-1"));

        let sent = assistants.messages.lock().expect("messages lock");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "thread-kept");
        assert_eq!(sent[0].1.content, "What is a thread?");
    }

    #[tokio::test]
    async fn prompt_assistant_fails_when_the_budget_runs_out() {
        let assistants = Arc::new(FakeAssistantsApi {
            complete_after: 100,
            ..FakeAssistantsApi::default()
        });
        let client = client(assistants, Arc::new(FakeOpenAiApi::default()));
        let loops = LoopRegistry::new();

        let error = client
            .prompt_assistant(
                &loops,
                MessageInput::from("hello"),
                AssistantPromptOptions::default().with_poll(fast_poll(2)),
            )
            .await
            .expect_err("exchange should fail");

        assert_eq!(error.kind, crate::ProviderErrorKind::Backend);
        assert!(error.message.contains("polling budget"));
        assert!(!loops.is_active("assistant-run-run-1"));
    }

    #[tokio::test]
    async fn prompt_assistant_can_delete_the_thread_afterwards() {
        let assistants = Arc::new(FakeAssistantsApi::default());
        let client = client(assistants.clone(), Arc::new(FakeOpenAiApi::default()));
        let loops = LoopRegistry::new();

        let exchange = client
            .prompt_assistant(
                &loops,
                MessageInput::from("bye"),
                AssistantPromptOptions::default()
                    .with_poll(fast_poll(3))
                    .delete_thread_after(),
            )
            .await
            .expect("exchange should complete");

        assert!(exchange.thread_deleted.expect("status").deleted);
        assert_eq!(
            *assistants.deleted_threads.lock().expect("lock"),
            vec!["thread-new".to_string()]
        );
    }
}
