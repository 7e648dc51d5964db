//! Fine-tuning jobs and their event streams.
//!
//! Event tailing rides the polling-loop registry: every poll fetches the
//! events strictly after the last one seen, hands each to the caller,
//! and ends the loop on the first event whose message carries the
//! completion marker.

use std::sync::{Arc, Mutex};

use bcommon::BoxFuture;
use bpoll::{LoopError, LoopOutcome, LoopRegistry, LoopSettings};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::adapters::openai::{ListEnvelope, OpenAiClient};
use crate::adapters::{read_json, transport_error};
use crate::{
    ChatRole, ModelPurpose, ProviderError, SecretString, default_model,
};

/// Substring of an event message that marks the end of a job's stream.
pub const COMPLETION_MARKER: &str = "completed";

const EVENT_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FineTuningJob {
    pub id: String,
    pub model: Option<String>,
    pub status: Option<String>,
    pub training_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JobEvent {
    pub id: String,
    pub message: String,
    pub level: Option<String>,
    pub created_at: Option<u64>,
}

/// Query for one page of job events. The cursor (`after`) is exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQuery {
    pub after: Option<String>,
    pub limit: u32,
    pub ascending: bool,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            after: None,
            limit: EVENT_PAGE_LIMIT,
            ascending: false,
        }
    }
}

impl EventQuery {
    pub fn ascending() -> Self {
        Self {
            ascending: true,
            ..Self::default()
        }
    }

    pub fn with_after(mut self, after: impl Into<String>) -> Self {
        self.after = Some(after.into());
        self
    }
}

pub trait FineTuningApi: Send + Sync {
    fn create_job<'a>(
        &'a self,
        training_file: String,
        model: String,
    ) -> BoxFuture<'a, Result<FineTuningJob, ProviderError>>;

    fn get_job<'a>(
        &'a self,
        job_id: &'a str,
    ) -> BoxFuture<'a, Result<FineTuningJob, ProviderError>>;

    fn cancel_job<'a>(
        &'a self,
        job_id: &'a str,
    ) -> BoxFuture<'a, Result<FineTuningJob, ProviderError>>;

    fn list_jobs<'a>(
        &'a self,
        limit: u32,
    ) -> BoxFuture<'a, Result<Vec<FineTuningJob>, ProviderError>>;

    fn list_events<'a>(
        &'a self,
        job_id: &'a str,
        query: EventQuery,
    ) -> BoxFuture<'a, Result<Vec<JobEvent>, ProviderError>>;
}

/// HTTP transport over the fine-tuning endpoints.
#[derive(Debug, Clone)]
pub struct FineTuningHttpApi {
    client: Client,
    base_url: String,
    api_key: Arc<SecretString>,
}

impl FineTuningHttpApi {
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
}

impl FineTuningApi for FineTuningHttpApi {
    fn create_job<'a>(
        &'a self,
        training_file: String,
        model: String,
    ) -> BoxFuture<'a, Result<FineTuningJob, ProviderError>> {
        Box::pin(async move {
            let body = serde_json::json!({
                "training_file": training_file,
                "model": model,
            });

            let response = self
                .client
                .post(self.endpoint("fine_tuning/jobs"))
                .bearer_auth(self.api_key.expose())
                .json(&body)
                .send()
                .await
                .map_err(transport_error)?;
            read_json(response).await
        })
    }

    fn get_job<'a>(
        &'a self,
        job_id: &'a str,
    ) -> BoxFuture<'a, Result<FineTuningJob, ProviderError>> {
        Box::pin(async move {
            let response = self
                .client
                .get(self.endpoint(&format!("fine_tuning/jobs/{job_id}")))
                .bearer_auth(self.api_key.expose())
                .send()
                .await
                .map_err(transport_error)?;
            read_json(response).await
        })
    }

    fn cancel_job<'a>(
        &'a self,
        job_id: &'a str,
    ) -> BoxFuture<'a, Result<FineTuningJob, ProviderError>> {
        Box::pin(async move {
            let response = self
                .client
                .post(self.endpoint(&format!("fine_tuning/jobs/{job_id}/cancel")))
                .bearer_auth(self.api_key.expose())
                .send()
                .await
                .map_err(transport_error)?;
            read_json(response).await
        })
    }

    fn list_jobs<'a>(
        &'a self,
        limit: u32,
    ) -> BoxFuture<'a, Result<Vec<FineTuningJob>, ProviderError>> {
        Box::pin(async move {
            let response = self
                .client
                .get(self.endpoint("fine_tuning/jobs"))
                .bearer_auth(self.api_key.expose())
                .query(&[("limit", limit.to_string())])
                .send()
                .await
                .map_err(transport_error)?;

            let parsed: ListEnvelope<FineTuningJob> = read_json(response).await?;
            Ok(parsed.data)
        })
    }

    fn list_events<'a>(
        &'a self,
        job_id: &'a str,
        query: EventQuery,
    ) -> BoxFuture<'a, Result<Vec<JobEvent>, ProviderError>> {
        Box::pin(async move {
            let mut params = vec![("limit", query.limit.to_string())];
            if query.ascending {
                params.push(("order", "ascending".to_string()));
            }
            if let Some(after) = &query.after {
                params.push(("after", after.clone()));
            }

            let response = self
                .client
                .get(self.endpoint(&format!("fine_tuning/jobs/{job_id}/events")))
                .bearer_auth(self.api_key.expose())
                .query(&params)
                .send()
                .await
                .map_err(transport_error)?;

            let parsed: ListEnvelope<JobEvent> = read_json(response).await?;
            Ok(parsed.data)
        })
    }
}

/// One prompt/response pair for a training file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingCase {
    pub prompt: String,
    pub response: String,
    pub system_prompt: Option<String>,
}

impl TrainingCase {
    pub fn new(prompt: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            response: response.into(),
            system_prompt: None,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }
}

/// Renders one case into the chat-shaped training record.
pub fn build_training_case(case: &TrainingCase) -> Value {
    let mut messages = Vec::new();
    if let Some(system_prompt) = &case.system_prompt {
        messages.push(training_message(ChatRole::System, system_prompt));
    }

    messages.push(training_message(ChatRole::User, &case.prompt));
    messages.push(training_message(ChatRole::Assistant, &case.response));

    serde_json::json!({ "messages": messages })
}

/// Renders cases into a JSONL training file, one record per line.
pub fn build_training_file(cases: &[TrainingCase]) -> String {
    cases
        .iter()
        .map(|case| build_training_case(case).to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

fn training_message(role: ChatRole, content: &str) -> Value {
    serde_json::json!({ "role": role.as_str(), "content": content })
}

impl OpenAiClient {
    pub async fn create_fine_tuning_job(
        &self,
        training_file: &str,
        model: Option<&str>,
    ) -> Result<FineTuningJob, ProviderError> {
        let model = model
            .unwrap_or(default_model(ModelPurpose::FineTuning))
            .to_string();
        self.tuning_api()
            .create_job(training_file.to_string(), model)
            .await
    }

    pub async fn get_fine_tuning_job(&self, job_id: &str) -> Result<FineTuningJob, ProviderError> {
        require_job_id(job_id)?;
        self.tuning_api().get_job(job_id).await
    }

    pub async fn cancel_fine_tuning_job(
        &self,
        job_id: &str,
    ) -> Result<FineTuningJob, ProviderError> {
        require_job_id(job_id)?;
        self.tuning_api().cancel_job(job_id).await
    }

    pub async fn list_fine_tuning_jobs(&self) -> Result<Vec<FineTuningJob>, ProviderError> {
        self.tuning_api().list_jobs(EVENT_PAGE_LIMIT).await
    }

    pub async fn list_fine_tuning_events(
        &self,
        job_id: &str,
        query: EventQuery,
    ) -> Result<Vec<JobEvent>, ProviderError> {
        require_job_id(job_id)?;
        self.tuning_api().list_events(job_id, query).await
    }

    /// Tails a job's event stream until completion. Each poll fetches
    /// the events strictly after the last delivered one, in ascending
    /// order, so no event is ever re-delivered. Callback failures
    /// reject the tail.
    pub async fn tail_fine_tuning_events<F>(
        &self,
        loops: &LoopRegistry,
        job_id: &str,
        poll: LoopSettings,
        on_event: F,
    ) -> Result<LoopOutcome, ProviderError>
    where
        F: FnMut(&JobEvent) -> Result<(), ProviderError> + Send,
    {
        require_job_id(job_id)?;

        let loop_name = format!("fine-tuning-{job_id}");
        let cursor: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let on_event = Arc::new(Mutex::new(on_event));

        let outcome = loops
            .run_loop(&loop_name, poll, |_attempt| {
                let tuning = Arc::clone(self.tuning_api());
                let cursor = Arc::clone(&cursor);
                let on_event = Arc::clone(&on_event);
                let job_id = job_id.to_string();
                let loop_name = loop_name.clone();

                async move {
                    let mut query = EventQuery::ascending();
                    query.after = cursor.lock().expect("cursor lock").clone();

                    let events = tuning.list_events(&job_id, query).await?;
                    for event in events {
                        if event.message.contains(COMPLETION_MARKER) {
                            loops.end(&loop_name);
                        }

                        {
                            let mut callback = on_event.lock().expect("callback lock");
                            (&mut *callback)(&event)?;
                        }
                        *cursor.lock().expect("cursor lock") = Some(event.id.clone());
                    }

                    Ok::<(), ProviderError>(())
                }
            })
            .await;

        match outcome {
            Ok(outcome) => Ok(outcome),
            Err(LoopError::AlreadyActive { name }) => Err(ProviderError::config(format!(
                "job is already being tailed under '{name}'"
            ))),
            Err(LoopError::Task(error)) => Err(error),
        }
    }
}

fn require_job_id(job_id: &str) -> Result<(), ProviderError> {
    if job_id.trim().is_empty() {
        return Err(ProviderError::config("job id is required"));
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Serves pre-baked event pages keyed by cursor.
    #[derive(Default)]
    pub struct FakeFineTuningApi {
        pub events: Vec<JobEvent>,
        pub queries: Mutex<Vec<EventQuery>>,
        pub jobs: Mutex<Vec<FineTuningJob>>,
    }

    pub fn event(id: &str, message: &str) -> JobEvent {
        JobEvent {
            id: id.to_string(),
            message: message.to_string(),
            level: Some("info".to_string()),
            created_at: None,
        }
    }

    fn job(id: &str) -> FineTuningJob {
        FineTuningJob {
            id: id.to_string(),
            model: Some("gpt-3.5-turbo-1106".to_string()),
            status: Some("queued".to_string()),
            training_file: Some("file-1".to_string()),
        }
    }

    impl FineTuningApi for FakeFineTuningApi {
        fn create_job<'a>(
            &'a self,
            training_file: String,
            model: String,
        ) -> BoxFuture<'a, Result<FineTuningJob, ProviderError>> {
            Box::pin(async move {
                let created = FineTuningJob {
                    id: "ftjob-1".to_string(),
                    model: Some(model),
                    status: Some("queued".to_string()),
                    training_file: Some(training_file),
                };

                self.jobs.lock().expect("jobs lock").push(created.clone());
                Ok(created)
            })
        }

        fn get_job<'a>(
            &'a self,
            job_id: &'a str,
        ) -> BoxFuture<'a, Result<FineTuningJob, ProviderError>> {
            Box::pin(async move { Ok(job(job_id)) })
        }

        fn cancel_job<'a>(
            &'a self,
            job_id: &'a str,
        ) -> BoxFuture<'a, Result<FineTuningJob, ProviderError>> {
            Box::pin(async move {
                let mut cancelled = job(job_id);
                cancelled.status = Some("cancelled".to_string());
                Ok(cancelled)
            })
        }

        fn list_jobs<'a>(
            &'a self,
            _limit: u32,
        ) -> BoxFuture<'a, Result<Vec<FineTuningJob>, ProviderError>> {
            Box::pin(async move { Ok(self.jobs.lock().expect("jobs lock").clone()) })
        }

        fn list_events<'a>(
            &'a self,
            _job_id: &'a str,
            query: EventQuery,
        ) -> BoxFuture<'a, Result<Vec<JobEvent>, ProviderError>> {
            Box::pin(async move {
                self.queries.lock().expect("queries lock").push(query.clone());

                let start = match &query.after {
                    None => 0,
                    Some(after) => self
                        .events
                        .iter()
                        .position(|event| &event.id == after)
                        .map(|index| index + 1)
                        .unwrap_or(self.events.len()),
                };

                Ok(self.events[start..].to_vec())
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use super::testing::{FakeFineTuningApi, event};
    use super::*;
    use crate::HeuristicTokenCounter;
    use crate::adapters::assistants::testing::FakeAssistantsApi;
    use crate::adapters::openai::testing::FakeOpenAiApi;

    fn client(tuning: Arc<FakeFineTuningApi>) -> OpenAiClient {
        OpenAiClient::new(
            Arc::new(FakeOpenAiApi::default()),
            Arc::new(FakeAssistantsApi::default()),
            tuning,
            Arc::new(HeuristicTokenCounter),
        )
    }

    fn fast_poll(max_attempts: u32) -> LoopSettings {
        LoopSettings::new(max_attempts, Duration::ZERO, Duration::ZERO).silent()
    }

    #[tokio::test]
    async fn create_job_defaults_the_training_model() {
        let tuning = Arc::new(FakeFineTuningApi::default());
        let client = client(tuning.clone());

        let job = client
            .create_fine_tuning_job("file-1", None)
            .await
            .expect("job should submit");

        assert_eq!(job.model.as_deref(), Some("gpt-3.5-turbo-1106"));
        assert_eq!(job.training_file.as_deref(), Some("file-1"));
    }

    #[tokio::test]
    async fn empty_job_id_is_a_config_error() {
        let tuning = Arc::new(FakeFineTuningApi::default());
        let client = client(tuning);

        let error = client
            .get_fine_tuning_job("  ")
            .await
            .expect_err("lookup should fail");
        assert_eq!(error.kind, crate::ProviderErrorKind::Config);

        let loops = LoopRegistry::new();
        let error = client
            .tail_fine_tuning_events(&loops, "", fast_poll(1), |_| Ok(()))
            .await
            .expect_err("tail should fail");
        assert_eq!(error.kind, crate::ProviderErrorKind::Config);
    }

    #[tokio::test]
    async fn tail_delivers_each_event_once_and_stops_on_completion() {
        let tuning = Arc::new(FakeFineTuningApi {
            events: vec![
                event("ev-1", "job queued"),
                event("ev-2", "training started"),
                event("ev-3", "job successfully completed"),
            ],
            ..FakeFineTuningApi::default()
        });
        let client = client(tuning.clone());
        let loops = LoopRegistry::new();
        let seen = Arc::new(StdMutex::new(Vec::new()));

        let outcome = client
            .tail_fine_tuning_events(&loops, "ftjob-9", fast_poll(5), {
                let seen = Arc::clone(&seen);
                move |event| {
                    seen.lock().expect("seen lock").push(event.id.clone());
                    Ok(())
                }
            })
            .await
            .expect("tail should complete");

        assert_eq!(outcome, LoopOutcome::Ended);
        assert_eq!(
            *seen.lock().expect("seen lock"),
            vec!["ev-1".to_string(), "ev-2".to_string(), "ev-3".to_string()]
        );

        // One ascending query with no cursor; nothing was re-requested.
        let queries = tuning.queries.lock().expect("queries lock");
        assert_eq!(queries.len(), 1);
        assert!(queries[0].ascending);
        assert_eq!(queries[0].after, None);
        assert!(!loops.is_active("fine-tuning-ftjob-9"));
    }

    #[tokio::test]
    async fn tail_advances_the_cursor_between_polls() {
        let tuning = Arc::new(FakeFineTuningApi {
            events: vec![event("ev-1", "job queued"), event("ev-2", "still running")],
            ..FakeFineTuningApi::default()
        });
        let client = client(tuning.clone());
        let loops = LoopRegistry::new();

        // No completion marker: the tail exhausts its attempt budget.
        let outcome = client
            .tail_fine_tuning_events(&loops, "ftjob-10", fast_poll(3), |_| Ok(()))
            .await
            .expect("tail should complete");

        assert_eq!(outcome, LoopOutcome::AttemptsExhausted);

        let queries = tuning.queries.lock().expect("queries lock");
        assert_eq!(queries.len(), 3);
        assert_eq!(queries[0].after, None);
        assert_eq!(queries[1].after, Some("ev-2".to_string()));
        assert_eq!(queries[2].after, Some("ev-2".to_string()));
    }

    #[tokio::test]
    async fn callback_failures_reject_the_tail() {
        let tuning = Arc::new(FakeFineTuningApi {
            events: vec![event("ev-1", "job queued")],
            ..FakeFineTuningApi::default()
        });
        let client = client(tuning);
        let loops = LoopRegistry::new();

        let error = client
            .tail_fine_tuning_events(&loops, "ftjob-11", fast_poll(3), |_| {
                Err(ProviderError::backend("consumer exploded"))
            })
            .await
            .expect_err("tail should fail");

        assert_eq!(error.message, "consumer exploded");
        assert!(!loops.is_active("fine-tuning-ftjob-11"));
    }

    #[test]
    fn training_cases_render_as_chat_shaped_jsonl() {
        let cases = vec![
            TrainingCase::new("What is Rust?", "A systems language.")
                .with_system_prompt("You are terse."),
            TrainingCase::new("And Go?", "Also a language."),
        ];

        let file = build_training_file(&cases);
        let lines: Vec<&str> = file.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Value = serde_json::from_str(lines[0]).expect("line should parse");
        let messages = first["messages"].as_array().expect("messages array");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[2]["role"], "assistant");
        assert_eq!(messages[2]["content"], "A systems language.");

        let second: Value = serde_json::from_str(lines[1]).expect("line should parse");
        assert_eq!(second["messages"].as_array().expect("array").len(), 2);
    }
}
