//! Vertex generative client: server-streamed generation plus the
//! prediction service used for embeddings.

use std::sync::Arc;

use bcommon::{BoxFuture, GenerationSettings};
use reqwest::Client;
use serde_json::Value;

use crate::adapters::gemini::{
    GenerativeChunk, GenerativePromptOptions, GenerativeRequest, aggregate_chunks,
    build_generate_body, parse_generate_chunks,
};
use crate::adapters::{read_json, read_sse_payloads, transport_error};
use crate::{
    BackendMessage, DecodedResponse, HeuristicTokenCounter, MessageInput, MessageShape,
    ModelPurpose, PartsMessage, ProviderError, SecretString, TokenCounter, default_model,
};

pub const VERTEX_DEFAULT_LOCATION: &str = "us-east4";

/// The prediction service lives on a fixed regional host, independent of
/// the location used for generation.
pub const VERTEX_PREDICTION_HOST: &str = "us-central1-aiplatform.googleapis.com";

const DEFAULT_PUBLISHER: &str = "google";

pub trait VertexApi: Send + Sync {
    fn generate_stream<'a>(
        &'a self,
        request: GenerativeRequest,
    ) -> BoxFuture<'a, Result<Vec<GenerativeChunk>, ProviderError>>;

    fn predict<'a>(
        &'a self,
        model: &'a str,
        publisher: &'a str,
        instance: Value,
        parameters: Value,
    ) -> BoxFuture<'a, Result<Value, ProviderError>>;
}

/// HTTP transport over the aiplatform endpoints.
#[derive(Debug, Clone)]
pub struct VertexHttpApi {
    client: Client,
    credentials: Arc<SecretString>,
    project: String,
    location: String,
}

impl VertexHttpApi {
    pub fn new(
        client: Client,
        credentials: Arc<SecretString>,
        project: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            client,
            credentials,
            project: project.into(),
            location: location.into(),
        }
    }

    fn model_path(&self, publisher: &str, model: &str) -> String {
        format!(
            "projects/{}/locations/{}/publishers/{publisher}/models/{model}",
            self.project, self.location
        )
    }
}

impl VertexApi for VertexHttpApi {
    fn generate_stream<'a>(
        &'a self,
        request: GenerativeRequest,
    ) -> BoxFuture<'a, Result<Vec<GenerativeChunk>, ProviderError>> {
        Box::pin(async move {
            let url = format!(
                "https://{}-aiplatform.googleapis.com/v1/{}:streamGenerateContent",
                self.location,
                self.model_path(DEFAULT_PUBLISHER, &request.model),
            );

            let body = build_generate_body(&request);
            let response = self
                .client
                .post(url)
                .query(&[("alt", "sse")])
                .bearer_auth(self.credentials.expose())
                .json(&body)
                .send()
                .await
                .map_err(transport_error)?;

            let payloads = read_sse_payloads(response).await?;
            parse_generate_chunks(payloads)
        })
    }

    fn predict<'a>(
        &'a self,
        model: &'a str,
        publisher: &'a str,
        instance: Value,
        parameters: Value,
    ) -> BoxFuture<'a, Result<Value, ProviderError>> {
        Box::pin(async move {
            let url = format!(
                "https://{VERTEX_PREDICTION_HOST}/v1/{}:predict",
                self.model_path(publisher, model),
            );

            let body = serde_json::json!({
                "instances": [instance],
                "parameters": parameters,
            });

            let response = self
                .client
                .post(url)
                .bearer_auth(self.credentials.expose())
                .json(&body)
                .send()
                .await
                .map_err(transport_error)?;

            read_json(response).await
        })
    }
}

/// The Vertex backend handle.
#[derive(Clone)]
pub struct VertexClient {
    api: Arc<dyn VertexApi>,
    tokens: Arc<dyn TokenCounter>,
    model: String,
    generation: GenerationSettings,
}

impl VertexClient {
    pub fn new(api: Arc<dyn VertexApi>, tokens: Arc<dyn TokenCounter>) -> Self {
        Self {
            api,
            tokens,
            model: default_model(ModelPurpose::Vertex).to_string(),
            generation: GenerationSettings::default()
                .with_max_output_tokens(2048)
                .with_temperature(0.4)
                .with_top_p(1.0)
                .with_top_k(32),
        }
    }

    pub fn over_http(
        http: Client,
        credentials: impl Into<String>,
        project: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        let credentials = Arc::new(SecretString::new(credentials));
        Self::new(
            Arc::new(VertexHttpApi::new(http, credentials, project, location)),
            Arc::new(HeuristicTokenCounter),
        )
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_generation(mut self, generation: GenerationSettings) -> Self {
        self.generation = generation;
        self
    }

    pub fn count_tokens(&self, text: &str) -> u32 {
        self.tokens.count_tokens(text)
    }

    /// Sends one role/parts turn with the history ahead of it. Chunks
    /// stream to the sink as they arrive; the return value is the
    /// aggregated response.
    pub async fn prompt(
        &self,
        input: MessageInput,
        options: GenerativePromptOptions,
    ) -> Result<DecodedResponse, ProviderError> {
        let message = match MessageShape::RoleParts.encode(input, None)? {
            BackendMessage::RoleParts(message) => message,
            _ => {
                return Err(ProviderError::config(
                    "generative prompts expect a role/parts message",
                ));
            }
        };

        let mut contents: Vec<PartsMessage> = options.history;
        contents.push(message);

        let request = GenerativeRequest {
            model: options.model.unwrap_or_else(|| self.model.clone()),
            contents,
            generation: options.generation.unwrap_or(self.generation),
        };

        let chunks = self.api.generate_stream(request).await?;
        aggregate_chunks(chunks, options.mode, options.sink.as_ref()).await
    }

    /// One prediction-service round-trip; returns the first prediction.
    pub async fn predict(
        &self,
        model: &str,
        instance: Value,
        parameters: Value,
        publisher: Option<&str>,
    ) -> Result<Value, ProviderError> {
        let body = self
            .api
            .predict(
                model,
                publisher.unwrap_or(DEFAULT_PUBLISHER),
                instance,
                parameters,
            )
            .await?;

        body.get("predictions")
            .and_then(|predictions| predictions.get(0))
            .cloned()
            .ok_or_else(|| ProviderError::backend("prediction response was empty"))
    }

    pub async fn create_embedding(&self, input: &str) -> Result<Vec<f32>, ProviderError> {
        if input.trim().is_empty() {
            return Err(ProviderError::config("text is required"));
        }

        let prediction = self
            .predict(
                default_model(ModelPurpose::VertexEmbedding),
                serde_json::json!({ "content": input }),
                serde_json::json!({
                    "temperature": 0,
                    "maxOutputTokens": 256,
                    "topP": 0,
                    "topK": 1,
                }),
                None,
            )
            .await?;

        let values = prediction
            .get("embeddings")
            .and_then(|embeddings| embeddings.get("values"))
            .cloned()
            .ok_or_else(|| ProviderError::backend("prediction carried no embedding values"))?;

        serde_json::from_value(values).map_err(|err| ProviderError::backend(err.to_string()))
    }
}
