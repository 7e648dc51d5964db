//! Gemini generative client: server-streamed generation and embeddings.

use std::sync::Arc;

use bcommon::{BoxFuture, GenerationSettings};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapters::{read_json, read_sse_payloads, transport_error};
use crate::{
    BackendMessage, DecodedResponse, HeuristicTokenCounter, MessageInput, MessageShape,
    ModelPurpose, Part, PartsMessage, ProviderError, ResponseMode, SecretString, StreamSink,
    TokenCounter, default_model, deliver_quietly, text_parts,
};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// A generation request in the role/parts shape, shared by both
/// streaming-generative backends.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerativeRequest {
    pub model: String,
    pub contents: Vec<PartsMessage>,
    pub generation: GenerationSettings,
}

/// One server-streamed piece of a generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerativeChunk {
    pub parts: Vec<Part>,
    pub raw: Value,
}

pub trait GeminiApi: Send + Sync {
    fn generate_stream<'a>(
        &'a self,
        request: GenerativeRequest,
    ) -> BoxFuture<'a, Result<Vec<GenerativeChunk>, ProviderError>>;

    fn embed_content<'a>(
        &'a self,
        model: String,
        text: String,
    ) -> BoxFuture<'a, Result<Vec<f32>, ProviderError>>;
}

/// HTTP transport over the generative-language endpoints.
#[derive(Debug, Clone)]
pub struct GeminiHttpApi {
    client: Client,
    base_url: String,
    api_key: Arc<SecretString>,
}

impl GeminiHttpApi {
    pub fn new(client: Client, api_key: Arc<SecretString>) -> Self {
        Self {
            client,
            base_url: GEMINI_BASE_URL.to_string(),
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

impl GeminiApi for GeminiHttpApi {
    fn generate_stream<'a>(
        &'a self,
        request: GenerativeRequest,
    ) -> BoxFuture<'a, Result<Vec<GenerativeChunk>, ProviderError>> {
        Box::pin(async move {
            let body = build_generate_body(&request);
            let response = self
                .client
                .post(self.endpoint(&format!(
                    "models/{}:streamGenerateContent",
                    request.model
                )))
                .query(&[("alt", "sse")])
                .header("x-goog-api-key", self.api_key.expose())
                .json(&body)
                .send()
                .await
                .map_err(transport_error)?;

            let payloads = read_sse_payloads(response).await?;
            parse_generate_chunks(payloads)
        })
    }

    fn embed_content<'a>(
        &'a self,
        model: String,
        text: String,
    ) -> BoxFuture<'a, Result<Vec<f32>, ProviderError>> {
        Box::pin(async move {
            let body = serde_json::json!({
                "content": { "parts": [{ "text": text }] },
            });

            let response = self
                .client
                .post(self.endpoint(&format!("models/{model}:embedContent")))
                .header("x-goog-api-key", self.api_key.expose())
                .json(&body)
                .send()
                .await
                .map_err(transport_error)?;

            let parsed: EmbedApiResponse = read_json(response).await?;
            Ok(parsed.embedding.values)
        })
    }
}

/// Options shared by both streaming-generative prompts.
#[derive(Clone, Default)]
pub struct GenerativePromptOptions {
    pub model: Option<String>,
    pub history: Vec<PartsMessage>,
    pub generation: Option<GenerationSettings>,
    pub mode: ResponseMode,
    pub sink: Option<Arc<dyn StreamSink>>,
}

impl GenerativePromptOptions {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_history(mut self, history: Vec<PartsMessage>) -> Self {
        self.history = history;
        self
    }

    pub fn with_generation(mut self, generation: GenerationSettings) -> Self {
        self.generation = Some(generation);
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

/// The Gemini backend handle.
#[derive(Clone)]
pub struct GeminiClient {
    api: Arc<dyn GeminiApi>,
    tokens: Arc<dyn TokenCounter>,
    model: String,
    embedding_model: String,
}

impl GeminiClient {
    pub fn new(api: Arc<dyn GeminiApi>, tokens: Arc<dyn TokenCounter>) -> Self {
        Self {
            api,
            tokens,
            model: default_model(ModelPurpose::Gemini).to_string(),
            embedding_model: default_model(ModelPurpose::GeminiEmbedding).to_string(),
        }
    }

    pub fn over_http(http: Client, api_key: impl Into<String>) -> Self {
        let api_key = Arc::new(SecretString::new(api_key));
        Self::new(
            Arc::new(GeminiHttpApi::new(http, api_key)),
            Arc::new(HeuristicTokenCounter),
        )
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    pub fn count_tokens(&self, text: &str) -> u32 {
        self.tokens.count_tokens(text)
    }

    /// Sends one turn (a bare parts array, per this family) with the
    /// role/parts history ahead of it. Chunks stream to the sink as they
    /// arrive; the return value is the aggregated response.
    pub async fn prompt(
        &self,
        input: MessageInput,
        options: GenerativePromptOptions,
    ) -> Result<DecodedResponse, ProviderError> {
        let parts = match MessageShape::PartsOnly.encode(input, None)? {
            BackendMessage::PartsOnly(parts) => parts,
            _ => {
                return Err(ProviderError::config(
                    "generative prompts expect a bare parts array",
                ));
            }
        };

        let mut contents = options.history;
        contents.push(PartsMessage {
            role: crate::ChatRole::User,
            parts,
        });

        let request = GenerativeRequest {
            model: options.model.unwrap_or_else(|| self.model.clone()),
            contents,
            generation: options.generation.unwrap_or_default(),
        };

        let chunks = self.api.generate_stream(request).await?;
        aggregate_chunks(chunks, options.mode, options.sink.as_ref()).await
    }

    pub async fn create_embedding(&self, input: &str) -> Result<Vec<f32>, ProviderError> {
        if input.trim().is_empty() {
            return Err(ProviderError::config("text is required"));
        }

        self.api
            .embed_content(self.embedding_model.clone(), input.to_string())
            .await
    }
}

/// Streams each chunk's own parts to the sink (this family delivers
/// deltas, not running totals) and folds the chunks into one final
/// response.
pub(crate) async fn aggregate_chunks(
    chunks: Vec<GenerativeChunk>,
    mode: ResponseMode,
    sink: Option<&Arc<dyn StreamSink>>,
) -> Result<DecodedResponse, ProviderError> {
    let mut joined = String::new();
    let mut opaque_parts = Vec::new();
    let mut last_raw = Value::Null;

    for chunk in chunks {
        let snapshot = match mode {
            ResponseMode::Raw => DecodedResponse::Raw(chunk.raw.clone()),
            ResponseMode::Simple => DecodedResponse::Simple(chunk_text(&chunk.parts)),
            ResponseMode::Normalized => DecodedResponse::Normalized(chunk.parts.clone()),
        };
        deliver_quietly(sink, snapshot).await;

        for part in &chunk.parts {
            match &part.text {
                Some(text) => joined.push_str(text),
                None => opaque_parts.push(Part::empty()),
            }
        }

        last_raw = chunk.raw;
    }

    let parts = if joined.is_empty() {
        opaque_parts
    } else {
        text_parts(joined.clone())
    };

    if parts.is_empty() {
        return Err(ProviderError::backend("model returned no content"));
    }

    Ok(match mode {
        ResponseMode::Raw => DecodedResponse::Raw(last_raw),
        ResponseMode::Simple => DecodedResponse::Simple(joined),
        ResponseMode::Normalized => DecodedResponse::Normalized(parts),
    })
}

fn chunk_text(parts: &[Part]) -> String {
    parts
        .iter()
        .filter_map(|part| part.text.clone())
        .collect::<Vec<_>>()
        .join("")
}

pub(crate) fn build_generate_body(request: &GenerativeRequest) -> GenerativeApiRequest {
    GenerativeApiRequest {
        contents: request
            .contents
            .iter()
            .map(|message| GenerativeApiContent {
                role: message.role.as_str().to_string(),
                parts: message.parts.clone(),
            })
            .collect(),
        generation_config: generation_config(&request.generation),
    }
}

pub(crate) fn parse_generate_chunks(
    payloads: Vec<String>,
) -> Result<Vec<GenerativeChunk>, ProviderError> {
    let mut chunks = Vec::new();

    for payload in payloads {
        let raw: Value = serde_json::from_str(&payload)
            .map_err(|err| ProviderError::backend(err.to_string()))?;
        let parsed: GenerativeApiStreamResponse = serde_json::from_value(raw.clone())
            .map_err(|err| ProviderError::backend(err.to_string()))?;

        let parts = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| content.parts)
            .unwrap_or_default();

        chunks.push(GenerativeChunk { parts, raw });
    }

    Ok(chunks)
}

fn generation_config(settings: &GenerationSettings) -> Option<GenerationConfig> {
    if settings.temperature.is_none()
        && settings.max_output_tokens.is_none()
        && settings.top_p.is_none()
        && settings.top_k.is_none()
    {
        return None;
    }

    Some(GenerationConfig {
        temperature: settings.temperature,
        max_output_tokens: settings.max_output_tokens,
        top_p: settings.top_p,
        top_k: settings.top_k,
    })
}

#[derive(Debug, Serialize)]
pub(crate) struct GenerativeApiRequest {
    contents: Vec<GenerativeApiContent>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct GenerativeApiContent {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(rename = "topP", skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(rename = "topK", skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GenerativeApiStreamResponse {
    #[serde(default)]
    candidates: Vec<GenerativeApiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GenerativeApiCandidate {
    content: Option<GenerativeApiContentBody>,
}

#[derive(Debug, Deserialize)]
struct GenerativeApiContentBody {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct EmbedApiResponse {
    embedding: EmbedApiValues,
}

#[derive(Debug, Deserialize)]
struct EmbedApiValues {
    values: Vec<f32>,
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::testing::FakeGenerativeApi;
    use super::*;
    use crate::ChatRole;
    use crate::stream::testing::RecordingSink;

    fn client(api: Arc<FakeGenerativeApi>) -> GeminiClient {
        GeminiClient::new(api, Arc::new(HeuristicTokenCounter))
    }

    #[tokio::test]
    async fn prompt_appends_the_turn_after_the_history() {
        let api = Arc::new(FakeGenerativeApi::with_text_chunks(&["Hi there"]));
        let gemini = client(api.clone());

        let history = vec![
            PartsMessage::new(ChatRole::User, "Hello"),
            PartsMessage::new(ChatRole::Model, "Hi"),
        ];

        let response = gemini
            .prompt(
                MessageInput::from("Hi again"),
                GenerativePromptOptions::default().with_history(history),
            )
            .await
            .expect("prompt should work");

        assert_eq!(
            response,
            DecodedResponse::Normalized(vec![Part::text("Hi there")])
        );

        let requests = api.requests.lock().expect("requests lock");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model, "gemini-pro");
        assert_eq!(requests[0].contents.len(), 3);
        assert_eq!(requests[0].contents[1].role, ChatRole::Model);
        assert_eq!(requests[0].contents[2].parts, vec![Part::text("Hi again")]);
    }

    #[tokio::test]
    async fn prompt_streams_chunk_parts_and_aggregates_text() {
        let api = Arc::new(FakeGenerativeApi::with_text_chunks(&["Hel", "lo"]));
        let gemini = client(api);
        let sink = Arc::new(RecordingSink::default());

        let response = gemini
            .prompt(
                MessageInput::from("stream please"),
                GenerativePromptOptions::default().with_sink(sink.clone()),
            )
            .await
            .expect("prompt should work");

        // This family streams each chunk's own parts, not running totals.
        assert_eq!(sink.texts(), vec!["Hel".to_string(), "lo".to_string()]);
        assert_eq!(
            response,
            DecodedResponse::Normalized(vec![Part::text("Hello")])
        );
    }

    #[tokio::test]
    async fn prompt_fails_when_the_model_returns_nothing() {
        let api = Arc::new(FakeGenerativeApi::default());
        let gemini = client(api);

        let error = gemini
            .prompt(MessageInput::from("hi"), GenerativePromptOptions::default())
            .await
            .expect_err("prompt should fail");
        assert_eq!(error.kind, crate::ProviderErrorKind::Backend);
    }

    #[tokio::test]
    async fn embeddings_require_text() {
        let api = Arc::new(FakeGenerativeApi::default());
        let gemini = client(api);

        let error = gemini
            .create_embedding(" ")
            .await
            .expect_err("embedding should fail");
        assert_eq!(error.kind, crate::ProviderErrorKind::Config);

        let values = gemini
            .create_embedding("embed me")
            .await
            .expect("embedding should work");
        assert_eq!(values, vec![0.5, 0.25]);
    }

    #[test]
    fn sse_chunks_parse_into_candidate_parts() {
        let payloads = vec![
            "{\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"a\"}],\"role\":\"model\"}}]}"
                .to_string(),
            "{\"candidates\":[]}".to_string(),
        ];

        let chunks = parse_generate_chunks(payloads).expect("chunks should parse");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].parts, vec![Part::text("a")]);
        assert!(chunks[1].parts.is_empty());
    }
}
