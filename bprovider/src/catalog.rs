//! Static catalog of model capability and limit metadata.
//!
//! The catalog is pure data: limits are transcribed from the upstream
//! account tier tables, and every derived field is computed once when the
//! catalog is built, so lookups never observe a half-populated descriptor.
//!
//! ```rust
//! use bprovider::{GPT_35_TURBO, ModelCatalog};
//!
//! let catalog = ModelCatalog::new();
//! let model = catalog.describe(GPT_35_TURBO).expect("model is registered");
//! assert_eq!(model.context_window, 4096);
//! assert!(model.request_capacity_rpm.is_some());
//! ```

use bcommon::Registry;

use crate::{ProviderError, ProviderErrorKind};

pub const GPT_35_TURBO: &str = "gpt-3.5-turbo";
pub const GPT_35_TURBO_1106: &str = "gpt-3.5-turbo-1106";
pub const GPT_4: &str = "gpt-4";
pub const GPT_4_1106: &str = "gpt-4-1106";
pub const GPT_4_VISION: &str = "gpt-4-1106-preview";
pub const GEMINI_PRO: &str = "gemini-pro";
pub const GEMINI_PRO_VISION: &str = "gemini-pro-vision";
pub const TEXT_EMBEDDING_ADA_002: &str = "text-embedding-ada-002";
pub const EMBEDDING_001: &str = "embedding-001";
pub const EMBEDDING_GECKO_ML001: &str = "textembedding-gecko-multilingual@001";

/// What a model is selected for when no explicit model is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelPurpose {
    Chat,
    Assistant,
    Gemini,
    Vertex,
    OpenAiEmbedding,
    GeminiEmbedding,
    VertexEmbedding,
    FineTuning,
}

pub fn default_model(purpose: ModelPurpose) -> &'static str {
    match purpose {
        ModelPurpose::Chat => GPT_35_TURBO,
        ModelPurpose::Assistant => GPT_35_TURBO,
        ModelPurpose::Gemini => GEMINI_PRO,
        ModelPurpose::Vertex => GEMINI_PRO_VISION,
        ModelPurpose::OpenAiEmbedding => TEXT_EMBEDDING_ADA_002,
        ModelPurpose::GeminiEmbedding => EMBEDDING_001,
        ModelPurpose::VertexEmbedding => EMBEDDING_GECKO_ML001,
        ModelPurpose::FineTuning => GPT_35_TURBO_1106,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDescriptor {
    pub name: String,
    pub context_window: u32,
    pub maximum_input_tokens: Option<u32>,
    pub maximum_output_tokens: Option<u32>,
    pub token_limits_tpm: Option<u32>,
    pub token_limits_tpd: Option<u32>,
    pub request_limits_rpm: Option<u32>,
    pub request_limits_rpd: Option<u32>,
    pub request_capacity_rpm: Option<u32>,
    pub training_data: &'static str,
    pub embedding_only: bool,
}

impl ModelDescriptor {
    fn seed(name: &str, context_window: u32, training_data: &'static str) -> Self {
        Self {
            name: name.to_string(),
            context_window,
            maximum_input_tokens: None,
            maximum_output_tokens: None,
            token_limits_tpm: None,
            token_limits_tpd: None,
            request_limits_rpm: None,
            request_limits_rpd: None,
            request_capacity_rpm: None,
            training_data,
            embedding_only: false,
        }
    }

    fn tpm(mut self, tokens_per_minute: u32) -> Self {
        self.token_limits_tpm = Some(tokens_per_minute);
        self
    }

    fn tpd(mut self, tokens_per_day: u32) -> Self {
        self.token_limits_tpd = Some(tokens_per_day);
        self
    }

    fn rpm(mut self, requests_per_minute: u32) -> Self {
        self.request_limits_rpm = Some(requests_per_minute);
        self
    }

    fn rpd(mut self, requests_per_day: u32) -> Self {
        self.request_limits_rpd = Some(requests_per_day);
        self
    }

    fn max_output(mut self, tokens: u32) -> Self {
        self.maximum_output_tokens = Some(tokens);
        self
    }

    fn embedding(mut self) -> Self {
        self.embedding_only = true;
        self
    }

    /// Fills every field the seed table leaves implicit. Defaults:
    /// output tokens are 40% of the context window (rounded up), input
    /// tokens the remainder, per-day limits 1440x the per-minute limit.
    /// The request capacity is the tightest of the token budget expressed
    /// in requests, the literal per-minute cap, and the per-day cap
    /// expressed per minute. Embedding models have no generation path and
    /// skip the input/output/capacity derivation.
    fn derive(mut self) -> Self {
        if !self.embedding_only {
            let output = self
                .maximum_output_tokens
                .unwrap_or_else(|| (f64::from(self.context_window) * 0.4).ceil() as u32);
            self.maximum_output_tokens = Some(output);
            self.maximum_input_tokens = Some(
                self.maximum_input_tokens
                    .unwrap_or(self.context_window - output),
            );
        }

        if let (None, Some(tpm)) = (self.token_limits_tpd, self.token_limits_tpm) {
            self.token_limits_tpd = Some(tpm * 60 * 24);
        }

        if let (None, Some(rpm)) = (self.request_limits_rpd, self.request_limits_rpm) {
            self.request_limits_rpd = Some(rpm * 60 * 24);
        }

        if let (Some(tpm), Some(input), Some(rpm), Some(rpd)) = (
            self.token_limits_tpm,
            self.maximum_input_tokens,
            self.request_limits_rpm,
            self.request_limits_rpd,
        ) {
            let tightest = (f64::from(tpm) / f64::from(input))
                .min(f64::from(rpm))
                .min(f64::from(rpd) / 60.0 / 24.0);
            self.request_capacity_rpm = Some(tightest.ceil() as u32);
        }

        self
    }
}

/// Catalog of registered models. Pure, no I/O.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: Registry<String, ModelDescriptor>,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelCatalog {
    pub fn new() -> Self {
        let mut models = Registry::new();
        for descriptor in seed_table() {
            let descriptor = descriptor.derive();
            models.insert(descriptor.name.clone(), descriptor);
        }

        Self { models }
    }

    pub fn describe(&self, name: &str) -> Result<&ModelDescriptor, ProviderError> {
        self.models.get(name).ok_or_else(|| {
            ProviderError::new(
                ProviderErrorKind::Config,
                format!("unknown model: '{name}'"),
                false,
            )
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

fn seed_table() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor::seed(GPT_35_TURBO, 4096, "Sep 2021")
            .tpm(160_000)
            .rpm(5000),
        ModelDescriptor::seed(GPT_35_TURBO_1106, 16_385, "Sep 2021")
            .max_output(4096)
            .tpm(160_000)
            .rpm(5000),
        ModelDescriptor::seed(GPT_4, 8192, "Sep 2021").tpm(80_000).rpm(5000),
        ModelDescriptor::seed(GPT_4_1106, 128_000, "Apr 2023")
            .max_output(4096)
            .tpm(300_000)
            .tpd(5_000_000)
            .rpm(5000),
        ModelDescriptor::seed(GPT_4_VISION, 128_000, "Apr 2023")
            .max_output(4096)
            .tpm(40_000)
            .rpm(120)
            .rpd(1500),
        ModelDescriptor::seed(TEXT_EMBEDDING_ADA_002, 5_000_000, "Oct 2019")
            .rpm(5000)
            .embedding(),
    ]
}
