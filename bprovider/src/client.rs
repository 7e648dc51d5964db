//! Lazy, cached construction of one backend client per provider.
//!
//! The manager is an explicit context object: it owns the provider map
//! and the shared HTTP client, and is passed by handle into every
//! operation, so there is no process-global state. Clients are built on
//! first use and live for the manager's lifetime.
//!
//! ```rust
//! use bprovider::{ClientConfig, ClientManager, ProviderErrorKind};
//!
//! let manager = ClientManager::new().expect("http client should build");
//! let missing = manager
//!     .get_client(&ClientConfig::new("OPENAI"))
//!     .err()
//!     .expect("no credentials were supplied");
//! assert_eq!(missing.kind, ProviderErrorKind::NotInitialized);
//! ```

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bcommon::GenerationSettings;
use reqwest::Client;

use crate::adapters::gemini::GeminiClient;
use crate::adapters::openai::OpenAiClient;
use crate::adapters::vertex::{VERTEX_DEFAULT_LOCATION, VertexClient};
use crate::ProviderError;

/// A backend provider, keyed by its canonical upper-case identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    OpenAi,
    Gemini,
    Vertex,
}

impl ProviderId {
    /// Normalizes a raw identifier to its canonical upper-case form and
    /// resolves it. Empty input is a config error, as is an identifier
    /// no backend answers to.
    pub fn parse(raw: &str) -> Result<Self, ProviderError> {
        let canonical = raw.trim().to_uppercase();
        if canonical.is_empty() {
            return Err(ProviderError::config("AI provider is required"));
        }

        match canonical.as_str() {
            "OPENAI" => Ok(Self::OpenAi),
            "GEMINI" => Ok(Self::Gemini),
            "VERTEX" => Ok(Self::Vertex),
            _ => Err(ProviderError::config(format!(
                "invalid AI provider: '{raw}'"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI",
            Self::Gemini => "GEMINI",
            Self::Vertex => "VERTEX",
        }
    }
}

impl Display for ProviderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credentials and defaults for constructing one provider's client.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientConfig {
    pub provider: String,
    pub api_key: Option<String>,
    pub credentials: Option<String>,
    pub project: Option<String>,
    pub location: Option<String>,
    pub model: Option<String>,
    pub generation: Option<GenerationSettings>,
}

impl ClientConfig {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            ..Self::default()
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_credentials(mut self, credentials: impl Into<String>) -> Self {
        self.credentials = Some(credentials.into());
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_generation(mut self, generation: GenerationSettings) -> Self {
        self.generation = Some(generation);
        self
    }
}

/// An authenticated backend handle.
#[derive(Clone)]
pub enum BackendClient {
    OpenAi(Arc<OpenAiClient>),
    Gemini(Arc<GeminiClient>),
    Vertex(Arc<VertexClient>),
}

impl std::fmt::Debug for BackendClient {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendClient::OpenAi(_) => f.write_str("BackendClient::OpenAi(..)"),
            BackendClient::Gemini(_) => f.write_str("BackendClient::Gemini(..)"),
            BackendClient::Vertex(_) => f.write_str("BackendClient::Vertex(..)"),
        }
    }
}

impl BackendClient {
    pub fn provider(&self) -> ProviderId {
        match self {
            Self::OpenAi(_) => ProviderId::OpenAi,
            Self::Gemini(_) => ProviderId::Gemini,
            Self::Vertex(_) => ProviderId::Vertex,
        }
    }

    pub fn expect_openai(&self) -> Result<Arc<OpenAiClient>, ProviderError> {
        match self {
            Self::OpenAi(client) => Ok(Arc::clone(client)),
            other => Err(wrong_provider(ProviderId::OpenAi, other.provider())),
        }
    }

    pub fn expect_gemini(&self) -> Result<Arc<GeminiClient>, ProviderError> {
        match self {
            Self::Gemini(client) => Ok(Arc::clone(client)),
            other => Err(wrong_provider(ProviderId::Gemini, other.provider())),
        }
    }

    pub fn expect_vertex(&self) -> Result<Arc<VertexClient>, ProviderError> {
        match self {
            Self::Vertex(client) => Ok(Arc::clone(client)),
            other => Err(wrong_provider(ProviderId::Vertex, other.provider())),
        }
    }
}

fn wrong_provider(wanted: ProviderId, got: ProviderId) -> ProviderError {
    ProviderError::config(format!("expected a {wanted} client, found {got}"))
}

/// Builds and caches at most one client per provider.
pub struct ClientManager {
    http: Client,
    clients: Mutex<HashMap<ProviderId, BackendClient>>,
}

impl ClientManager {
    pub fn new() -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(90))
            .build()
            .map_err(|err| ProviderError::backend(err.to_string()))?;

        Ok(Self::with_http(http))
    }

    pub fn with_http(http: Client) -> Self {
        Self {
            http,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached client for the config's provider, or builds
    /// one when the config carries sufficient credentials. A provider
    /// without credentials and without a cached client is
    /// `NotInitialized`.
    pub fn get_client(&self, config: &ClientConfig) -> Result<BackendClient, ProviderError> {
        let provider = ProviderId::parse(&config.provider)?;

        let mut clients = self.clients.lock().expect("client cache lock");
        if let Some(cached) = clients.get(&provider) {
            return Ok(cached.clone());
        }

        let built = self.build_client(provider, config)?;
        clients.insert(provider, built.clone());
        Ok(built)
    }

    /// Installs a pre-built client, replacing any cached one. Used for
    /// custom transports and fakes.
    pub fn install(&self, client: BackendClient) {
        self.clients
            .lock()
            .expect("client cache lock")
            .insert(client.provider(), client);
    }

    pub fn is_initialized(&self, provider: ProviderId) -> bool {
        self.clients
            .lock()
            .expect("client cache lock")
            .contains_key(&provider)
    }

    pub fn openai(&self, config: &ClientConfig) -> Result<Arc<OpenAiClient>, ProviderError> {
        self.get_client(config)?.expect_openai()
    }

    pub fn gemini(&self, config: &ClientConfig) -> Result<Arc<GeminiClient>, ProviderError> {
        self.get_client(config)?.expect_gemini()
    }

    pub fn vertex(&self, config: &ClientConfig) -> Result<Arc<VertexClient>, ProviderError> {
        self.get_client(config)?.expect_vertex()
    }

    fn build_client(
        &self,
        provider: ProviderId,
        config: &ClientConfig,
    ) -> Result<BackendClient, ProviderError> {
        match provider {
            ProviderId::OpenAi => {
                let api_key = require_credential(config.api_key.as_deref(), provider)?;
                Ok(BackendClient::OpenAi(Arc::new(OpenAiClient::over_http(
                    self.http.clone(),
                    api_key,
                ))))
            }
            ProviderId::Gemini => {
                let api_key = require_credential(config.api_key.as_deref(), provider)?;
                let mut client = GeminiClient::over_http(self.http.clone(), api_key);
                if let Some(model) = &config.model {
                    client = client.with_model(model.clone());
                }

                Ok(BackendClient::Gemini(Arc::new(client)))
            }
            ProviderId::Vertex => {
                let credentials = require_credential(config.credentials.as_deref(), provider)?;
                let project = config.project.as_deref().ok_or_else(|| {
                    ProviderError::config("a project is required for the VERTEX provider")
                })?;
                let location = config
                    .location
                    .as_deref()
                    .unwrap_or(VERTEX_DEFAULT_LOCATION);

                let mut client = VertexClient::over_http(
                    self.http.clone(),
                    credentials,
                    project,
                    location,
                );
                if let Some(model) = &config.model {
                    client = client.with_model(model.clone());
                }
                if let Some(generation) = config.generation {
                    client = client.with_generation(generation);
                }

                Ok(BackendClient::Vertex(Arc::new(client)))
            }
        }
    }
}

fn require_credential(value: Option<&str>, provider: ProviderId) -> Result<String, ProviderError> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value.to_string()),
        _ => Err(ProviderError::not_initialized(format!(
            "no credentials configured for {provider}"
        ))),
    }
}
