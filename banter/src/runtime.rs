//! Runtime wiring helpers for common chat setups.

use std::sync::Arc;

use crate::{ChatError, ChatService, ClientConfig, ClientManager, EngineConfig};

/// A shared client manager over a fresh HTTP client.
pub fn client_manager() -> Result<Arc<ClientManager>, ChatError> {
    Ok(Arc::new(ClientManager::new()?))
}

/// A shared client manager over a caller-configured HTTP client, for
/// custom timeouts, proxies, or TLS setups.
pub fn client_manager_with_http(http: reqwest::Client) -> Arc<ClientManager> {
    Arc::new(ClientManager::with_http(http))
}

/// A chat service over the default engine, with the given provider
/// credentials.
pub async fn build_chat(credentials: Vec<ClientConfig>) -> Result<ChatService, ChatError> {
    build_chat_with(credentials, Vec::new(), None).await
}

/// A chat service with explicit engines and an optional system prompt.
pub async fn build_chat_with(
    credentials: Vec<ClientConfig>,
    engines: Vec<(String, EngineConfig)>,
    instructions: Option<String>,
) -> Result<ChatService, ChatError> {
    let clients = client_manager()?;
    let mut builder = ChatService::builder(clients);

    for config in credentials {
        builder = builder.credentials(config);
    }

    for (name, config) in engines {
        builder = builder.engine(name, config);
    }

    if let Some(instructions) = instructions {
        builder = builder.instructions(instructions);
    }

    builder.build().await
}
