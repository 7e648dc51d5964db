//! The talk orchestrator: engine resolution, session lifecycle, and
//! dispatch to the backend flows.

use std::collections::HashMap;
use std::sync::Arc;

use bcommon::SessionId;
use bpoll::LoopRegistry;
use bprovider::{
    AssistantParams, AssistantPromptOptions, ChatPromptOptions, ClientConfig, ClientManager,
    DEFAULT_INSTRUCTIONS, GenerativePromptOptions, MessageInput, Part, ProviderId, first_text,
};
use uuid::Uuid;

use crate::{
    ChatError, Engine, EngineConfig, InMemorySessionStore, Session, SessionStore, TalkOptions,
    TalkReply, Turn, chat_history, generative_history,
};

const SESSION_ID_PREFIX: &str = "BANTER-SESSION";

fn synthesize_session_id() -> SessionId {
    SessionId::new(format!("{SESSION_ID_PREFIX}|{}", Uuid::new_v4()))
}

#[derive(Debug, Clone)]
struct EngineState {
    model: String,
    assistant_id: Option<String>,
}

/// Builds a [`ChatService`]: wires the store and loop registry, records
/// the system prompt, resolves each engine's model, and provisions the
/// durable assistant for assistant-backed engines.
pub struct ChatBuilder {
    clients: Arc<ClientManager>,
    store: Arc<dyn SessionStore>,
    loops: Arc<LoopRegistry>,
    system_prompt: String,
    engines: Vec<(String, EngineConfig)>,
    credentials: Vec<ClientConfig>,
}

impl ChatBuilder {
    pub fn new(clients: Arc<ClientManager>) -> Self {
        Self {
            clients,
            store: Arc::new(InMemorySessionStore::new()),
            loops: Arc::new(LoopRegistry::new()),
            system_prompt: DEFAULT_INSTRUCTIONS.to_string(),
            engines: Vec::new(),
            credentials: Vec::new(),
        }
    }

    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = store;
        self
    }

    pub fn loops(mut self, loops: Arc<LoopRegistry>) -> Self {
        self.loops = loops;
        self
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.system_prompt = instructions.into();
        self
    }

    pub fn engine(mut self, name: impl Into<String>, config: EngineConfig) -> Self {
        self.engines.push((name.into(), config));
        self
    }

    pub fn credentials(mut self, config: ClientConfig) -> Self {
        self.credentials.push(config);
        self
    }

    pub async fn build(self) -> Result<ChatService, ChatError> {
        let mut configs = HashMap::new();
        for config in &self.credentials {
            let provider = ProviderId::parse(&config.provider)?;
            configs.insert(provider, config.clone());
        }

        let configured = if self.engines.is_empty() {
            vec![("CHATGPT".to_string(), EngineConfig::default())]
        } else {
            self.engines.clone()
        };

        let mut engines = HashMap::new();
        for (name, config) in configured {
            let engine = Engine::parse(&name)?;
            let model = config
                .model
                .unwrap_or_else(|| engine.default_model().to_string());

            let assistant_id = match (engine, config.assistant_id) {
                (Engine::Assistant, Some(id)) => Some(id),
                (Engine::Assistant, None) => {
                    let client = self
                        .clients
                        .openai(&provider_config(&configs, ProviderId::OpenAi))?;
                    let params = AssistantParams::default()
                        .with_model(model.clone())
                        .with_instructions(self.system_prompt.clone());
                    Some(client.ensure_assistant(None, params).await?.id)
                }
                (_, other) => other,
            };

            engines.insert(
                engine,
                EngineState {
                    model,
                    assistant_id,
                },
            );
        }

        Ok(ChatService {
            clients: self.clients,
            store: self.store,
            loops: self.loops,
            system_prompt: self.system_prompt,
            engines,
            configs,
        })
    }
}

fn provider_config(
    configs: &HashMap<ProviderId, ClientConfig>,
    provider: ProviderId,
) -> ClientConfig {
    configs
        .get(&provider)
        .cloned()
        .unwrap_or_else(|| ClientConfig::new(provider.as_str()))
}

/// The top-level conversational entry point. One `talk` call resolves
/// the engine, replays the session into the backend's shape, runs the
/// matching flow, and appends exactly one `{request, response}` turn.
#[derive(Clone)]
pub struct ChatService {
    clients: Arc<ClientManager>,
    store: Arc<dyn SessionStore>,
    loops: Arc<LoopRegistry>,
    system_prompt: String,
    engines: HashMap<Engine, EngineState>,
    configs: HashMap<ProviderId, ClientConfig>,
}

impl std::fmt::Debug for ChatService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatService")
            .field("system_prompt", &self.system_prompt)
            .finish_non_exhaustive()
    }
}

impl ChatService {
    pub fn builder(clients: Arc<ClientManager>) -> ChatBuilder {
        ChatBuilder::new(clients)
    }

    pub fn store(&self) -> Arc<dyn SessionStore> {
        Arc::clone(&self.store)
    }

    pub fn loops(&self) -> Arc<LoopRegistry> {
        Arc::clone(&self.loops)
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// One conversational turn. The session id is taken from the
    /// options or synthesized; the session store's get-then-set is not
    /// atomic, so concurrent calls for one session can lose a turn.
    pub async fn talk(
        &self,
        input: impl Into<String>,
        options: TalkOptions,
    ) -> Result<TalkReply, ChatError> {
        let input = input.into();
        let engine = Engine::parse(options.engine.as_deref().unwrap_or("CHATGPT"))?;
        let state = self.engines.get(&engine).cloned().ok_or_else(|| {
            ChatError::config(format!("AI engine '{engine}' has not been initialized"))
        })?;

        let session_id = options
            .session_id
            .clone()
            .unwrap_or_else(synthesize_session_id);

        let mut session = self
            .store
            .get(&session_id)
            .await?
            .unwrap_or_else(|| Session::new(self.system_prompt.clone()));

        tracing::debug!(
            engine = %engine,
            session_id = %session_id,
            turns = session.turns.len(),
            "dispatching talk turn"
        );

        let response = self
            .dispatch(engine, &state, &mut session, &input, &options)
            .await?;

        // The turn's stored response is the first part carrying literal
        // text; when no part does, the response stays unset.
        let response_text = first_text(&response).map(str::to_string);
        session.turns.push(Turn::new(input, response_text));
        self.store.set(&session_id, session).await?;

        Ok(TalkReply {
            session_id,
            response,
        })
    }

    async fn dispatch(
        &self,
        engine: Engine,
        state: &EngineState,
        session: &mut Session,
        input: &str,
        options: &TalkOptions,
    ) -> Result<Vec<Part>, ChatError> {
        match engine {
            Engine::ChatGpt => {
                let client = self.clients.openai(&self.config_for(ProviderId::OpenAi))?;

                let mut prompt = ChatPromptOptions::default()
                    .with_model(state.model.clone())
                    .with_history(chat_history(&session.turns));
                if let Some(sink) = options.sink.clone() {
                    prompt = prompt.with_sink(sink);
                }

                let decoded = client.prompt_chat(MessageInput::text(input), prompt).await?;
                Ok(decoded.parts())
            }
            Engine::Assistant => {
                let client = self.clients.openai(&self.config_for(ProviderId::OpenAi))?;

                let mut prompt = AssistantPromptOptions::default().with_params(
                    AssistantParams::default()
                        .with_model(state.model.clone())
                        .with_instructions(session.system_prompt.clone()),
                );
                if let Some(id) = &state.assistant_id {
                    prompt = prompt.with_assistant_id(id.clone());
                }
                if let Some(thread_id) = &session.thread_id {
                    prompt = prompt.with_thread_id(thread_id.clone());
                }
                if let Some(sink) = options.sink.clone() {
                    prompt = prompt.with_sink(sink);
                }
                if options.delete_thread {
                    prompt = prompt.delete_thread_after();
                }

                let exchange = client
                    .prompt_assistant(&self.loops, MessageInput::text(input), prompt)
                    .await?;

                // Written back for continuity on the next call.
                session.thread_id = Some(exchange.thread.id.clone());
                Ok(exchange.response)
            }
            Engine::Gemini => {
                let client = self.clients.gemini(&self.config_for(ProviderId::Gemini))?;

                let mut prompt = GenerativePromptOptions::default()
                    .with_model(state.model.clone())
                    .with_history(generative_history(&session.turns));
                if let Some(sink) = options.sink.clone() {
                    prompt = prompt.with_sink(sink);
                }

                let decoded = client.prompt(MessageInput::text(input), prompt).await?;
                Ok(decoded.parts())
            }
            Engine::Vertex => {
                let client = self.clients.vertex(&self.config_for(ProviderId::Vertex))?;

                let mut prompt = GenerativePromptOptions::default()
                    .with_model(state.model.clone())
                    .with_history(generative_history(&session.turns));
                if let Some(sink) = options.sink.clone() {
                    prompt = prompt.with_sink(sink);
                }

                let decoded = client.prompt(MessageInput::text(input), prompt).await?;
                Ok(decoded.parts())
            }
        }
    }

    fn config_for(&self, provider: ProviderId) -> ClientConfig {
        provider_config(&self.configs, provider)
    }
}
