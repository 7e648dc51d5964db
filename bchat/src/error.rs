//! Chat-layer errors and classification.

use std::error::Error;
use std::fmt::{Display, Formatter};

use bprovider::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatErrorKind {
    /// Caller mistake: unknown engine, invalid store, bad options.
    Config,
    /// The session store failed to load or persist a session.
    Store,
    /// A backend client call failed; the source error is preserved.
    Provider,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatError {
    pub kind: ChatErrorKind,
    pub message: String,
    pub source: Option<ProviderError>,
}

impl ChatError {
    pub fn new(kind: ChatErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ChatErrorKind::Config, message)
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::new(ChatErrorKind::Store, message)
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::new(ChatErrorKind::Provider, message)
    }
}

impl Display for ChatError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl Error for ChatError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| source as &(dyn Error + 'static))
    }
}

impl From<ProviderError> for ChatError {
    fn from(value: ProviderError) -> Self {
        Self {
            kind: ChatErrorKind::Provider,
            message: value.to_string(),
            source: Some(value),
        }
    }
}
