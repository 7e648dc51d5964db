//! Shared provider error kinds and error value helpers.
//!
//! ```rust
//! use bprovider::ProviderError;
//!
//! let config = ProviderError::config("AI provider is required");
//! assert!(!config.retryable);
//!
//! let backend = ProviderError::backend_retryable("upstream flaked").with_status(503);
//! assert!(backend.retryable);
//! assert_eq!(backend.status, Some(503));
//! ```

use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Caller mistake: missing or invalid provider, engine, model, job id,
    /// or session-store shape. Never retried.
    Config,
    /// A client was requested before its credentials were supplied.
    NotInitialized,
    /// An upload payload could not be converted into a stream.
    InvalidFile,
    /// A downstream call failed; message and HTTP status are preserved.
    Backend,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
    pub status: Option<u16>,
    pub retryable: bool,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            retryable,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Config, message, false)
    }

    pub fn not_initialized(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::NotInitialized, message, false)
    }

    pub fn invalid_file(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::InvalidFile, message, false)
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Backend, message, false)
    }

    pub fn backend_retryable(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Backend, message, true)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

impl Display for ProviderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "{:?}: {} (status {status})", self.kind, self.message),
            None => write!(f, "{:?}: {}", self.kind, self.message),
        }
    }
}

impl Error for ProviderError {}
